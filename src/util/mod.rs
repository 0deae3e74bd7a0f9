pub mod cancel;
pub mod pattern;
