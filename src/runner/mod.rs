pub mod behavior;
pub mod condition;
pub mod display;
pub mod executor;
pub mod listener;
pub mod node;
pub mod recording;
pub mod report;
pub mod result;
pub mod summary;
