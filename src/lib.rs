//! Hierarchical test discovery and execution.
//!
//! Catalogs describe what exists, [`discovery`] turns a request into
//! resolution trees and a [`plan::TestPlan`], and [`runner`] executes those
//! trees under resource locks while reporting to listeners.

pub mod catalog;
pub mod cli;
pub mod discovery;
pub mod id;
pub mod launcher;
pub mod lock;
pub mod plan;
pub mod runner;
pub mod util;
