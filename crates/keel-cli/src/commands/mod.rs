pub mod common;
pub mod completions;
pub mod config;
pub mod daemon;
pub mod note;
pub mod queue;
pub mod sync;
pub mod task;
