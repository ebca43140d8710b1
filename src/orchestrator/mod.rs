//! Sequential per-term harvesting with durable progress.

pub mod runner;
pub mod state;

pub use runner::{Orchestrator, RunSummary, sanitize_folder_name, term_folder};
pub use state::{TermRun, TermState};
