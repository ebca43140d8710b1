//! pin-harvest: resumable image harvesting from search results.

pub mod collector;
pub mod config;
pub mod downloader;
pub mod error;
pub mod orchestrator;
pub mod worklist;
