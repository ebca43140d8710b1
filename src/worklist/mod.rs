//! Search-term worklist — parsing, progress tracking, and in-place completion markers.

pub mod line;
pub mod store;

pub use line::{
    DONE_PREFIX, Directive, ItemStatus, WorkItem, WorklistLine, parse_line, serialize_line,
};
pub use store::{Worklist, WorklistStore};
