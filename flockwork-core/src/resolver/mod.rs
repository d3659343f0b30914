//! Dependency resolution: turns pending tasks and epics into ordered
//! execution batches (§4.A).

mod diagram;
mod graph;

pub use diagram::{to_ascii, to_mermaid};
pub use graph::{resolve, DependencyGraph};
