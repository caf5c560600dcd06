//! Testing utilities for roster.
//!
//! `MockDirectory` stands in for a Consul agent and `RecordingSink` captures
//! published topology snapshots.
//!
//! # Example
//!
//! ```ignore
//! use roster_core::testing::{MockDirectory, RecordingSink};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_join_publishes_topology() {
//!     let directory = Arc::new(MockDirectory::new());
//!     let sink = Arc::new(RecordingSink::new());
//!     // join, then inspect directory.calls() and sink.snapshots()
//! }
//! ```

mod mock_directory;
mod recording_sink;

pub use mock_directory::{DirectoryCall, MockDirectory};
pub use recording_sink::RecordingSink;
