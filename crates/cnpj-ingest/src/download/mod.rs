//! Download stage
//!
//! - [`discovery`]: periods and archive URLs from the remote listing
//! - [`manager`]: concurrent, retrying, hash-verified downloads
//! - [`disk`]: free-space precondition
//! - [`progress`]: live progress for the periodic reporter

pub mod discovery;
pub mod disk;
pub mod manager;
pub mod progress;

pub use discovery::{archive_name, parse_archive_links, parse_periods, SourceDiscovery};
pub use disk::{ensure_free_space, DiskSpaceProbe, SystemDiskSpace};
pub use manager::{DownloadConfig, DownloadManager, DownloadOutcome, DownloadReport, RetryPolicy};
pub use progress::{DownloadProgress, ProgressTracker};
