//! Time-Series Persistence
//!
//! Resolution-partitioned, append-only storage for sampled rate data. Each
//! dataset is a directory of immutable CRC32C-checksummed segments plus a
//! durable watermark. Appends are atomic with respect to readers: a segment
//! becomes visible only after it is fully on disk, by swapping in a new
//! snapshot.

pub mod partition;
pub mod reader;
pub mod recovery;
pub mod rollup;
pub mod scan;
pub mod segment;
pub mod store;
pub mod watermark;

pub use partition::{DatasetSpec, PartitionSnapshot};
pub use rollup::{dedup_keep_last, RollupRow};
pub use scan::{KeepLast, Scan, ScanFilter};
pub use segment::FsyncPolicy;
pub use store::{StoreConfig, StoreError, TimeSeriesStore};
