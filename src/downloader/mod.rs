pub mod engine;
pub mod error;
pub mod events;
pub mod integrity;
pub mod probe;
pub mod progress;
pub mod segment;
pub mod single;
pub mod task;
pub mod temp;

pub use engine::SegmentedDownloader;
pub use error::{DownloadError, DownloadResult};
pub use events::{download_event_channel, DownloadEvent, DownloadEventReceiver, DownloadEventSender};
pub use integrity::{file_sha1, verify_sha1};
pub use probe::{HttpRangeProbe, ProbeResult};
pub use progress::{percent_of, ProgressAggregator, ProgressReporter};
pub use segment::{effective_segment_count, plan_ranges, Segment, CHUNK_SIZE};
pub use single::SingleStreamDownloader;
pub use task::DownloadTask;
pub use temp::TempFileGuard;
