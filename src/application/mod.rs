pub mod download_coordinator;
pub mod download_engine;
pub mod task;

pub use download_coordinator::{DownloadCoordinator, DownloadHandle, ResolveHandle};
pub use download_engine::{DownloadEngine, DownloadSummary};
pub use task::{TaskContext, TaskEvent, TaskHandle, TaskRunner};
