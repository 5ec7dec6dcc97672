pub mod error;
pub mod model;
pub mod proxy;

pub use error::{Error, Result};
pub use model::{Channel, DownloadPhase, DownloadProgress, DownloadRequest, TaskOutcome};
pub use proxy::{ProxyConfig, ProxyDescriptor, ProxyType};
