//! Resolve a release channel to installer download links through the vendor
//! update protocol, then stream one of them to disk with progress reporting,
//! cooperative cancellation and optional HTTP/HTTPS/SOCKS5 proxy routing.

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod utils;

pub use api::{UpdateClient, UpdateConfig};
pub use application::{DownloadCoordinator, DownloadEngine, DownloadSummary, TaskEvent, TaskHandle, TaskRunner};
pub use domain::{Channel, DownloadProgress, DownloadRequest, Error, ProxyConfig, ProxyType, Result, TaskOutcome};
