use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::error::Error;
use super::proxy::ProxyConfig;

/// Release track to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stable,
    Beta,
    Dev,
    Canary,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Stable, Channel::Beta, Channel::Dev, Channel::Canary];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Stable => "Stable",
            Channel::Beta => "Beta",
            Channel::Dev => "Dev",
            Channel::Canary => "Canary",
        };
        f.write_str(name)
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Validation(format!("Unsupported channel: {}", s)))
    }
}

/// One download action: fetch `url` into `destination` through `proxy`.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub proxy: ProxyConfig,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>, proxy: ProxyConfig) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            proxy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Connecting,
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

/// Snapshot of a running download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
    /// `None` while progress is indeterminate.
    pub fraction_complete: Option<f64>,
    /// Last throughput estimate in bytes per second.
    pub throughput_bytes_per_sec: Option<f64>,
    pub phase: DownloadPhase,
}

impl DownloadProgress {
    pub fn connecting() -> Self {
        Self {
            bytes_written: 0,
            total_bytes: None,
            fraction_complete: None,
            throughput_bytes_per_sec: None,
            phase: DownloadPhase::Connecting,
        }
    }

    pub fn throughput_mib_per_sec(&self) -> Option<f64> {
        self.throughput_bytes_per_sec
            .map(|bps| bps / (1024.0 * 1024.0))
    }
}

/// Terminal result of a task, produced exactly once.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Succeeded(T),
    Failed(Error),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

impl<T> From<Result<T, Error>> for TaskOutcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => TaskOutcome::Succeeded(value),
            Err(e) => TaskOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse() {
        assert_eq!("stable".parse::<Channel>().unwrap(), Channel::Stable);
        assert_eq!(" CANARY ".parse::<Channel>().unwrap(), Channel::Canary);
        assert!("nightly".parse::<Channel>().is_err());
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: TaskOutcome<u8> = Ok(3).into();
        assert!(ok.is_succeeded());

        let failed: TaskOutcome<u8> = Err(Error::Protocol("no links".to_string())).into();
        assert!(matches!(failed, TaskOutcome::Failed(Error::Protocol(_))));
    }

    #[test]
    fn test_throughput_in_mib() {
        let progress = DownloadProgress {
            throughput_bytes_per_sec: Some(2.0 * 1024.0 * 1024.0),
            ..DownloadProgress::connecting()
        };
        assert_eq!(progress.throughput_mib_per_sec(), Some(2.0));
    }
}
