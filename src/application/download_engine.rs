use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;

use super::task::TaskContext;
use crate::domain::{DownloadPhase, DownloadProgress, DownloadRequest, Error, Result, TaskOutcome};
use crate::utils::format_file_size;

pub const CHUNK_SIZE: usize = 1024 * 1024;
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const THROUGHPUT_INTERVAL: Duration = Duration::from_secs(1);

/// What a finished download produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub path: PathBuf,
    pub bytes_written: u64,
}

pub type DownloadContext = TaskContext<DownloadSummary, DownloadProgress>;

enum Transfer {
    Completed,
    Cancelled,
}

/// Running byte count plus a throughput estimate refreshed at most once per
/// interval, measured against the previous refresh.
#[derive(Debug)]
struct ProgressMeter {
    total: Option<u64>,
    written: u64,
    mark_time: Instant,
    mark_bytes: u64,
    throughput: Option<f64>,
    published_bytes: Option<u64>,
}

impl ProgressMeter {
    fn new(total: Option<u64>, now: Instant) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            written: 0,
            mark_time: now,
            mark_bytes: 0,
            throughput: None,
            published_bytes: None,
        }
    }

    /// Whether a progress snapshot should go out now: for the first bytes, after
    /// every `CHUNK_SIZE` of new data, or when `force` is set.
    fn publish_due(&mut self, force: bool) -> bool {
        let due = force
            || match self.published_bytes {
                None => true,
                Some(at) => self.written - at >= CHUNK_SIZE as u64,
            };
        if due {
            self.published_bytes = Some(self.written);
        }
        due
    }

    /// Adds `len` bytes. Returns the new throughput when it was refreshed.
    fn record(&mut self, len: usize, now: Instant) -> Option<f64> {
        self.written += len as u64;

        let elapsed = now.saturating_duration_since(self.mark_time);
        if elapsed < THROUGHPUT_INTERVAL {
            return None;
        }
        let rate = (self.written - self.mark_bytes) as f64 / elapsed.as_secs_f64();
        self.mark_time = now;
        self.mark_bytes = self.written;
        self.throughput = Some(rate);
        Some(rate)
    }

    fn fraction(&self) -> Option<f64> {
        self.total
            .map(|total| (self.written as f64 / total as f64).min(1.0))
    }

    fn snapshot(&self, phase: DownloadPhase) -> DownloadProgress {
        DownloadProgress {
            bytes_written: self.written,
            total_bytes: self.total,
            fraction_complete: self.fraction(),
            throughput_bytes_per_sec: self.throughput,
            phase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    Body,
    File,
    Connection,
}

/// The resources that were actually held, in the order they were released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ReleaseReport {
    pub steps: Vec<Released>,
}

/// Everything a single transfer holds open. Released exactly once, on every exit path.
#[derive(Default)]
struct TransferResources {
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    file: Option<BufWriter<File>>,
    connection: Option<reqwest::Client>,
}

impl TransferResources {
    /// Each step runs regardless of the others failing; failures are only logged.
    async fn release(self) -> ReleaseReport {
        let TransferResources {
            body,
            file,
            connection,
        } = self;
        let mut report = ReleaseReport::default();

        if let Some(body) = body {
            drop(body);
            report.steps.push(Released::Body);
        }

        if let Some(mut file) = file {
            report.steps.push(Released::File);
            if let Err(e) = file.flush().await {
                tracing::warn!(error = %e, "Failed to flush output file");
            }
            if let Err(e) = file.get_mut().sync_all().await {
                tracing::warn!(error = %e, "Failed to sync output file");
            }
            drop(file);
        }

        if let Some(client) = connection {
            drop(client);
            report.steps.push(Released::Connection);
        }

        tracing::debug!(?report, "Released transfer resources");
        report
    }
}

/// Streams one URL to one file.
pub struct DownloadEngine {
    request: DownloadRequest,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl DownloadEngine {
    pub fn new(request: DownloadRequest) -> Self {
        Self {
            request,
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Runs the download to its terminal outcome. Never panics on I/O failure.
    pub async fn run(self, ctx: &DownloadContext) -> TaskOutcome<DownloadSummary> {
        self.run_reporting(ctx).await.0
    }

    pub(crate) async fn run_reporting(
        self,
        ctx: &DownloadContext,
    ) -> (TaskOutcome<DownloadSummary>, ReleaseReport) {
        let destination = self.request.destination.clone();
        let mut meter = ProgressMeter::new(None, Instant::now());
        let mut resources = TransferResources::default();

        ctx.report_progress(DownloadProgress::connecting());
        let result = match self.transfer(ctx, &mut meter, &mut resources).await {
            // Errors after a cancel request settle as cancelled.
            Err(e) if ctx.is_cancelled() => {
                tracing::debug!(error = %e, "Transfer error after cancellation");
                Ok(Transfer::Cancelled)
            }
            other => other,
        };
        let report = resources.release().await;

        let outcome = match result {
            Ok(Transfer::Completed) => {
                let bytes = meter.written;
                tracing::info!(url = %self.request.url, path = %destination.display(), bytes, "Download completed");
                ctx.report_progress(meter.snapshot(DownloadPhase::Completed));
                ctx.report_message(format!("Download completed ({})", format_file_size(bytes)));
                TaskOutcome::Succeeded(DownloadSummary {
                    path: destination,
                    bytes_written: bytes,
                })
            }
            Ok(Transfer::Cancelled) => {
                tracing::info!(url = %self.request.url, bytes = meter.written, "Download cancelled");
                remove_partial_file(&destination).await;
                ctx.report_progress(meter.snapshot(DownloadPhase::Cancelled));
                ctx.report_message("Download cancelled");
                TaskOutcome::Cancelled
            }
            Err(e) => {
                tracing::warn!(url = %self.request.url, error = %e, "Download failed");
                ctx.report_progress(meter.snapshot(DownloadPhase::Failed));
                ctx.report_message(e.to_string());
                TaskOutcome::Failed(e)
            }
        };
        (outcome, report)
    }

    async fn transfer(
        &self,
        ctx: &DownloadContext,
        meter: &mut ProgressMeter,
        resources: &mut TransferResources,
    ) -> Result<Transfer> {
        let url = Url::parse(&self.request.url).map_err(|source| Error::InvalidUrl {
            url: self.request.url.clone(),
            source,
        })?;
        let route = self.request.proxy.route();
        let via_proxy = route.proxy.is_some();

        let builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .user_agent(DESKTOP_USER_AGENT);
        let client = self
            .request
            .proxy
            .apply(builder)?
            .build()
            .map_err(|e| Error::from_transport(e, route))?;
        resources.connection = Some(client.clone());

        ctx.report_message(format!("Connecting to {}", url));
        tracing::debug!(url = %url, proxy = %self.request.proxy, "Connecting");

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::from_transport(e, route))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let message = status.canonical_reason().unwrap_or("Unknown").to_string();
            drop(response);
            return Err(Error::Http {
                status: status.as_u16(),
                message,
                via_proxy,
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        match total {
            Some(size) if size > MAX_FILE_SIZE => {
                drop(response);
                return Err(Error::FileTooLarge(size));
            }
            Some(size) => ctx.report_message(format!("Total size: {}", format_file_size(size))),
            None => ctx.report_message("File size unknown, downloading..."),
        }

        let destination = &self.request.destination;
        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            tracing::warn!(path = %destination.display(), "Overwriting existing file");
            ctx.report_message(format!(
                "File {} already exists and will be overwritten",
                display_name(destination)
            ));
        }

        resources.body = Some(response.bytes_stream().boxed());
        resources.file = Some(BufWriter::with_capacity(
            CHUNK_SIZE,
            File::create(destination).await?,
        ));
        *meter = ProgressMeter::new(total, Instant::now());

        loop {
            let Some(body) = resources.body.as_mut() else {
                break;
            };
            let next = tokio::select! {
                biased;
                _ = ctx.cancellation_token().cancelled() => return Ok(Transfer::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| Error::from_transport(e, route))?;

            if ctx.is_cancelled() {
                return Ok(Transfer::Cancelled);
            }

            if let Some(file) = resources.file.as_mut() {
                file.write_all(&chunk).await?;
            }

            let refreshed = meter.record(chunk.len(), Instant::now());
            if !meter.publish_due(refreshed.is_some()) {
                continue;
            }
            ctx.report_progress(meter.snapshot(DownloadPhase::Downloading));

            match (meter.fraction(), refreshed) {
                (Some(fraction), Some(rate)) => ctx.report_message(format!(
                    "{:.1}% - {:.2} MB/s",
                    fraction * 100.0,
                    rate / (1024.0 * 1024.0)
                )),
                (Some(_), None) => {}
                (None, _) => ctx.report_message(format!(
                    "Downloaded {}",
                    format_file_size(meter.written)
                )),
            }
        }

        Ok(Transfer::Completed)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Best-effort removal of a partially written file. Empty files are left alone.
async fn remove_partial_file(path: &Path) {
    let len = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };
    if len == 0 {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "Deleted incomplete file"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cannot delete incomplete file"),
    }
}
