use crate::{
    api::{LinkQuery, UpdateClient},
    application::{
        download_engine::{DownloadContext, DownloadEngine, DownloadSummary},
        task::{TaskContext, TaskHandle, TaskRunner},
    },
    domain::{Channel, DownloadProgress, DownloadRequest, ProxyConfig, TaskOutcome},
};

/// Resolution has no measurable progress; `None` marks it indeterminate.
pub type ResolveHandle = TaskHandle<Vec<String>, Option<f64>>;
pub type DownloadHandle = TaskHandle<DownloadSummary, DownloadProgress>;

type ResolveContext = TaskContext<Vec<String>, Option<f64>>;

enum ResolveTarget {
    /// Resolved for the platform this process runs on.
    Channel(Channel),
    Query(LinkQuery),
}

impl ResolveTarget {
    fn channel(&self) -> Channel {
        match self {
            ResolveTarget::Channel(channel) => *channel,
            ResolveTarget::Query(query) => query.channel,
        }
    }
}

/// Runs link resolution and downloads as tasks on one shared runner.
#[derive(Clone)]
pub struct DownloadCoordinator {
    update_client: UpdateClient,
    runner: TaskRunner,
}

impl DownloadCoordinator {
    pub fn new(update_client: UpdateClient) -> Self {
        Self {
            update_client,
            runner: TaskRunner::new(),
        }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Resolves `channel` for the current platform in the background.
    pub fn resolve_links(&self, channel: Channel, proxy: ProxyConfig) -> ResolveHandle {
        self.spawn_resolve(ResolveTarget::Channel(channel), proxy)
    }

    pub fn resolve_query(&self, query: LinkQuery, proxy: ProxyConfig) -> ResolveHandle {
        self.spawn_resolve(ResolveTarget::Query(query), proxy)
    }

    fn spawn_resolve(&self, target: ResolveTarget, proxy: ProxyConfig) -> ResolveHandle {
        let client = self.update_client.clone();
        self.runner.spawn("resolve", move |ctx: ResolveContext| async move {
            ctx.report_progress(None);

            if proxy.use_proxy() {
                ctx.report_message(format!(
                    "Fetching download links via {} proxy...",
                    proxy.proxy_type()
                ));
            } else {
                ctx.report_message("Fetching download links...");
            }

            let channel = target.channel();
            let request = async {
                match &target {
                    ResolveTarget::Channel(channel) => client.fetch_links(*channel, &proxy).await,
                    ResolveTarget::Query(query) => client.fetch_links_for(query, &proxy).await,
                }
            };

            let token = ctx.cancellation_token().clone();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    ctx.report_message("Link resolution cancelled");
                    return TaskOutcome::Cancelled;
                }
                result = request => result,
            };

            match &result {
                Ok(links) => ctx.report_message(format!("Found {} download links", links.len())),
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "Link resolution failed");
                    ctx.report_message(e.to_string());
                }
            }
            result.into()
        })
    }

    pub fn start_download(&self, request: DownloadRequest) -> DownloadHandle {
        self.run_engine(DownloadEngine::new(request))
    }

    /// Runs a preconfigured engine, e.g. one with custom timeouts.
    pub fn run_engine(&self, engine: DownloadEngine) -> DownloadHandle {
        self.runner
            .spawn("download", move |ctx: DownloadContext| async move { engine.run(&ctx).await })
    }

    /// Cancels in-flight work and waits for every task's cleanup.
    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Platform, UpdateConfig};
    use crate::application::task::TaskEvent;
    use crate::domain::{DownloadPhase, Error};
    use std::time::Duration;
    use tokio::net::TcpListener;

    const RESPONSE: &str = r#"<response protocol="3.0"><app appid="x">
        <url codebase="https://a.example.com/r/"/>
        <url codebase="https://b.example.com/r"/>
        <package name="setup.exe"/>
    </app></response>"#;

    fn coordinator_for(endpoint: String) -> DownloadCoordinator {
        DownloadCoordinator::new(UpdateClient::new(UpdateConfig {
            endpoint,
            ..Default::default()
        }))
    }

    fn query() -> LinkQuery {
        LinkQuery::new(Channel::Beta, Some(Platform::MacOs)).unwrap()
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}/service/update2", addr)
    }

    #[tokio::test]
    async fn test_resolve_reports_and_returns_links() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/service/update2")
            .with_status(200)
            .with_body(RESPONSE)
            .create_async()
            .await;

        let coordinator = coordinator_for(format!("{}/service/update2", server.url()));
        let mut handle = coordinator.resolve_query(query(), ProxyConfig::direct());

        let mut messages = Vec::new();
        let mut progress = Vec::new();
        let mut links = None;
        while let Some(event) = handle.next_event().await {
            match event {
                TaskEvent::Progress(p) => progress.push(p),
                TaskEvent::Message(m) => messages.push(m),
                TaskEvent::Finished(TaskOutcome::Succeeded(found)) => links = Some(found),
                TaskEvent::Finished(other) => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(progress, vec![None]);
        assert_eq!(messages.first().map(String::as_str), Some("Fetching download links..."));
        assert_eq!(messages.last().map(String::as_str), Some("Found 2 download links"));
        assert_eq!(
            links.unwrap(),
            vec![
                "https://a.example.com/r/setup.exe",
                "https://b.example.com/r/setup.exe",
            ]
        );
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    #[tokio::test]
    async fn test_resolve_links_on_unsupported_os() {
        let coordinator = coordinator_for("http://127.0.0.1:9/service/update2".to_string());
        let mut handle = coordinator.resolve_links(Channel::Stable, ProxyConfig::direct());

        let mut messages = Vec::new();
        let outcome = loop {
            match handle.next_event().await {
                Some(TaskEvent::Message(m)) => messages.push(m),
                Some(TaskEvent::Progress(_)) => {}
                Some(TaskEvent::Finished(outcome)) => break outcome,
                None => panic!("task ended without an outcome"),
            }
        };

        assert!(matches!(outcome, TaskOutcome::Failed(Error::UnsupportedConfiguration(_))));
        assert!(messages.last().unwrap().starts_with("Unsupported configuration: Unsupported OS"));
    }

    #[tokio::test]
    async fn test_resolve_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/service/update2")
            .with_status(500)
            .create_async()
            .await;

        let coordinator = coordinator_for(format!("{}/service/update2", server.url()));
        let outcome = coordinator
            .resolve_query(query(), ProxyConfig::direct())
            .outcome()
            .await;

        match outcome {
            TaskOutcome::Failed(e) => assert!(e.to_string().starts_with("HTTP error 500")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_can_be_cancelled() {
        let coordinator = coordinator_for(silent_server().await);
        let handle = coordinator.resolve_query(query(), ProxyConfig::direct());

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_work() {
        let coordinator = coordinator_for(silent_server().await);
        let handle = coordinator.resolve_query(query(), ProxyConfig::direct());

        tokio::time::timeout(Duration::from_secs(5), coordinator.shutdown())
            .await
            .unwrap();
        assert_eq!(coordinator.runner().active_tasks(), 0);
        assert!(handle.outcome().await.is_cancelled());
    }

    #[tokio::test]
    async fn test_download_through_coordinator() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/files/setup.exe")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("setup.exe");
        let coordinator = coordinator_for(format!("{}/service/update2", server.url()));
        let mut handle = coordinator.start_download(DownloadRequest::new(
            format!("{}/files/setup.exe", server.url()),
            &destination,
            ProxyConfig::direct(),
        ));

        let mut last_phase = None;
        let mut outcome = None;
        while let Some(event) = handle.next_event().await {
            match event {
                TaskEvent::Progress(p) => last_phase = Some(p.phase),
                TaskEvent::Message(_) => {}
                TaskEvent::Finished(o) => outcome = Some(o),
            }
        }

        match outcome.unwrap() {
            TaskOutcome::Succeeded(summary) => {
                assert_eq!(summary.bytes_written, 4096);
                assert_eq!(summary.path, destination);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(last_phase, Some(DownloadPhase::Completed));
        assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 4096]);
    }
}
