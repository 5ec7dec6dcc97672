use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use url::Url;

use super::models::{LinkQuery, Platform, UpdateConfig};
use super::protocol::{build_request_body, parse_links};
use crate::domain::{Channel, Error, ProxyConfig, Result};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves a release channel to download links through the update service.
#[derive(Clone)]
pub struct UpdateClient {
    config: UpdateConfig,
}

impl UpdateClient {
    pub fn new(config: UpdateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Resolves `channel` for the platform this process runs on.
    pub async fn fetch_links(&self, channel: Channel, proxy: &ProxyConfig) -> Result<Vec<String>> {
        let query = LinkQuery::new(channel, Platform::current())?;
        self.fetch_links_for(&query, proxy).await
    }

    /// One update-check round trip for an explicit query.
    pub async fn fetch_links_for(&self, query: &LinkQuery, proxy: &ProxyConfig) -> Result<Vec<String>> {
        let endpoint = Url::parse(&self.config.endpoint).map_err(|source| Error::InvalidUrl {
            url: self.config.endpoint.clone(),
            source,
        })?;
        let route = proxy.route();

        let builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .user_agent(self.config.user_agent.as_str());
        let client = proxy
            .apply(builder)?
            .build()
            .map_err(|e| Error::from_transport(e, route))?;

        tracing::debug!(
            channel = %query.channel,
            platform = query.platform.name(),
            request_id = %query.request_id,
            proxy = %proxy,
            "Sending update check"
        );

        let response = client
            .post(endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=UTF-8")
            .body(build_request_body(query))
            .send()
            .await
            .map_err(|e| Error::from_transport(e, route))?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = status.canonical_reason().unwrap_or("Unknown").to_string();
            drop(response);
            return Err(Error::Http {
                status: status.as_u16(),
                message,
                // Only download failures mention the proxy.
                via_proxy: false,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::from_transport(e, route))?;

        let links = parse_links(&body)?;
        tracing::info!(channel = %query.channel, count = links.len(), "Resolved download links");
        Ok(links)
    }
}
