use serde::Deserialize;

use crate::domain::{Channel, Error, Result};
use crate::utils::correlation_token;

pub const DEFAULT_UPDATE_ENDPOINT: &str = "https://tools.google.com/service/update2";
pub const UPDATE_USER_AGENT: &str = "Google Update/1.3.32.7;winhttp;cup-ecdsa";

/// Operating system as the update service names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
}

impl Platform {
    /// Platform of the running process, if the update service knows it.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Windows => "win",
            Platform::MacOs => "mac",
        }
    }

    pub fn os_version(self) -> &'static str {
        match self {
            Platform::Windows => "10.0",
            Platform::MacOs => "13.0",
        }
    }

    pub fn arch(self) -> &'static str {
        match self {
            Platform::Windows => "x64",
            Platform::MacOs if cfg!(target_arch = "aarch64") => "arm64",
            Platform::MacOs => "x64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEntry {
    pub channel_tag: &'static str,
    pub app_id: &'static str,
}

const WIN_STABLE_APP_ID: &str = "{8A69D345-D564-463C-AFF1-A69D9E530F96}";
const WIN_CANARY_APP_ID: &str = "{4EA16AC7-FD5A-47C3-875B-DBF4A2008C20}";

const CHANNEL_TABLE: &[(Platform, Channel, ChannelEntry)] = &[
    (Platform::Windows, Channel::Stable, ChannelEntry { channel_tag: "x64-stable-multi-chrome", app_id: WIN_STABLE_APP_ID }),
    (Platform::Windows, Channel::Beta, ChannelEntry { channel_tag: "x64-beta-multi-chrome", app_id: WIN_STABLE_APP_ID }),
    (Platform::Windows, Channel::Dev, ChannelEntry { channel_tag: "x64-dev-statsdef_1", app_id: WIN_STABLE_APP_ID }),
    (Platform::Windows, Channel::Canary, ChannelEntry { channel_tag: "x64-canary", app_id: WIN_CANARY_APP_ID }),
    (Platform::MacOs, Channel::Stable, ChannelEntry { channel_tag: "", app_id: "com.google.Chrome" }),
    (Platform::MacOs, Channel::Beta, ChannelEntry { channel_tag: "betachannel", app_id: "com.google.Chrome.Beta" }),
    (Platform::MacOs, Channel::Dev, ChannelEntry { channel_tag: "devchannel", app_id: "com.google.Chrome.Dev" }),
    (Platform::MacOs, Channel::Canary, ChannelEntry { channel_tag: "canarychannel", app_id: "com.google.Chrome.Canary" }),
];

pub fn channel_entry(channel: Channel, platform: Platform) -> Option<ChannelEntry> {
    CHANNEL_TABLE
        .iter()
        .find(|(p, c, _)| *p == platform && *c == channel)
        .map(|(_, _, entry)| *entry)
}

/// Everything that goes into one update-check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkQuery {
    pub channel: Channel,
    pub platform: Platform,
    pub arch: &'static str,
    pub os_version: &'static str,
    pub channel_tag: &'static str,
    pub app_id: &'static str,
    pub session_id: String,
    pub request_id: String,
}

impl LinkQuery {
    /// Builds a query with fresh correlation tokens.
    pub fn new(channel: Channel, platform: Option<Platform>) -> Result<Self> {
        let platform = platform.ok_or_else(|| {
            Error::UnsupportedConfiguration(format!(
                "Unsupported OS: {}",
                std::env::consts::OS
            ))
        })?;
        let entry = channel_entry(channel, platform).ok_or_else(|| {
            Error::UnsupportedConfiguration(format!(
                "Unsupported version: {} on {}",
                channel,
                platform.name()
            ))
        })?;

        Ok(Self {
            channel,
            platform,
            arch: platform.arch(),
            os_version: platform.os_version(),
            channel_tag: entry.channel_tag,
            app_id: entry.app_id,
            session_id: correlation_token(),
            request_id: correlation_token(),
        })
    }
}

/// Configuration for the update client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub endpoint: String,
    pub user_agent: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_UPDATE_ENDPOINT.to_string(),
            user_agent: UPDATE_USER_AGENT.to_string(),
        }
    }
}
