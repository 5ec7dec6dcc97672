use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::api::UpdateConfig;
use crate::domain::{Channel, Error, ProxyConfig, ProxyType, Result};

#[derive(Debug, Parser)]
#[command(name = "release-fetcher")]
#[command(version)]
#[command(about = "Resolve a release channel to download links and fetch the installer")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML settings file with [proxy] and [update] tables
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log progress details to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the download links for a channel
    Links {
        /// Stable, Beta, Dev or Canary
        #[arg(default_value = "stable")]
        channel: Channel,
    },

    /// Resolve a channel and download one of its links
    Download {
        #[arg(default_value = "stable")]
        channel: Channel,

        /// Which link to fetch, counting from 1
        #[arg(short, long, default_value_t = 1)]
        index: usize,

        /// File name to save as (defaults to the last URL segment)
        #[arg(short, long)]
        output: Option<String>,

        /// Existing directory to save into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Replace the destination if it already exists
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Debug, Default, Args)]
pub struct ProxyArgs {
    /// none, http, https or socks5
    #[arg(long, global = true, value_name = "TYPE")]
    pub proxy_type: Option<ProxyType>,

    #[arg(long, global = true, value_name = "HOST")]
    pub proxy_host: Option<String>,

    #[arg(long, global = true, value_name = "PORT")]
    pub proxy_port: Option<i64>,

    #[arg(long, global = true, value_name = "USER")]
    pub proxy_user: Option<String>,

    #[arg(long, global = true, value_name = "PASSWORD")]
    pub proxy_pass: Option<String>,
}

/// `[proxy]` table of the settings file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    #[serde(rename = "type")]
    pub proxy_type: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub proxy: ProxySection,
    pub update: UpdateConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Everything the front end needs once CLI flags and the file are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub proxy: ProxyConfig,
    pub update: UpdateConfig,
}

impl Settings {
    /// Loads the settings file named on the command line, if any, and applies the flags over it.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(&cli.proxy, file)
    }

    pub fn merge(flags: &ProxyArgs, file: FileConfig) -> Result<Self> {
        let proxy_type = match flags.proxy_type {
            Some(kind) => kind,
            None => file
                .proxy
                .proxy_type
                .as_deref()
                .map(str::parse::<ProxyType>)
                .transpose()?
                .unwrap_or(ProxyType::None),
        };

        let host = flags.proxy_host.clone().or(file.proxy.host).unwrap_or_default();
        let port = flags.proxy_port.or(file.proxy.port).unwrap_or(0);
        let username = flags.proxy_user.clone().or(file.proxy.username);
        let password = flags.proxy_pass.clone().or(file.proxy.password);

        let proxy = ProxyConfig::new(proxy_type, host, port, username, password)?;
        Ok(Self {
            proxy,
            update: file.update,
        })
    }
}
