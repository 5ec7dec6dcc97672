use std::error::Error as StdError;
use std::io;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Every failure the resolver and the download engine can report.
///
/// `Display` is the sanitized, user-presentable text. The underlying cause,
/// when there is one, is kept as the error source.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error {status}{}: {message}", proxy_suffix(.via_proxy))]
    Http {
        status: u16,
        message: String,
        via_proxy: bool,
    },

    #[error("Connection timed out")]
    ConnectionTimeout(#[source] Option<reqwest::Error>),

    #[error("Proxy connection timed out")]
    ProxyTimeout(#[source] Option<reqwest::Error>),

    #[error("Cannot connect to server")]
    CannotConnect(#[source] Option<reqwest::Error>),

    #[error("Cannot connect to proxy {host}:{port}")]
    ProxyConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("File too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("Invalid URL: {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A transport failure that fit none of the categories above.
    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn proxy_suffix(via_proxy: &bool) -> &'static str {
    if *via_proxy {
        " via proxy"
    } else {
        ""
    }
}

/// Which way a connection was routed, needed to pick the right error category.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    pub proxy: Option<(&'a str, u16)>,
}

impl<'a> Route<'a> {
    pub fn direct() -> Self {
        Self { proxy: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Timeout,
    Refused,
}

// Primary classification table, driven by the reqwest error kind.
fn categorize(err: &reqwest::Error) -> Option<Category> {
    if err.is_timeout() || has_io_kind(err, io::ErrorKind::TimedOut) {
        return Some(Category::Timeout);
    }
    if has_io_kind(err, io::ErrorKind::ConnectionRefused) {
        return Some(Category::Refused);
    }
    if err.is_connect() {
        return Some(Category::Refused);
    }
    None
}

fn has_io_kind(err: &reqwest::Error, kind: io::ErrorKind) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == kind {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

impl Error {
    /// Maps a transport error into the taxonomy, taking the route into account.
    pub fn from_transport(err: reqwest::Error, route: Route<'_>) -> Self {
        match (categorize(&err), route.proxy) {
            (Some(Category::Timeout), Some(_)) => Error::ProxyTimeout(Some(err)),
            (Some(Category::Timeout), None) => Error::ConnectionTimeout(Some(err)),
            (Some(Category::Refused), Some((host, port))) => Error::ProxyConnectFailed {
                host: host.to_string(),
                port,
                source: Some(err),
            },
            (Some(Category::Refused), None) => Error::CannotConnect(Some(err)),
            (None, _) => Error::Transport {
                message: classify_message(&full_message(&err)),
                source: err,
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConnectionTimeout(_) | Error::ProxyTimeout(_))
    }
}

fn full_message(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

struct MessageRule {
    pattern: &'static str,
    text: &'static str,
}

const MESSAGE_RULES: &[MessageRule] = &[
    MessageRule {
        pattern: r"timed out|timeout|getsockopt",
        text: "Connection timed out",
    },
    MessageRule {
        pattern: r"(?i)connection refused",
        text: "Connection refused",
    },
    MessageRule {
        pattern: r"ConnectException|(?i)error trying to connect",
        text: "Connection failed",
    },
];

fn compiled_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        MESSAGE_RULES
            .iter()
            .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (re, rule.text)))
            .collect()
    })
}

/// Best-effort fallback that turns a raw low-level message into something
/// presentable. Only used when no tagged category applies.
pub fn classify_message(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        return "Unknown error".to_string();
    }

    if let Some((_, text)) = compiled_rules().iter().find(|(re, _)| re.is_match(message)) {
        return text.to_string();
    }

    match message.find(':') {
        Some(idx) if idx > 0 => message[..idx].trim().to_string(),
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_categories() {
        assert_eq!(classify_message("read timed out"), "Connection timed out");
        assert_eq!(classify_message("getsockopt: bad"), "Connection timed out");
        assert_eq!(
            classify_message("tcp connect error: Connection refused (os error 111)"),
            "Connection refused"
        );
        assert_eq!(
            classify_message("error trying to connect: dns error"),
            "Connection failed"
        );
    }

    #[test]
    fn test_classify_truncates_at_colon() {
        assert_eq!(classify_message("body error: unexpected eof"), "body error");
        assert_eq!(classify_message(":leading colon"), ":leading colon");
        assert_eq!(classify_message("plain message"), "plain message");
        assert_eq!(classify_message("  "), "Unknown error");
    }

    #[test]
    fn test_http_display_mentions_proxy() {
        let direct = Error::Http {
            status: 404,
            message: "Not Found".to_string(),
            via_proxy: false,
        };
        assert_eq!(direct.to_string(), "HTTP error 404: Not Found");

        let proxied = Error::Http {
            status: 407,
            message: "Proxy Authentication Required".to_string(),
            via_proxy: true,
        };
        assert_eq!(
            proxied.to_string(),
            "HTTP error 407 via proxy: Proxy Authentication Required"
        );
    }

    #[test]
    fn test_timeout_variants() {
        assert!(Error::ConnectionTimeout(None).is_timeout());
        assert!(Error::ProxyTimeout(None).is_timeout());
        assert!(!Error::CannotConnect(None).is_timeout());
        let err = Error::ProxyConnectFailed {
            host: "proxy.local".to_string(),
            port: 3128,
            source: None,
        };
        assert_eq!(err.to_string(), "Cannot connect to proxy proxy.local:3128");
    }
}
