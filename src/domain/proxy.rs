use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::error::{Error, Route};

/// Kind of proxy the user picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    None,
    Http,
    Https,
    Socks5,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyType::None => "None",
            ProxyType::Http => "HTTP",
            ProxyType::Https => "HTTPS",
            ProxyType::Socks5 => "SOCKS5",
        };
        f.write_str(name)
    }
}

impl FromStr for ProxyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(ProxyType::None),
            "HTTP" => Ok(ProxyType::Http),
            "HTTPS" => Ok(ProxyType::Https),
            "SOCKS5" => Ok(ProxyType::Socks5),
            other => Err(Error::Validation(format!("Unknown proxy type: {}", other))),
        }
    }
}

/// How the transport actually talks to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Direct,
    Http,
    Socks5,
}

impl TransportMode {
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            TransportMode::Direct => None,
            TransportMode::Http => Some("http"),
            // Hostnames are resolved by the proxy
            TransportMode::Socks5 => Some("socks5h"),
        }
    }
}

// HTTPS proxies are reached over a plain connection and tunnel with CONNECT.
const TRANSPORT_MODES: &[(ProxyType, TransportMode)] = &[
    (ProxyType::None, TransportMode::Direct),
    (ProxyType::Http, TransportMode::Http),
    (ProxyType::Https, TransportMode::Http),
    (ProxyType::Socks5, TransportMode::Socks5),
];

pub fn transport_mode(proxy_type: ProxyType) -> TransportMode {
    TRANSPORT_MODES
        .iter()
        .find(|(kind, _)| *kind == proxy_type)
        .map(|(_, mode)| *mode)
        .unwrap_or(TransportMode::Direct)
}

/// Normalized description of where outbound connections go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyDescriptor {
    Direct,
    Proxy {
        scheme: &'static str,
        host: String,
        port: u16,
    },
}

impl ProxyDescriptor {
    /// Proxy URL understood by the HTTP client, without credentials.
    pub fn url(&self) -> Option<String> {
        match self {
            ProxyDescriptor::Direct => None,
            ProxyDescriptor::Proxy { scheme, host, port } => {
                Some(format!("{}://{}:{}", scheme, host, port))
            }
        }
    }
}

/// Immutable proxy settings shared by the resolver and the download engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    use_proxy: bool,
    proxy_type: Option<ProxyType>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
}

impl ProxyConfig {
    /// Direct connection, no proxy.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Builds and validates a proxy config. `ProxyType::None` yields a direct config.
    ///
    /// The port is taken as `i64` so out-of-range user input reaches validation
    /// instead of being truncated.
    pub fn new(
        proxy_type: ProxyType,
        host: impl Into<String>,
        port: i64,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, Error> {
        if proxy_type == ProxyType::None {
            return Ok(Self::direct());
        }

        let host = host.into().trim().to_string();
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| {
                Error::Validation("Proxy port must be between 1 and 65535".to_string())
            })?;

        let config = Self {
            use_proxy: true,
            proxy_type: Some(proxy_type),
            host: Some(host),
            port: Some(port),
            username: username.filter(|u| !u.is_empty()),
            password,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.use_proxy {
            return Ok(());
        }
        if self.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
            return Err(Error::Validation("Proxy host cannot be empty".to_string()));
        }
        if !matches!(self.port, Some(p) if p >= 1) {
            return Err(Error::Validation(
                "Proxy port must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }

    pub fn use_proxy(&self) -> bool {
        self.use_proxy
    }

    pub fn proxy_type(&self) -> ProxyType {
        self.proxy_type.unwrap_or(ProxyType::None)
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn has_authentication(&self) -> bool {
        self.use_proxy && self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn to_proxy_descriptor(&self) -> ProxyDescriptor {
        let (Some(host), Some(port)) = (self.host.as_deref(), self.port) else {
            return ProxyDescriptor::Direct;
        };
        if !self.use_proxy || host.trim().is_empty() {
            return ProxyDescriptor::Direct;
        }

        match transport_mode(self.proxy_type()).scheme() {
            Some(scheme) => ProxyDescriptor::Proxy {
                scheme,
                host: host.to_string(),
                port,
            },
            None => ProxyDescriptor::Direct,
        }
    }

    /// Basic credentials token, `base64(username:password)`.
    pub fn authorization_header(&self) -> Option<String> {
        if !self.has_authentication() {
            return None;
        }
        let user = self.username.as_deref().unwrap_or_default();
        let pass = self.password.as_deref().unwrap_or_default();
        Some(STANDARD.encode(format!("{}:{}", user, pass)))
    }

    /// Route used to categorise connection failures.
    pub fn route(&self) -> Route<'_> {
        match (self.use_proxy, self.host.as_deref(), self.port) {
            (true, Some(host), Some(port)) => Route {
                proxy: Some((host, port)),
            },
            _ => Route::direct(),
        }
    }

    /// Applies this config to a client builder.
    pub(crate) fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, Error> {
        let descriptor = self.to_proxy_descriptor();
        let Some(proxy_url) = descriptor.url() else {
            return Ok(builder.no_proxy());
        };

        let mut proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| Error::Validation(format!("Invalid proxy address {}: {}", proxy_url, e)))?;

        if let Some(token) = self.authorization_header() {
            match transport_mode(self.proxy_type()) {
                TransportMode::Socks5 => {
                    proxy = proxy.basic_auth(
                        self.username.as_deref().unwrap_or_default(),
                        self.password.as_deref().unwrap_or_default(),
                    );
                }
                _ => {
                    let value = reqwest::header::HeaderValue::from_str(&format!("Basic {}", token))
                        .map_err(|e| Error::Validation(format!("Invalid proxy credentials: {}", e)))?;
                    proxy = proxy.custom_http_auth(value);
                }
            }
        }

        Ok(builder.proxy(proxy))
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.use_proxy {
            return f.write_str("none");
        }
        write!(f, "{}://", self.proxy_type().to_string().to_lowercase())?;
        if let Some(user) = self.username.as_deref().filter(|_| self.has_authentication()) {
            write!(f, "{}:***@", user)?;
        }
        write!(
            f,
            "{}:{}",
            self.host.as_deref().unwrap_or_default(),
            self.port.unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_bounds() {
        assert!(ProxyConfig::new(ProxyType::Http, "proxy.local", 0, None, None).is_err());
        assert!(ProxyConfig::new(ProxyType::Http, "proxy.local", 70000, None, None).is_err());
        assert!(ProxyConfig::new(ProxyType::Http, "proxy.local", 1, None, None).is_ok());
        assert!(ProxyConfig::new(ProxyType::Http, "proxy.local", 65535, None, None).is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        let err = ProxyConfig::new(ProxyType::Socks5, "   ", 1080, None, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_none_type_is_direct() {
        let config = ProxyConfig::new(ProxyType::None, "", 0, None, None).unwrap();
        assert_eq!(config, ProxyConfig::direct());
        assert_eq!(config.to_proxy_descriptor(), ProxyDescriptor::Direct);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_descriptor_uses_transport_table() {
        let https = ProxyConfig::new(ProxyType::Https, "p", 8443, None, None).unwrap();
        assert_eq!(https.to_proxy_descriptor().url().as_deref(), Some("http://p:8443"));

        let socks = ProxyConfig::new(ProxyType::Socks5, "p", 1080, None, None).unwrap();
        assert_eq!(socks.to_proxy_descriptor().url().as_deref(), Some("socks5h://p:1080"));
    }

    #[test]
    fn test_authorization_header() {
        let config = ProxyConfig::new(
            ProxyType::Http,
            "p",
            3128,
            Some("user".to_string()),
            Some("pass".to_string()),
        )
        .unwrap();
        assert_eq!(config.authorization_header().as_deref(), Some("dXNlcjpwYXNz"));

        let anonymous = ProxyConfig::new(ProxyType::Http, "p", 3128, Some(String::new()), None).unwrap();
        assert!(anonymous.authorization_header().is_none());
    }

    #[test]
    fn test_display_masks_password() {
        let config = ProxyConfig::new(
            ProxyType::Socks5,
            "p",
            1080,
            Some("user".to_string()),
            Some("secret".to_string()),
        )
        .unwrap();
        assert_eq!(config.to_string(), "socks5://user:***@p:1080");
        assert_eq!(ProxyConfig::direct().to_string(), "none");
    }

    #[test]
    fn test_proxy_type_parse() {
        assert_eq!("socks5".parse::<ProxyType>().unwrap(), ProxyType::Socks5);
        assert_eq!("Http".parse::<ProxyType>().unwrap(), ProxyType::Http);
        assert!("ftp".parse::<ProxyType>().is_err());
    }
}
