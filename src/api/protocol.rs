//! Wire format of the update protocol: request construction and response parsing.

use std::fmt::Display;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::models::LinkQuery;
use crate::domain::{Error, Result};

pub const PROTOCOL_VERSION: &str = "3.0";

/// Codebases on these prefixes serve packages that must not be offered.
const DISALLOWED_PREFIXES: &[&str] = &["https://www.google.com/dl/", "http://www.google.com/dl/"];

pub fn build_request_body(query: &LinkQuery) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<request protocol="{protocol}" version="1.3.23.9" shell_version="1.3.21.103" ismachine="0" "#,
            r#"sessionid="{session}" installsource="ondemandcheckforupdate" requestid="{request}" dedup="cr">"#,
            r#"<hw physmemory="1200000" sse="1" sse2="1" sse3="1" ssse3="1" sse41="1" sse42="1" avx="1"/>"#,
            r#"<os platform="{platform}" version="{os_version}" arch="{arch}"/>"#,
            r#"<app appid="{app_id}" version="" nextversion="" ap="{channel_tag}" lang="en-US">"#,
            r#"<updatecheck/>"#,
            r#"</app>"#,
            r#"</request>"#
        ),
        protocol = PROTOCOL_VERSION,
        session = escape(query.session_id.as_str()),
        request = escape(query.request_id.as_str()),
        platform = query.platform.name(),
        os_version = query.os_version,
        arch = query.arch,
        app_id = escape(query.app_id),
        channel_tag = escape(query.channel_tag),
    )
}

fn protocol_error(context: &str, err: impl Display) -> Error {
    Error::Protocol(format!("{}: {}", context, err))
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let Some(attr) = element
        .try_get_attribute(name)
        .map_err(|e| protocol_error("malformed attribute", e))?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .map_err(|e| protocol_error("malformed attribute value", e))?;
    Ok(Some(value.into_owned()))
}

#[derive(Default)]
struct AppContents {
    codebases: Vec<String>,
    packages: Vec<String>,
}

impl AppContents {
    fn visit(&mut self, element: &BytesStart<'_>) -> Result<()> {
        match element.name().as_ref() {
            b"url" => {
                if let Some(codebase) = attribute(element, "codebase")? {
                    self.codebases.push(codebase);
                }
            }
            b"package" => {
                if let Some(name) = attribute(element, "name")?.filter(|n| !n.is_empty()) {
                    self.packages.push(name);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Reads the first `<app>` element. Document type declarations are refused
/// outright, so no DTD or external entity is ever processed.
fn read_first_app(xml: &str) -> Result<Option<AppContents>> {
    let mut reader = Reader::from_str(xml);
    let mut app: Option<AppContents> = None;
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| protocol_error("malformed response", e))?;

        match event {
            Event::DocType(_) => {
                return Err(Error::Protocol(
                    "document type declarations are not allowed".to_string(),
                ));
            }
            Event::Start(e) => {
                if let Some(contents) = app.as_mut() {
                    contents.visit(&e)?;
                    depth += 1;
                } else if e.name().as_ref() == b"app" {
                    app = Some(AppContents::default());
                    depth = 1;
                }
            }
            Event::Empty(e) => {
                if let Some(contents) = app.as_mut() {
                    contents.visit(&e)?;
                } else if e.name().as_ref() == b"app" {
                    return Ok(Some(AppContents::default()));
                }
            }
            Event::End(_) if app.is_some() => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(app)
}

fn is_disallowed(url: &str) -> bool {
    DISALLOWED_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// Extracts download links from an update response, url-major and package-minor.
pub fn parse_links(xml: &str) -> Result<Vec<String>> {
    let app = read_first_app(xml)?
        .ok_or_else(|| Error::Protocol("no app element".to_string()))?;

    let mut links = Vec::with_capacity(app.codebases.len() * app.packages.len());
    for codebase in &app.codebases {
        let base = if codebase.ends_with('/') {
            codebase.clone()
        } else {
            format!("{}/", codebase)
        };
        for name in &app.packages {
            let link = format!("{}{}", base, name);
            if is_disallowed(&link) {
                tracing::debug!(url = %link, "Skipping link on disallowed host");
                continue;
            }
            links.push(link);
        }
    }

    if links.is_empty() {
        return Err(Error::Protocol("no links".to_string()));
    }
    Ok(links)
}
