//! Agent locators and the storage-stable keys derived from them.
//!
//! A locator is whatever string a registry hands out for an agent's off-chain
//! metadata:
//! - a content-addressed URI (`ipfs://<cid>[/path]`)
//! - an absolute HTTP(S) URL
//! - a bare domain (`alpha.example`)
//!
//! HTTP and domain locators resolve to the agent card under
//! [`WELL_KNOWN_AGENT_CARD_PATH`]. The locator *key* is what gets persisted:
//! it stays stable when the fetch URL changes shape.

use serde_json::Value;
use url::Url;

use crate::constants::{
    CONTENT_ADDRESSED_KEY_SUFFIX, CONTENT_KEY_PREFIX_LEN, IPFS_SCHEME, WELL_KNOWN_AGENT_CARD_PATH,
};
use crate::error::{CoreError, Result};

/// A parsed agent locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `ipfs://` URI; `path` is `<cid>[/sub/path]` without scheme or `ipfs/` segment.
    ContentAddressed {
        /// CID plus optional sub path.
        path: String,
    },

    /// Absolute `http://` or `https://` URL, kept as given (trimmed).
    Http {
        /// Original URL text.
        raw: String,
        /// Parsed form.
        url: Url,
    },

    /// Anything else: treated as a host name served over plain HTTP.
    Domain(String),
}

impl Locator {
    /// Interpret a raw locator string.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::EmptyLocator);
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, IPFS_SCHEME) {
            let rest = rest.strip_prefix("ipfs/").unwrap_or(rest);
            let path = rest.trim_start_matches('/');
            if path.is_empty() {
                return Err(CoreError::InvalidLocator(trimmed.to_string()));
            }
            return Ok(Locator::ContentAddressed {
                path: path.to_string(),
            });
        }

        if is_http_url(trimmed) {
            let url =
                Url::parse(trimmed).map_err(|_| CoreError::InvalidLocator(trimmed.to_string()))?;
            if url.host_str().is_none() {
                return Err(CoreError::InvalidLocator(trimmed.to_string()));
            }
            return Ok(Locator::Http {
                raw: trimmed.to_string(),
                url,
            });
        }

        if trimmed.contains(char::is_whitespace) || trimmed.contains("://") {
            return Err(CoreError::InvalidLocator(trimmed.to_string()));
        }

        Ok(Locator::Domain(trimmed.to_string()))
    }

    /// Whether this locator is content-addressed.
    pub fn is_content_addressed(&self) -> bool {
        matches!(self, Locator::ContentAddressed { .. })
    }

    /// URL of the agent card for HTTP and domain locators.
    ///
    /// The well-known path is appended unless the locator already names it.
    /// Domains are assumed to be served over plain HTTP. Returns `None` for
    /// content-addressed locators, which go through gateways instead.
    pub fn card_url(&self) -> Option<String> {
        match self {
            Locator::ContentAddressed { .. } => None,
            Locator::Http { raw, .. } => Some(with_well_known_path(raw)),
            Locator::Domain(domain) => Some(with_well_known_path(&format!("http://{}", domain))),
        }
    }

    /// Storage-stable key for this locator.
    ///
    /// - content-addressed: slug of the document's `name`, else the first
    ///   characters of the CID followed by `.ipfs`
    /// - HTTP(S): the authority (`host[:port]`)
    /// - domain: the host part, lowercased
    pub fn key(&self, document: &Value) -> String {
        match self {
            Locator::ContentAddressed { path } => document
                .get("name")
                .and_then(Value::as_str)
                .and_then(slugify)
                .unwrap_or_else(|| content_key(path)),
            Locator::Http { url, raw } => authority(url).unwrap_or_else(|| raw.clone()),
            Locator::Domain(domain) => domain
                .split('/')
                .next()
                .unwrap_or(domain)
                .trim()
                .to_ascii_lowercase(),
        }
    }
}

/// Append the well-known agent card path to an HTTP URL unless already present.
pub fn with_well_known_path(url: &str) -> String {
    if url.contains(WELL_KNOWN_AGENT_CARD_PATH) {
        return url.to_string();
    }
    format!("{}{}", url.trim_end_matches('/'), WELL_KNOWN_AGENT_CARD_PATH)
}

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to `-`.
///
/// Returns `None` when nothing usable remains.
pub fn slugify(name: &str) -> Option<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

fn content_key(path: &str) -> String {
    let cid = path.split('/').next().unwrap_or(path);
    let prefix: String = cid.chars().take(CONTENT_KEY_PREFIX_LEN).collect();
    format!("{}{}", prefix, CONTENT_ADDRESSED_KEY_SUFFIX)
}

fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn is_http_url(s: &str) -> bool {
    strip_prefix_ignore_case(s, "http://").is_some() || strip_prefix_ignore_case(s, "https://").is_some()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
