//! Agent metadata retrieval.
//!
//! [`MetadataFetcher::fetch`] resolves an agent locator to its agent card:
//! - `ipfs://` locators are tried against each configured gateway in order
//! - HTTP(S) URLs and bare domains are fetched from the well-known card path
//!
//! [`MetadataFetcher::fetch_document`] is the plain variant used for
//! registration documents: no well-known rewriting, `ipfs://` goes to the
//! first gateway, and `data:` URIs are decoded inline.

use agentdex_core::{CoreError, Locator};
use anyhow::{Context, Result};
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::MetadataConfig;

/// Gateways used when none are configured.
pub const DEFAULT_GATEWAYS: &[&str] = &[
    "https://ipfs.io/ipfs/",
    "https://cloudflare-ipfs.com/ipfs/",
    "https://gateway.pinata.cloud/ipfs/",
    "https://dweb.link/ipfs/",
];

const USER_AGENT: &str = concat!("agentdex-indexer/", env!("CARGO_PKG_VERSION"));

/// Why a metadata document could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Locator was empty after trimming.
    #[error("empty locator")]
    EmptyLocator,

    /// Locator could not be turned into a fetchable URL.
    #[error("invalid locator '{0}'")]
    InvalidUrl(String),

    /// Server answered with something other than 200.
    #[error("{url} returned HTTP {status}")]
    Http {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// Connection, TLS or timeout failure.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Body exceeded the configured size limit.
    #[error("document at {url} exceeds {limit} bytes")]
    TooLarge {
        /// Requested URL
        url: String,
        /// Configured limit
        limit: usize,
    },

    /// Body was not valid JSON.
    #[error("document at {url} is not valid JSON: {source}")]
    Decode {
        /// Requested URL
        url: String,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// Body was JSON but not an object.
    #[error("document at {url} is not a JSON object")]
    NotAnObject {
        /// Requested URL
        url: String,
    },

    /// Inline `data:` URI could not be decoded.
    #[error("malformed data URI: {0}")]
    InvalidDataUri(String),

    /// Every gateway failed for a content-addressed locator.
    #[error("all {attempts} gateways failed for ipfs://{path}")]
    ExhaustedGateways {
        /// Content path (CID plus optional sub path)
        path: String,
        /// Gateways tried
        attempts: usize,
        /// Failure from the last gateway, if any was tried
        #[source]
        last: Option<Box<FetchError>>,
    },
}

impl From<CoreError> for FetchError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::EmptyLocator => FetchError::EmptyLocator,
            other => FetchError::InvalidUrl(other.to_string()),
        }
    }
}

/// An agent card together with the storage key of the locator it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCard {
    /// Storage-stable locator key
    pub key: String,

    /// The card document (always a JSON object)
    pub document: Value,
}

/// HTTP client for agent cards and registration documents.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: Client,
    gateways: Vec<String>,
    max_bytes: usize,
}

impl MetadataFetcher {
    /// Build a fetcher.
    ///
    /// An empty gateway list falls back to [`DEFAULT_GATEWAYS`].
    pub fn new(gateways: Vec<String>, timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build metadata HTTP client")?;

        let gateways = if gateways.is_empty() {
            DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect()
        } else {
            gateways
        };

        Ok(Self {
            client,
            gateways: gateways.iter().map(|g| normalize_gateway(g)).collect(),
            max_bytes,
        })
    }

    /// Build a fetcher from the `[metadata]` section.
    pub fn from_config(config: &MetadataConfig) -> Result<Self> {
        Self::new(
            config.gateways.clone(),
            Duration::from_secs(config.timeout_secs),
            config.max_document_bytes,
        )
    }

    /// Gateways in the order they are tried.
    pub fn gateways(&self) -> &[String] {
        &self.gateways
    }

    /// Fetch the agent card a locator points to.
    pub async fn fetch(&self, locator: &str) -> Result<Value, FetchError> {
        self.fetch_card(locator).await.map(|card| card.document)
    }

    /// Fetch the agent card a locator points to, with its storage key.
    pub async fn fetch_card(&self, locator: &str) -> Result<AgentCard, FetchError> {
        let parsed = Locator::parse(locator)?;

        let document = match &parsed {
            Locator::ContentAddressed { path } => self.fetch_from_gateways(path).await?,
            Locator::Http { .. } | Locator::Domain(_) => {
                let url = parsed
                    .card_url()
                    .ok_or_else(|| FetchError::InvalidUrl(locator.to_string()))?;
                self.get_json(&url).await?
            }
        };

        Ok(AgentCard {
            key: parsed.key(&document),
            document,
        })
    }

    /// Fetch an arbitrary JSON document, without well-known rewriting.
    pub async fn fetch_document(&self, uri: &str) -> Result<Value, FetchError> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(FetchError::EmptyLocator);
        }

        if let Some(rest) = strip_scheme(trimmed, "data:") {
            return self.decode_data_uri(rest);
        }

        match Locator::parse(trimmed)? {
            Locator::ContentAddressed { path } => {
                let gateway = self
                    .gateways
                    .first()
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_GATEWAYS[0]);
                self.get_json(&format!("{}{}", gateway, path)).await
            }
            Locator::Http { raw, .. } => self.get_json(&raw).await,
            Locator::Domain(_) => Err(FetchError::InvalidUrl(trimmed.to_string())),
        }
    }

    async fn fetch_from_gateways(&self, path: &str) -> Result<Value, FetchError> {
        let mut last = None;

        for gateway in &self.gateways {
            let url = format!("{}{}", gateway, path);
            match self.get_json(&url).await {
                Ok(document) => return Ok(document),
                Err(e) => {
                    debug!(gateway = %gateway, error = %e, "Gateway attempt failed");
                    last = Some(Box::new(e));
                }
            }
        }

        Err(FetchError::ExhaustedGateways {
            path: path.to_string(),
            attempts: self.gateways.len(),
            last,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let mut response = self.client.get(url).send().await.map_err(transport)?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(too_large());
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        parse_object(url, &body)
    }

    fn decode_data_uri(&self, rest: &str) -> Result<Value, FetchError> {
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| FetchError::InvalidDataUri("missing ','".to_string()))?;

        let mut params = meta.split(';').map(|p| p.trim().to_ascii_lowercase());
        let media_type = params.next().unwrap_or_default();
        let is_base64 = params.any(|p| p == "base64");

        if !(media_type.is_empty()
            || media_type == "application/json"
            || media_type.ends_with("+json"))
        {
            return Err(FetchError::InvalidDataUri(format!(
                "unsupported media type '{}'",
                media_type
            )));
        }

        let bytes = if is_base64 {
            base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|e| FetchError::InvalidDataUri(e.to_string()))?
        } else {
            urlencoding::decode_binary(payload.as_bytes()).into_owned()
        };

        if bytes.len() > self.max_bytes {
            return Err(FetchError::TooLarge {
                url: "data:".to_string(),
                limit: self.max_bytes,
            });
        }

        parse_object("data:", &bytes)
    }
}

fn parse_object(url: &str, body: &[u8]) -> Result<Value, FetchError> {
    let value: Value = serde_json::from_slice(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })?;

    if !value.is_object() {
        return Err(FetchError::NotAnObject {
            url: url.to_string(),
        });
    }

    Ok(value)
}

fn normalize_gateway(gateway: &str) -> String {
    let trimmed = gateway.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn strip_scheme<'a>(s: &'a str, scheme: &str) -> Option<&'a str> {
    match s.get(..scheme.len()) {
        Some(head) if head.eq_ignore_ascii_case(scheme) => Some(&s[scheme.len()..]),
        _ => None,
    }
}
