//! State document transports: local file or HTTP endpoint
//!
//! Reads return `None` when the location does not exist yet (missing file,
//! HTTP 404); everything else is a transport error. Writes are synchronous
//! and complete before the caller continues.

use std::path::PathBuf;

use crate::common::fs;
use crate::error::{CdfError, Result};

/// Where the state document lives
#[derive(Debug, Clone)]
pub enum Transport {
    File(PathBuf),
    Http(String),
}

impl Transport {
    /// Parse a state URI; only `file://`, `http://` and `https://` are valid
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(Transport::File(PathBuf::from(path)));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Transport::Http(uri.to_string()));
        }
        Err(CdfError::StateUnsupportedScheme {
            uri: uri.to_string(),
        })
    }

    /// Canonical URI for diagnostics
    pub fn uri(&self) -> String {
        match self {
            Transport::File(path) => format!("file://{}", path.display()),
            Transport::Http(url) => url.clone(),
        }
    }

    /// Fetch the raw document, `None` when absent
    pub fn read(&self) -> Result<Option<String>> {
        match self {
            Transport::File(path) => {
                if !path.is_file() {
                    return Ok(None);
                }
                fs::read_content(path).map(Some)
            }
            Transport::Http(url) => {
                let response = reqwest::blocking::get(url).map_err(|e| {
                    CdfError::StateTransport {
                        uri: url.clone(),
                        reason: e.to_string(),
                    }
                })?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(CdfError::StateTransport {
                        uri: url.clone(),
                        reason: format!("unexpected status {}", response.status()),
                    });
                }
                response.text().map(Some).map_err(|e| CdfError::StateTransport {
                    uri: url.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Persist the raw document
    pub fn write(&self, content: &str) -> Result<()> {
        match self {
            Transport::File(path) => fs::write_content(path, content),
            Transport::Http(url) => {
                let client = reqwest::blocking::Client::new();
                let response = client
                    .put(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(content.to_string())
                    .send()
                    .map_err(|e| CdfError::StateTransport {
                        uri: url.clone(),
                        reason: e.to_string(),
                    })?;
                if !response.status().is_success() {
                    return Err(CdfError::StateTransport {
                        uri: url.clone(),
                        reason: format!("unexpected status {}", response.status()),
                    });
                }
                Ok(())
            }
        }
    }
}
