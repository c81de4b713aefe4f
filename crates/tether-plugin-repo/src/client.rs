use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

const REPOSITORY_LIST_PATH: &str = "list";
const REPOSITORY_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 10_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryClientError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid repository response from {url}: {message}")]
    Parse { url: String, message: String },
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Listing served at `{repository}/list`.
pub struct PluginRepository {
    #[serde(default)]
    pub plugins: Vec<RepositoryPlugin>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryPlugin {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub binaries: Vec<PluginBinary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginBinary {
    pub platform: String,
    pub url: String,
    /// Hex-encoded SHA-256 of the binary.
    pub checksum: String,
}

/// Remote repository access. Implementations perform opaque I/O.
pub trait PluginRepositoryClient: Send + Sync {
    fn get_plugin_repository(&self, url: &str) -> Result<PluginRepository, RepositoryClientError>;
    /// Downloads `binary` and verifies its checksum before returning the bytes.
    fn download_plugin_binary(&self, binary: &PluginBinary)
        -> Result<Vec<u8>, RepositoryClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpPluginRepositoryClient {
    client: Client,
}

impl HttpPluginRepositoryClient {
    pub fn new() -> Result<Self, RepositoryClientError> {
        Self::with_timeout(Duration::from_millis(REPOSITORY_REQUEST_TIMEOUT_MS_DEFAULT))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, RepositoryClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RepositoryClientError::Request {
                url: String::new(),
                message: format!("failed to build repository client: {error}"),
            })?;
        Ok(Self { client })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, RepositoryClientError> {
        let response =
            self.client
                .get(url)
                .send()
                .map_err(|error| RepositoryClientError::Request {
                    url: url.to_string(),
                    message: error.to_string(),
                })?;
        if !response.status().is_success() {
            return Err(RepositoryClientError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|error| RepositoryClientError::Request {
                url: url.to_string(),
                message: error.to_string(),
            })
    }
}

impl PluginRepositoryClient for HttpPluginRepositoryClient {
    fn get_plugin_repository(&self, url: &str) -> Result<PluginRepository, RepositoryClientError> {
        let list_url = format!("{}/{}", url.trim_end_matches('/'), REPOSITORY_LIST_PATH);
        debug!(url = %list_url, "fetching plugin repository listing");
        let body = self.get_bytes(&list_url)?;
        serde_json::from_slice::<PluginRepository>(&body).map_err(|error| {
            RepositoryClientError::Parse {
                url: list_url,
                message: error.to_string(),
            }
        })
    }

    fn download_plugin_binary(
        &self,
        binary: &PluginBinary,
    ) -> Result<Vec<u8>, RepositoryClientError> {
        debug!(url = %binary.url, platform = %binary.platform, "downloading plugin binary");
        let bytes = self.get_bytes(&binary.url)?;
        verify_checksum(&binary.url, &bytes, &binary.checksum)?;
        Ok(bytes)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn verify_checksum(url: &str, bytes: &[u8], expected: &str) -> Result<(), RepositoryClientError> {
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(RepositoryClientError::ChecksumMismatch {
            url: url.to_string(),
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(())
}

/// Platform key used by repository listings for the running host.
pub fn current_platform() -> &'static str {
    match (std::env::consts::OS, cfg!(target_pointer_width = "64")) {
        ("linux", true) => "linux64",
        ("linux", false) => "linux32",
        ("macos", _) => "osx",
        ("windows", true) => "win64",
        ("windows", false) => "win32",
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn functional_get_plugin_repository_parses_listing() {
        let server = MockServer::start();
        let listing = server.mock(|when, then| {
            when.method(GET).path("/list");
            then.status(200).json_body(json!({
                "plugins": [{
                    "name": "echo",
                    "description": "echoes arguments",
                    "version": "1.0.0",
                    "binaries": [{"platform": "linux64", "url": "https://x/echo", "checksum": "abc"}]
                }]
            }));
        });

        let client = HttpPluginRepositoryClient::new().expect("client");
        let repository = client
            .get_plugin_repository(&server.base_url())
            .expect("listing");
        listing.assert();
        assert_eq!(repository.plugins.len(), 1);
        assert_eq!(repository.plugins[0].name, "echo");
        assert_eq!(repository.plugins[0].binaries[0].platform, "linux64");
    }

    #[test]
    fn regression_get_plugin_repository_reports_http_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/list");
            then.status(404);
        });

        let client = HttpPluginRepositoryClient::new().expect("client");
        let error = client
            .get_plugin_repository(&server.base_url())
            .expect_err("404 should fail");
        assert!(matches!(error, RepositoryClientError::Status { status: 404, .. }));
    }

    #[test]
    fn regression_get_plugin_repository_rejects_non_json() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/list");
            then.status(200).body("<html>not a repo</html>");
        });

        let client = HttpPluginRepositoryClient::new().expect("client");
        let error = client
            .get_plugin_repository(&server.base_url())
            .expect_err("html should fail");
        assert!(matches!(error, RepositoryClientError::Parse { .. }));
    }

    #[test]
    fn functional_download_plugin_binary_verifies_checksum() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bin/echo");
            then.status(200).body("binary-bytes");
        });
        let client = HttpPluginRepositoryClient::new().expect("client");

        let good = PluginBinary {
            platform: current_platform().to_string(),
            url: server.url("/bin/echo"),
            checksum: sha256_hex(b"binary-bytes").to_uppercase(),
        };
        assert_eq!(
            client.download_plugin_binary(&good).expect("download"),
            b"binary-bytes".to_vec()
        );

        let bad = PluginBinary {
            checksum: sha256_hex(b"other"),
            ..good
        };
        let error = client
            .download_plugin_binary(&bad)
            .expect_err("checksum mismatch");
        assert!(matches!(error, RepositoryClientError::ChecksumMismatch { .. }));
    }
}
