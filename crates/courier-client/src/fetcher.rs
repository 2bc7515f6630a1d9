//! Host-list fetchers.
//!
//! A fetcher yields the `host:port` addresses of the hosts currently
//! announcing a service. The discovery loop polls it periodically; a
//! failed poll is logged and the previously known set stays in effect.

use std::path::PathBuf;

use async_trait::async_trait;
use courier_common::config::{Discovery, ServiceConfig};
use courier_common::transport::strip_scheme;
use courier_common::{CourierError, Result};

/// Source of the announcing hosts of one service.
#[async_trait]
pub trait HostsFetcher: Send + Sync {
    /// Returns the current `host:port` list.
    async fn fetch(&self) -> Result<Vec<String>>;
}

/// Parses host-list data: one host per line, `#` comments and blank lines
/// ignored, `tcp://` scheme optional, port defaulting to the control port.
pub fn parse_host_lines(data: &str, control_port: u16) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let host = strip_scheme(line);
            if host.contains(':') {
                host.to_string()
            } else {
                format!("{host}:{control_port}")
            }
        })
        .collect()
}

/// Reads the host list from a local file.
pub struct FileHostsFetcher {
    path: PathBuf,
    control_port: u16,
}

impl FileHostsFetcher {
    pub fn new(path: impl Into<PathBuf>, control_port: u16) -> Self {
        Self {
            path: path.into(),
            control_port,
        }
    }
}

#[async_trait]
impl HostsFetcher for FileHostsFetcher {
    async fn fetch(&self) -> Result<Vec<String>> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        Ok(parse_host_lines(&data, self.control_port))
    }
}

/// Fetches the host list from an HTTP endpoint serving the same line
/// format.
pub struct HttpHostsFetcher {
    url: String,
    control_port: u16,
    client: reqwest::Client,
}

impl HttpHostsFetcher {
    pub fn new(url: impl Into<String>, control_port: u16) -> Self {
        Self {
            url: url.into(),
            control_port,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HostsFetcher for HttpHostsFetcher {
    async fn fetch(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CourierError::Connection(format!("hosts fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CourierError::Connection(format!(
                "hosts fetch returned {}",
                response.status()
            )));
        }

        let data = response
            .text()
            .await
            .map_err(|e| CourierError::Connection(format!("hosts fetch failed: {e}")))?;

        Ok(parse_host_lines(&data, self.control_port))
    }
}

/// Builds the fetcher a service's configuration asks for.
pub fn build_fetcher(service: &ServiceConfig, control_port: u16) -> Box<dyn HostsFetcher> {
    match &service.discovery {
        Discovery::File { path } => Box::new(FileHostsFetcher::new(path.clone(), control_port)),
        Discovery::Http { url } => Box::new(HttpHostsFetcher::new(url.clone(), control_port)),
    }
}
