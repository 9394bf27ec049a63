//! Candidate sources and `host:port` extraction.

use async_trait::async_trait;
use log::warn;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

use crate::endpoint::EndpointKey;
use crate::error::SourceError;

static IP_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[0-9]{1,3}\.){3}[0-9]{1,3}):([0-9]+)").expect("valid ip:port pattern")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<br>|\r|\n").expect("valid line break pattern"));

/// Supplies raw candidate text lines.
#[async_trait]
pub trait Source: Send + Sync {
    /// Human readable identifier, used in logs.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<String>, SourceError>;
}

/// A proxy list served over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: Url,
    client: Client,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            url: Url::parse(url)?,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch(&self) -> Result<Vec<String>, SourceError> {
        let content = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(split_lines(&content))
    }
}

/// A proxy list stored in a local file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<String>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(split_lines(&content))
    }
}

/// Build sources from identifiers: anything starting with "http" is fetched, the rest are files.
pub fn sources_from_config(identifiers: &[String]) -> Vec<Box<dyn Source>> {
    identifiers
        .iter()
        .filter_map(|id| -> Option<Box<dyn Source>> {
            if id.starts_with("http") {
                match HttpSource::new(id) {
                    Ok(source) => Some(Box::new(source)),
                    Err(e) => {
                        warn!("Skipping source {}: {}", id, e);
                        None
                    }
                }
            } else {
                Some(Box::new(FileSource::new(id)))
            }
        })
        .collect()
}

/// Split raw source content on newlines, carriage returns and `<br>` tags.
pub fn split_lines(content: &str) -> Vec<String> {
    LINE_BREAK
        .split(content)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract the first `ip:port` pair of every line. Lines without one are skipped.
pub fn parse_candidates<S: AsRef<str>>(lines: &[S]) -> HashSet<EndpointKey> {
    lines
        .iter()
        .filter_map(|line| {
            let caps = IP_PORT.captures(line.as_ref())?;
            let port = caps[2].parse().ok()?;
            Some(EndpointKey::new(&caps[1], port))
        })
        .collect()
}
