pub mod dieese;
pub mod links;
pub mod procon;
pub mod sidra;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::Source;
use crate::error::{Error, Result};

/// Outcome of one collection run.
#[derive(Debug)]
pub struct CollectReport {
    pub source: Source,
    pub documents: Vec<PathBuf>,
    pub failures: usize,
}

impl CollectReport {
    fn new(source: Source) -> Self {
        Self {
            source,
            documents: Vec::new(),
            failures: 0,
        }
    }

    /// Keep a stored document, or log and count a failed entry.
    fn record(&mut self, what: &str, result: Result<PathBuf>) {
        match result {
            Ok(path) => {
                if !self.documents.contains(&path) {
                    self.documents.push(path);
                }
            }
            Err(e) => {
                warn!(source = %self.source, "skipping {}: {}", what, e);
                self.failures += 1;
            }
        }
    }
}

/// Fetches listings and documents, storing them under `<raw_dir>/<source>/<yyyy-mm-dd>/`.
pub struct Collector {
    client: Client,
    settings: Settings,
    retrieved_on: Option<NaiveDate>,
}

impl Collector {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            settings: settings.clone(),
            retrieved_on: None,
        })
    }

    /// Pin the retrieval date used for the raw directory name.
    #[cfg(test)]
    pub fn with_retrieval_date(mut self, date: NaiveDate) -> Self {
        self.retrieved_on = Some(date);
        self
    }

    pub async fn collect(&self, source: Source) -> Result<CollectReport> {
        let cfg = self.settings.source(source);
        let mut report = CollectReport::new(source);
        info!(%source, listing = %cfg.listing_url, "collecting");

        match source {
            Source::Procon => procon::collect(self, cfg, &mut report).await?,
            Source::Dieese => dieese::collect(self, cfg, &mut report).await?,
            Source::Sidra => sidra::collect(self, cfg, &mut report).await?,
        }

        for url in &cfg.documents {
            let result = self.download(source, url).await;
            report.record(url, result);
        }

        info!(
            %source,
            documents = report.documents.len(),
            failures = report.failures,
            "collection finished"
        );
        Ok(report)
    }

    pub fn day_dir(&self, source: Source) -> PathBuf {
        let day = self.retrieved_on.unwrap_or_else(|| Local::now().date_naive());
        self.settings
            .raw_dir
            .join(source.as_str())
            .join(day.format("%Y-%m-%d").to_string())
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response)
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        Ok(self.fetch(url).await?.text().await?)
    }

    /// Download a linked document unless it is already stored for today.
    pub async fn download(&self, source: Source, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url).map_err(|e| Error::Parse(format!("{}: {}", url, e)))?;
        let name = links::file_name(&parsed)
            .ok_or_else(|| Error::Parse(format!("no file name in {}", url)))?;
        let target = self.day_dir(source).join(name);
        if target.exists() {
            debug!("already stored: {}", target.display());
            return Ok(target);
        }

        let bytes = self.fetch(url).await?.bytes().await?;
        store(&target, &bytes).await?;
        info!("downloaded {} ({} bytes)", target.display(), bytes.len());
        Ok(target)
    }

    /// Store a file built from page content (HTML fragments, API responses).
    pub async fn save(&self, source: Source, name: &str, content: &[u8]) -> Result<PathBuf> {
        let target = self.day_dir(source).join(name);
        store(&target, content).await?;
        info!("saved {}", target.display());
        Ok(target)
    }
}

async fn store(target: &Path, content: &[u8]) -> Result<()> {
    if let Some(dir) = target.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(target, content).await?;
    Ok(())
}
