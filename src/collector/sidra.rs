use tracing::{info, warn};

use super::{CollectReport, Collector};
use crate::config::SourceSettings;
use crate::db::Source;
use crate::error::{Error, Result};

pub const SNAPSHOT_NAME: &str = "ipca.json";

/// Fetch the IPCA table, falling back to the national-level query when the state one fails.
pub async fn collect(
    collector: &Collector,
    cfg: &SourceSettings,
    report: &mut CollectReport,
) -> Result<()> {
    let body = match fetch_table(collector, &cfg.listing_url).await {
        Ok(body) => body,
        Err(e) => {
            let Some(fallback) = cfg.fallback_url.as_deref() else {
                return Err(e);
            };
            warn!("state-level table failed ({}), trying {}", e, fallback);
            report.failures += 1;
            fetch_table(collector, fallback).await?
        }
    };

    let result = collector.save(Source::Sidra, SNAPSHOT_NAME, body.as_bytes()).await;
    report.record(SNAPSHOT_NAME, result);
    Ok(())
}

/// GET the endpoint and check it answered with a JSON array of rows.
async fn fetch_table(collector: &Collector, url: &str) -> Result<String> {
    let body = collector.fetch_text(url).await?;
    let rows = row_count(&body)?;
    info!("{} rows from {}", rows, url);
    Ok(body)
}

fn row_count(body: &str) -> Result<usize> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("sidra response: {}", e)))?;
    value
        .as_array()
        .map(|rows| rows.len())
        .ok_or_else(|| Error::Parse("sidra response is not a list of rows".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::{http::StatusCode, routing::get, Router};

    #[test]
    fn row_count_requires_json_array() {
        assert_eq!(row_count(r#"[{"V":"0.5"},{"V":"0.3"}]"#).unwrap(), 2);
        assert!(row_count(r#"{"erro":"nivel"}"#).is_err());
        assert!(row_count("Tabela inexistente").is_err());
    }

    #[tokio::test]
    async fn falls_back_to_national_table() {
        let app = Router::new()
            .route("/n3", get(|| async { (StatusCode::BAD_REQUEST, "nível territorial inválido") }))
            .route("/n1", get(|| async { r#"[{"NC":"Nível"},{"V":"4.62"}]"# }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let raw = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.raw_dir = raw.path().to_path_buf();
        settings.sidra.listing_url = format!("http://{}/n3", addr);
        settings.sidra.fallback_url = Some(format!("http://{}/n1", addr));

        let collector = Collector::new(&settings).unwrap();
        let report = collector.collect(Source::Sidra).await.unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures, 1);
        let saved = std::fs::read_to_string(&report.documents[0]).unwrap();
        assert!(saved.contains("4.62"));
    }
}
