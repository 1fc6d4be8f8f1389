pub mod document;
pub mod prices;

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::db::{PriceRepository, Source};
use crate::error::{Error, Result};
use document::DocumentKind;
use prices::{DocumentMeta, Extraction, LabelRole};

const CHUNK_SIZE: usize = 64;

/// Counts reported after a batch of documents went through extraction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExtractSummary {
    pub processed: usize,
    pub inserted: usize,
    pub discarded: usize,
    pub skipped: usize,
}

/// Supported documents under `<raw_dir>/<source>/`, sorted by path.
pub fn discover_documents(raw_dir: &Path, source: Source) -> Vec<PathBuf> {
    let root = raw_dir.join(source.as_str());
    let mut docs: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| DocumentKind::of(p).is_some())
        .collect();
    docs.sort();
    docs
}

/// Metadata taken from the file name and settings, with the text as a date fallback.
pub fn document_meta(path: &Path, text: &str, source: Source, settings: &Settings) -> DocumentMeta {
    let date = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(prices::date_from_file_name)
        .or_else(|| prices::date_from_text(text));
    if date.is_none() {
        debug!("{}: no reference date", path.display());
    }
    DocumentMeta {
        source,
        role: LabelRole::for_source(source),
        state: settings.source(source).default_state.clone(),
        date,
    }
}

/// Read one document and match its prices; nothing is stored.
pub fn extract_document(path: &Path, source: Source, settings: &Settings) -> Result<Extraction> {
    let text = document::load_text(path)?;
    let meta = document_meta(path, &text, source, settings);
    Ok(prices::extract_prices(&text, &meta))
}

/// Extract every document and append the prices to the table.
///
/// Documents are parsed in parallel and inserted one record at a time, in path order.
/// There is no duplicate check: running twice over the same files inserts the rows twice.
pub fn process_documents(
    repo: &dyn PriceRepository,
    settings: &Settings,
    source: Source,
    paths: &[PathBuf],
    pb: &ProgressBar,
) -> Result<ExtractSummary> {
    let mut summary = ExtractSummary::default();

    for chunk in paths.chunks(CHUNK_SIZE) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|p| (p, extract_document(p, source, settings)))
            .collect();

        for (path, result) in results {
            pb.inc(1);
            let extraction = match result {
                Ok(ex) => ex,
                Err(Error::Unsupported(_)) => {
                    debug!("not a price document: {}", path.display());
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    summary.skipped += 1;
                    continue;
                }
            };

            summary.processed += 1;
            summary.discarded += extraction.discarded;
            for price in &extraction.prices {
                repo.insert(price)?;
                summary.inserted += 1;
            }
            debug!(
                "{}: {} prices, {} discarded",
                path.display(),
                extraction.prices.len(),
                extraction.discarded
            );
        }
    }

    info!(
        %source,
        processed = summary.processed,
        inserted = summary.inserted,
        discarded = summary.discarded,
        skipped = summary.skipped,
        "extraction finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRepository;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from("tests/fixtures").join(name)
    }

    fn run(repo: &SqliteRepository, source: Source, paths: &[PathBuf]) -> ExtractSummary {
        process_documents(repo, &Settings::default(), source, paths, &ProgressBar::hidden()).unwrap()
    }

    #[test]
    fn dieese_report_fixture() {
        let repo = SqliteRepository::in_memory().unwrap();
        let summary = run(&repo, Source::Dieese, &[fixture("dieese_202403.txt")]);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.inserted, 5);
        assert_eq!(summary.discarded, 1);

        let rows = repo.list(10, 0).unwrap();
        assert_eq!(rows[0].state.as_deref(), Some("São Paulo"));
        assert_eq!(rows[0].price, Decimal::from_str("791.29").unwrap());
        assert!(rows.iter().all(|r| r.product == prices::BASKET_LABEL));
        assert!(rows.iter().all(|r| r.date == NaiveDate::from_ymd_opt(2024, 3, 1)));

        let cheapest = repo.cheapest(1).unwrap();
        assert_eq!(cheapest[0].state.as_deref(), Some("Aracaju"));
    }

    #[test]
    fn procon_fragment_fixture() {
        let repo = SqliteRepository::in_memory().unwrap();
        let summary = run(&repo, Source::Procon, &[fixture("procon_cesta-basica-marco.html")]);
        assert_eq!(summary.inserted, 3);

        let rows = repo.list(10, 0).unwrap();
        let products: Vec<_> = rows.iter().map(|r| r.product.as_str()).collect();
        assert_eq!(products, ["Arroz tipo 1 (5kg)", "Feijão carioca (1kg)", "Café em pó"]);
        assert!(rows.iter().all(|r| r.state.as_deref() == Some("GO")));
        // no yyyymm in the file name, so the date comes from the text
        assert!(rows.iter().all(|r| r.date == NaiveDate::from_ymd_opt(2024, 3, 1)));
    }

    #[test]
    fn rerun_duplicates_rows() {
        let repo = SqliteRepository::in_memory().unwrap();
        let docs = [fixture("dieese_202403.txt")];
        let first = run(&repo, Source::Dieese, &docs);
        let second = run(&repo, Source::Dieese, &docs);
        assert_eq!(first.inserted, second.inserted);
        assert_eq!(repo.stats().unwrap().total, first.inserted * 2);

        let rows = repo.list(100, 0).unwrap();
        let (a, b) = rows.split_at(first.inserted);
        for (x, y) in a.iter().zip(b) {
            assert_ne!(x.id, y.id);
            assert_eq!((&x.state, x.price), (&y.state, y.price));
        }
    }

    #[test]
    fn unreadable_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("relatorio_202401.pdf");
        std::fs::write(&broken, b"not a pdf").unwrap();
        let json = dir.path().join("ipca.json");
        std::fs::write(&json, b"[]").unwrap();

        let repo = SqliteRepository::in_memory().unwrap();
        let summary = run(&repo, Source::Procon, &[broken, json, fixture("dieese_202403.txt")]);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.processed, 1);
        assert!(summary.inserted > 0);
    }

    #[test]
    fn pdf_documents_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("cestabasica_202402.pdf");
        document::tests::write_pdf(&pdf, &["Brasilia (R$ 467,65)", "Goiania (R$ 650,00)"]);

        let repo = SqliteRepository::in_memory().unwrap();
        let summary = run(&repo, Source::Dieese, &[pdf]);
        assert_eq!(summary.inserted, 2);
        let rows = repo.list(10, 0).unwrap();
        assert_eq!(rows[0].state.as_deref(), Some("Brasilia"));
        assert_eq!(rows[1].price.to_string(), "650.00");
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 2, 1));
    }

    #[test]
    fn discovery_filters_by_source_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("dieese").join("2026-10-17");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(day.join("b_202402.pdf"), b"").unwrap();
        std::fs::write(day.join("a_202401.txt"), b"").unwrap();
        std::fs::write(day.join("notes.json"), b"").unwrap();
        std::fs::create_dir_all(dir.path().join("procon")).unwrap();
        std::fs::write(dir.path().join("procon").join("x.pdf"), b"").unwrap();

        let docs = discover_documents(dir.path(), Source::Dieese);
        let names: Vec<_> = docs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a_202401.txt", "b_202402.pdf"]);
        assert!(discover_documents(dir.path(), Source::Sidra).is_empty());
    }
}
