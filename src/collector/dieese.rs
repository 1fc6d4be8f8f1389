use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use tracing::{info, warn};

use super::links::{self, Anchor};
use super::{CollectReport, Collector};
use crate::config::SourceSettings;
use crate::db::Source;
use crate::error::{Error, Result};

static ANALYSIS_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)analiseCestaBasica\d{6}\.html").unwrap());
static YEAR_DIR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}/$").unwrap());

/// Monthly analysis pages, per-year directories, or anything mentioning a keyword.
fn is_followed(anchor: &Anchor, keywords: &[String]) -> bool {
    if links::is_pdf(&anchor.url) {
        return false;
    }
    ANALYSIS_PAGE_RE.is_match(&anchor.href)
        || YEAR_DIR_RE.is_match(&anchor.href)
        || links::matches_keywords(anchor, keywords)
}

pub async fn collect(
    collector: &Collector,
    cfg: &SourceSettings,
    report: &mut CollectReport,
) -> Result<()> {
    let base = Url::parse(&cfg.listing_url)
        .map_err(|e| Error::Parse(format!("{}: {}", cfg.listing_url, e)))?;
    let html = collector.fetch_text(base.as_str()).await?;

    let (pages, mut pdfs) = split_listing(&html, &base, &cfg.keywords);
    info!("{} sub-pages, {} direct documents", pages.len(), pdfs.len());

    for page in pages {
        match collector.fetch_text(page.as_str()).await {
            Ok(sub) => pdfs.extend(links::pdf_links(&sub, &page)),
            Err(e) => {
                warn!("sub-page {} failed: {}", page, e);
                report.failures += 1;
            }
        }
    }

    info!("{} documents found", pdfs.len());
    for pdf in pdfs {
        let result = collector.download(Source::Dieese, pdf.as_str()).await;
        report.record(pdf.as_str(), result);
    }
    Ok(())
}

/// Pages to follow and documents linked straight from the listing.
fn split_listing(html: &str, base: &Url, keywords: &[String]) -> (BTreeSet<Url>, BTreeSet<Url>) {
    let mut pages = BTreeSet::new();
    let mut pdfs = BTreeSet::new();
    for anchor in links::anchors(html, base) {
        if links::is_pdf(&anchor.url) {
            pdfs.insert(anchor.url);
        } else if is_followed(&anchor, keywords) && anchor.url != *base {
            pages.insert(anchor.url);
        }
    }
    (pages, pdfs)
}
