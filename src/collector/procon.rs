use std::collections::BTreeSet;

use reqwest::Url;
use tracing::{info, warn};

use super::links;
use super::{CollectReport, Collector};
use crate::config::SourceSettings;
use crate::db::Source;
use crate::error::{Error, Result};

/// `<listing>` for the first page, `<listing>page/<n>/` after that.
pub fn listing_page_url(listing: &str, page: u32) -> String {
    if page <= 1 {
        listing.to_string()
    } else {
        format!("{}/page/{}/", listing.trim_end_matches('/'), page)
    }
}

pub async fn collect(
    collector: &Collector,
    cfg: &SourceSettings,
    report: &mut CollectReport,
) -> Result<()> {
    let posts = discover_posts(collector, cfg, report).await?;
    info!("{} matching posts", posts.len());

    for post in posts {
        collect_post(collector, cfg, &post, report).await;
    }
    Ok(())
}

/// Walk the news listing and keep post links whose text or URL mentions a keyword.
async fn discover_posts(
    collector: &Collector,
    cfg: &SourceSettings,
    report: &mut CollectReport,
) -> Result<BTreeSet<Url>> {
    let mut posts = BTreeSet::new();
    let mut fetched = 0usize;

    for page in 1..=cfg.max_pages.max(1) {
        let page_url = listing_page_url(&cfg.listing_url, page);
        let base = Url::parse(&page_url).map_err(|e| Error::Parse(format!("{}: {}", page_url, e)))?;
        let html = match collector.fetch_text(&page_url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("listing page {} failed: {}", page_url, e);
                report.failures += 1;
                continue;
            }
        };
        fetched += 1;

        posts.extend(
            links::anchors(&html, &base)
                .into_iter()
                .filter(|a| links::matches_keywords(a, &cfg.keywords))
                .filter(|a| !links::is_pdf(&a.url))
                .map(|a| a.url),
        );
    }

    if fetched == 0 {
        return Err(Error::Network(format!(
            "no listing page of {} could be fetched",
            cfg.listing_url
        )));
    }
    Ok(posts)
}

/// Download the post's PDFs, or keep its price paragraphs when it links none.
async fn collect_post(
    collector: &Collector,
    cfg: &SourceSettings,
    post: &Url,
    report: &mut CollectReport,
) {
    let html = match collector.fetch_text(post.as_str()).await {
        Ok(html) => html,
        Err(e) => {
            report.record(post.as_str(), Err(e));
            return;
        }
    };

    let pdfs = links::pdf_links(&html, post);
    if pdfs.is_empty() {
        let blocks = links::keyword_blocks(&html, &cfg.keywords);
        if blocks.is_empty() {
            return;
        }
        let name = links::fragment_name(post);
        let result = collector
            .save(Source::Procon, &name, blocks.join("\n\n").as_bytes())
            .await;
        report.record(post.as_str(), result);
        return;
    }

    for pdf in pdfs {
        let result = collector.download(Source::Procon, pdf.as_str()).await;
        report.record(pdf.as_str(), result);
    }
}
