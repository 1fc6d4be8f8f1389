use std::collections::BTreeSet;
use std::sync::LazyLock;

use reqwest::Url;
use scraper::{Html, Selector};

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static BLOCK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, table, ul").unwrap());

/// An `<a href>` found on a page, resolved against the page URL.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub href: String,
    pub url: Url,
    pub text: String,
}

/// Resolve `href` against `base`; drops non-http(s) targets and in-page fragments.
pub fn normalize_url(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_lowercase();
    if ["mailto:", "javascript:", "tel:"].iter().any(|p| lower.starts_with(p)) {
        return None;
    }

    let url = if let Some(rest) = href.strip_prefix("//") {
        Url::parse(&format!("https://{}", rest)).ok()?
    } else {
        base.join(href).ok()?
    };
    matches!(url.scheme(), "http" | "https").then_some(url)
}

pub fn anchors(html: &str, base: &Url) -> Vec<Anchor> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR_SELECTOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = normalize_url(href, base)?;
            let text = collapse_whitespace(&a.text().collect::<Vec<_>>().join(" "));
            Some(Anchor {
                href: href.trim().to_string(),
                url,
                text,
            })
        })
        .collect()
}

/// Case-insensitive substring match against the anchor text or its URL.
/// Multi-word keywords also match their hyphenated slug form (`cesta-basica` style URLs).
pub fn matches_keywords(anchor: &Anchor, keywords: &[String]) -> bool {
    let text = anchor.text.to_lowercase();
    let url = anchor.url.as_str().to_lowercase();
    keywords.iter().any(|kw| {
        let kw = kw.to_lowercase();
        text.contains(&kw) || url.contains(&kw) || url.contains(&kw.replace(' ', "-"))
    })
}

pub fn is_pdf(url: &Url) -> bool {
    url.path().to_lowercase().ends_with(".pdf")
}

/// Distinct PDF targets on the page, however often each is linked.
pub fn pdf_links(html: &str, base: &Url) -> BTreeSet<Url> {
    anchors(html, base)
        .into_iter()
        .map(|a| a.url)
        .filter(is_pdf)
        .collect()
}

/// Outer HTML of the `<p>`, `<table>` and `<ul>` blocks mentioning any keyword.
pub fn keyword_blocks(html: &str, keywords: &[String]) -> Vec<String> {
    let doc = Html::parse_document(html);
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    doc.select(&BLOCK_SELECTOR)
        .filter(|el| {
            let text = el.text().collect::<String>().to_lowercase();
            keywords.iter().any(|k| text.contains(k))
        })
        .map(|el| el.html())
        .collect()
}

/// Last non-empty path segment, used as the stored file name.
pub fn file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// `/procon/noticia/cesta-basica/` -> `procon_noticia_cesta-basica.html`
pub fn fragment_name(url: &Url) -> String {
    let stem = url.path().trim_matches('/').replace('/', "_");
    if stem.is_empty() {
        format!("{}.html", url.host_str().unwrap_or("index"))
    } else {
        format!("{}.html", stem)
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
