use std::path::Path;
use std::sync::LazyLock;

use lopdf::Document;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const LINE_ELEMENTS: &[&str] = &[
    "p", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "caption",
];
static LINE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(&LINE_ELEMENTS.join(", ")).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Html,
    Text,
}

impl DocumentKind {
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "html" | "htm" => Some(DocumentKind::Html),
            "txt" => Some(DocumentKind::Text),
            _ => None,
        }
    }
}

/// Plain text of a stored document; PDF pages come out in page order.
pub fn load_text(path: &Path) -> Result<String> {
    let kind = DocumentKind::of(path)
        .ok_or_else(|| Error::Unsupported(path.display().to_string()))?;
    match kind {
        DocumentKind::Pdf => pdf_text(path),
        DocumentKind::Html => {
            let bytes = std::fs::read(path)?;
            Ok(html_text(&String::from_utf8_lossy(&bytes)))
        }
        DocumentKind::Text => {
            let bytes = std::fs::read(path)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn pdf_text(path: &Path) -> Result<String> {
    let doc = Document::load(path)?;
    let pages = doc.get_pages();
    debug!("{}: {} pages", path.display(), pages.len());

    let mut text = Vec::with_capacity(pages.len());
    for page in pages.keys() {
        match doc.extract_text(&[*page]) {
            Ok(t) => text.push(t),
            Err(e) => warn!("{}: page {} unreadable: {}", path.display(), page, e),
        }
    }
    Ok(text.join("\n"))
}

/// One line per block element (table rows keep their cells on one line).
pub fn html_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let lines: Vec<String> = doc
        .select(&LINE_SELECTOR)
        .filter(|el| !inside_line_element(el))
        .map(|el| collapse(el.text()))
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        collapse(doc.root_element().text())
    } else {
        lines.join("\n")
    }
}

fn inside_line_element(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| LINE_ELEMENTS.contains(&a.value().name()))
}

fn collapse<'a>(pieces: impl Iterator<Item = &'a str>) -> String {
    pieces
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
