use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::currency::parse_locale_currency;
use crate::db::{NewPrice, Source};

/// Product name used when the labels in a document are places.
pub const BASKET_LABEL: &str = "Cesta Básica";

/// `<label> [(:-] R$ <token>` on a single line; the token is validated separately.
/// A numeric token stops at the first other character; a `/kg` style unit is consumed.
static INLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<label>\p{L}[\p{L}\d\s./%':-]*?)\s*[(:–-]?\s*R\$\s*(?P<value>\d[\d.,]*|[^\s)]*)(?:\s*/\s*\p{L}+)?")
        .unwrap()
});
/// Table row: label, whitespace, then a `d.ddd,dd` amount.
static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<label>\p{L}[\p{L}\d\s./()%'-]*?)\s+(?P<value>\d{1,3}(?:\.\d{3})*,\d{2})\b")
        .unwrap()
});
static FILE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4})\D?(\d{2})").unwrap());
static TEXT_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(janeiro|fevereiro|março|marco|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)[ \t]+(?:de[ \t]+)?(\d{4})\b")
        .unwrap()
});

/// Words trimmed off either end of a label ("O preço do Arroz" -> "Arroz").
const FILLER_WORDS: &[&str] = &[
    "a", "o", "as", "os", "e", "de", "da", "do", "das", "dos", "em", "na", "no", "nas", "nos",
    "para", "preço", "preços", "valor", "custo", "médio", "média", "foi", "custou", "era", "é",
];

/// What the label in front of a price names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelRole {
    /// City or state; the record is a whole-basket price.
    Location,
    Product,
}

impl LabelRole {
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::Dieese => LabelRole::Location,
            Source::Procon | Source::Sidra => LabelRole::Product,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub source: Source,
    pub role: LabelRole,
    pub state: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub prices: Vec<NewPrice>,
    pub discarded: usize,
}

/// First `yyyy[sep]mm` in a file stem that forms a real month.
pub fn date_from_file_name(stem: &str) -> Option<NaiveDate> {
    FILE_DATE_RE.captures_iter(stem).find_map(|caps| {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)
    })
}

/// First "<mês> de <aaaa>" phrase in the text.
pub fn date_from_text(text: &str) -> Option<NaiveDate> {
    TEXT_DATE_RE.captures_iter(text).find_map(|caps| {
        let month = month_number(&caps[1].to_lowercase())?;
        let year = caps[2].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)
    })
}

fn month_number(name: &str) -> Option<u32> {
    let n = match name {
        "janeiro" => 1,
        "fevereiro" => 2,
        "março" | "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(n)
}

/// Words allowed between capitalised words of a place name ("Rio de Janeiro").
const NAME_CONNECTORS: &[&str] = &["de", "da", "do", "das", "dos", "e"];

fn label_words(raw: &str) -> Vec<&str> {
    raw.split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ':' | '-' | '–' | ',')))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Drop filler words from both ends.
fn trim_filler(words: &[&str]) -> String {
    let is_filler = |w: &&str| FILLER_WORDS.contains(&w.to_lowercase().as_str());
    let start = words.iter().position(|w| !is_filler(w)).unwrap_or(words.len());
    let end = words.iter().rposition(|w| !is_filler(w)).map_or(start, |i| i + 1);
    words[start..end.max(start)].join(" ")
}

/// Trailing run of capitalised words ("o maior custo foi em São Paulo" -> "São Paulo").
fn place_name(words: &[&str]) -> Option<String> {
    let capitalised = |w: &str| w.chars().next().is_some_and(char::is_uppercase);
    let mut start = words.len();
    while start > 0 {
        let w = words[start - 1];
        if capitalised(w) || NAME_CONNECTORS.contains(&w.to_lowercase().as_str()) {
            start -= 1;
        } else {
            break;
        }
    }
    while start < words.len() && !capitalised(words[start]) {
        start += 1;
    }
    (start < words.len()).then(|| words[start..].join(" "))
}

fn clean_label(raw: &str, role: LabelRole) -> String {
    let words = label_words(raw);
    match role {
        LabelRole::Location => place_name(&words).unwrap_or_else(|| trim_filler(&words)),
        LabelRole::Product => trim_filler(&words),
    }
}

/// Find every price in `text`, in document order.
pub fn extract_prices(text: &str, meta: &DocumentMeta) -> Extraction {
    let mut out = Extraction::default();

    for line in text.lines() {
        if line.contains("R$") {
            let mut previous = String::new();
            for caps in INLINE_RE.captures_iter(line) {
                let mut label = clean_label(&caps["label"], meta.role);
                if label.is_empty() {
                    // "Arroz: de R$ 20,00 a R$ 30,00"
                    label.clone_from(&previous);
                }
                push_candidate(&mut out, meta, &label, &caps["value"]);
                previous = label;
            }
        } else if let Some(caps) = TABLE_RE.captures(line) {
            let label = clean_label(&caps["label"], meta.role);
            push_candidate(&mut out, meta, &label, &caps["value"]);
        }
    }
    out
}

/// `label` is already cleaned; an empty one drops the candidate.
fn push_candidate(out: &mut Extraction, meta: &DocumentMeta, label: &str, token: &str) {
    let label = label.to_string();
    let token = token.trim_end_matches(['.', ',', ';', ':']);
    if label.is_empty() {
        debug!(token, "price without a label dropped");
        out.discarded += 1;
        return;
    }
    let price = match parse_locale_currency(token) {
        Ok(p) => p,
        Err(e) => {
            debug!(%label, token, "unparsable price dropped: {}", e);
            out.discarded += 1;
            return;
        }
    };

    let (state, product) = match meta.role {
        LabelRole::Location => (Some(label), BASKET_LABEL.to_string()),
        LabelRole::Product => (meta.state.clone(), label),
    };
    out.prices.push(NewPrice {
        source: meta.source,
        state,
        date: meta.date,
        product,
        price,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dieese() -> DocumentMeta {
        DocumentMeta {
            source: Source::Dieese,
            role: LabelRole::Location,
            state: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
        }
    }

    fn procon() -> DocumentMeta {
        DocumentMeta {
            source: Source::Procon,
            role: LabelRole::Product,
            state: Some("GO".to_string()),
            date: None,
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn inline_city_prices() {
        let text = "Em março, o maior custo foi em São Paulo (R$ 791,29), seguido de Florianópolis (R$ 763,41).";
        let ex = extract_prices(text, &dieese());
        assert_eq!(ex.prices.len(), 2);
        assert_eq!(ex.prices[0].state.as_deref(), Some("São Paulo"));
        assert_eq!(ex.prices[0].product, BASKET_LABEL);
        assert_eq!(ex.prices[0].price, dec("791.29"));
        assert_eq!(ex.prices[1].state.as_deref(), Some("Florianópolis"));
        assert_eq!(ex.prices[1].date, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn table_rows() {
        let text = "Capital Valor Variação\nBrasília 467,65 2,49\nGoiânia 650,00 -1,02\nPorto Alegre 1.002,10 0,50\n";
        let ex = extract_prices(text, &dieese());
        let got: Vec<_> = ex
            .prices
            .iter()
            .map(|p| (p.state.clone().unwrap(), p.price.to_string()))
            .collect();
        assert_eq!(
            got,
            [
                ("Brasília".to_string(), "467.65".to_string()),
                ("Goiânia".to_string(), "650.00".to_string()),
                ("Porto Alegre".to_string(), "1002.10".to_string()),
            ]
        );
    }

    #[test]
    fn product_labels_take_default_state() {
        let text = "O preço do Arroz 5kg R$ 25,90 e do Feijão 1kg: R$ 8,99.";
        let ex = extract_prices(text, &procon());
        let got: Vec<_> = ex.prices.iter().map(|p| p.product.as_str()).collect();
        assert_eq!(got, ["Arroz 5kg", "Feijão 1kg"]);
        assert!(ex.prices.iter().all(|p| p.state.as_deref() == Some("GO")));
        assert_eq!(ex.prices[1].price, dec("8.99"));
    }

    #[test]
    fn whole_currency_units() {
        let ex = extract_prices("Cesta completa R$ 1.000", &procon());
        assert_eq!(ex.prices.len(), 1);
        assert_eq!(ex.prices[0].price.to_string(), "1000.00");
    }

    #[test]
    fn malformed_tokens_are_discarded() {
        let ex = extract_prices("Arroz R$ --\nFeijão R$ 8,99\nÓleo R$ 1,2,3", &procon());
        assert_eq!(ex.prices.len(), 1);
        assert_eq!(ex.prices[0].product, "Feijão");
        assert_eq!(ex.discarded, 2);
    }

    #[test]
    fn non_breaking_spaces_around_the_symbol() {
        for text in ["Arroz R$\u{a0}25,90", "Arroz\u{a0}R$ 25,90", "Arroz\u{a0}R$\u{a0}25,90"] {
            let ex = extract_prices(text, &procon());
            assert_eq!(ex.prices.len(), 1, "{text:?}");
            assert_eq!(ex.prices[0].product, "Arroz");
            assert_eq!(ex.prices[0].price, dec("25.90"));
            assert_eq!(ex.discarded, 0);
        }
    }

    #[test]
    fn unit_suffix_after_amount() {
        let ex = extract_prices("Arroz R$ 25,90/kg e Leite R$ 5,49 o litro", &procon());
        let got: Vec<_> = ex.prices.iter().map(|p| (p.product.as_str(), p.price)).collect();
        assert_eq!(got, [("Arroz", dec("25.90")), ("Leite", dec("5.49"))]);
        assert_eq!(ex.discarded, 0);
    }

    #[test]
    fn price_range_shares_the_label() {
        let ex = extract_prices("Arroz: de R$ 20,00 a R$ 30,00", &procon());
        let got: Vec<_> = ex.prices.iter().map(|p| (p.product.as_str(), p.price)).collect();
        assert_eq!(got, [("Arroz", dec("20.00")), ("Arroz", dec("30.00"))]);
        assert_eq!(ex.discarded, 0);
    }

    #[test]
    fn unlabeled_amounts_ignored() {
        let ex = extract_prices("R$ 10,00\n2024 467,65\n", &procon());
        assert!(ex.prices.is_empty());
    }

    #[test]
    fn missing_metadata_keeps_records() {
        let meta = DocumentMeta {
            source: Source::Dieese,
            role: LabelRole::Location,
            state: None,
            date: None,
        };
        let ex = extract_prices("Recife (R$ 560,00)", &meta);
        assert_eq!(ex.prices.len(), 1);
        assert!(ex.prices[0].date.is_none());
    }

    #[test]
    fn product_label_cleanup() {
        let p = LabelRole::Product;
        assert_eq!(clean_label("A cesta básica em Goiânia custou", p), "cesta básica em Goiânia");
        assert_eq!(clean_label("  Arroz tipo 1 - ", p), "Arroz tipo 1");
        assert_eq!(clean_label("o de", p), "");
    }

    #[test]
    fn place_label_cleanup() {
        let l = LabelRole::Location;
        assert_eq!(clean_label("o maior custo foi em São Paulo", l), "São Paulo");
        assert_eq!(clean_label("seguido de Florianópolis", l), "Florianópolis");
        assert_eq!(clean_label("Rio de Janeiro", l), "Rio de Janeiro");
        assert_eq!(clean_label("nas capitais", l), "capitais");
    }

    #[test]
    fn dates_from_file_names() {
        assert_eq!(date_from_file_name("relatorio_2024-03"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(date_from_file_name("cestabasica_202401"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(date_from_file_name("2024_99_2023_12"), NaiveDate::from_ymd_opt(2023, 12, 1));
        assert_eq!(date_from_file_name("Ano3_Numero12"), None);
    }

    #[test]
    fn dates_from_text() {
        assert_eq!(
            date_from_text("Pesquisa realizada em Março de 2024 nas capitais"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(date_from_text("dezembro 2023"), NaiveDate::from_ymd_opt(2023, 12, 1));
        assert_eq!(date_from_text("sem data"), None);
    }
}
