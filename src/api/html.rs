use html_escape::encode_text;

use crate::currency::format_locale_currency;
use crate::db::PriceRecord;

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;color:#222}\
table{border-collapse:collapse;margin-bottom:2rem}\
th,td{border:1px solid #ccc;padding:.3rem .6rem;text-align:left}\
td.price{text-align:right}th{background:#eee}";

/// The single page served at `/`: the stored records followed by the cheapest ones.
pub fn render_page(records: &[PriceRecord], cheapest: &[PriceRecord]) -> String {
    let mut out = String::with_capacity(2048 + records.len() * 160);
    out.push_str("<!DOCTYPE html>\n<html lang=\"pt-BR\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<title>Preços da cesta básica</title>\n");
    out.push_str(&format!("<style>{}</style>\n</head>\n<body>\n", STYLE));
    out.push_str("<h1>Preços da cesta básica</h1>\n");

    out.push_str("<h2>Registros</h2>\n");
    push_table(&mut out, records);
    out.push_str("<h2>Mais baratos</h2>\n");
    push_table(&mut out, cheapest);

    out.push_str("</body>\n</html>\n");
    out
}

fn push_table(out: &mut String, records: &[PriceRecord]) {
    if records.is_empty() {
        out.push_str("<p>Nenhum preço registrado.</p>\n");
        return;
    }
    out.push_str(
        "<table>\n<tr><th>#</th><th>Fonte</th><th>Estado</th><th>Data</th><th>Produto</th><th>Preço</th></tr>\n",
    );
    for r in records {
        let date = r
            .date
            .map(|d| d.format("%m/%Y").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"price\">{}</td></tr>\n",
            r.id,
            r.source,
            encode_text(r.state.as_deref().unwrap_or("")),
            date,
            encode_text(&r.product),
            encode_text(&format_locale_currency(r.price)),
        ));
    }
    out.push_str("</table>\n");
}
