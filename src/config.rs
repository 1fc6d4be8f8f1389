use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::db::Source;
use crate::error::{Error, Result};

const DEFAULT_CONFIG_FILE: &str = "cesta";
const ENV_PREFIX: &str = "CESTA";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub raw_dir: PathBuf,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub server: ServerSettings,
    pub query: QuerySettings,
    pub procon: SourceSettings,
    pub dieese: SourceSettings,
    pub sidra: SourceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    pub default_limit: usize,
    pub max_limit: usize,
    pub default_cheapest: usize,
}

/// Where and how to collect one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub listing_url: String,
    /// Tried once when `listing_url` fails (SIDRA national-level table).
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub max_pages: u32,
    /// State attached to every record when labels name products rather than places.
    #[serde(default)]
    pub default_state: Option<String>,
    /// Documents downloaded on every run regardless of the listing.
    #[serde(default)]
    pub documents: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/prices.db"),
            raw_dir: PathBuf::from("raw"),
            user_agent: concat!("cesta_basica/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            query: QuerySettings {
                default_limit: 100,
                max_limit: 1000,
                default_cheapest: 3,
            },
            procon: SourceSettings {
                listing_url: "https://goias.gov.br/procon/categoria/noticias/".to_string(),
                fallback_url: None,
                keywords: vec![
                    "preço".to_string(),
                    "preços".to_string(),
                    "cesta básica".to_string(),
                ],
                max_pages: 121,
                default_state: Some("GO".to_string()),
                documents: vec![
                    "https://cdn.ueg.edu.br/source/universidade_estadual_de_goias_306/noticias/69505/ConjunturaSocioeconomica_PMCBA_Ano3_Numero12.pdf".to_string(),
                ],
            },
            dieese: SourceSettings {
                listing_url:
                    "https://www.dieese.org.br/analisecestabasica/analiseCestaBasicaAnteriores.html"
                        .to_string(),
                fallback_url: None,
                keywords: vec!["cesta básica".to_string()],
                max_pages: 1,
                default_state: None,
                documents: Vec::new(),
            },
            sidra: SourceSettings {
                listing_url: "https://apisidra.ibge.gov.br/values/t/1419/n3/52/v/63/p/last%2060"
                    .to_string(),
                fallback_url: Some(
                    "https://apisidra.ibge.gov.br/values/t/1419/n1/all/v/63/p/last%2060".to_string(),
                ),
                keywords: Vec::new(),
                max_pages: 1,
                default_state: Some("GO".to_string()),
                documents: Vec::new(),
            },
        }
    }
}

impl Settings {
    /// Defaults, then `cesta.toml` (or `path`), then `CESTA_*` variables (`__` nests).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn source(&self, source: Source) -> &SourceSettings {
        match source {
            Source::Procon => &self.procon,
            Source::Dieese => &self.dieese,
            Source::Sidra => &self.sidra,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| Error::InvalidRequest(format!("bad listen address: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_every_source() {
        let s = Settings::default();
        assert_eq!(s.source(Source::Procon).default_state.as_deref(), Some("GO"));
        assert!(s.source(Source::Dieese).listing_url.contains("dieese.org.br"));
        assert!(s.source(Source::Sidra).fallback_url.is_some());
        assert_eq!(s.query.default_cheapest, 3);
        assert_eq!(s.request_timeout_secs, 30);
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cesta.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "db_path = \"/tmp/other.db\"\n[server]\nport = 9001\n[procon]\nmax_pages = 2").unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(s.server.port, 9001);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.procon.max_pages, 2);
        assert!(s.procon.listing_url.contains("goias.gov.br"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn socket_addr_from_server_settings() {
        let s = Settings::default();
        assert_eq!(s.socket_addr().unwrap().port(), 8000);
    }
}
