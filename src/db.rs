use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::PRICE_SCALE;
use crate::error::{Error, Result};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS basket_prices (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            source   TEXT NOT NULL,
            state    TEXT,
            date     TEXT,
            product  TEXT NOT NULL,
            price    REAL NOT NULL CHECK(price >= 0)
        );
        CREATE INDEX IF NOT EXISTS idx_prices_price ON basket_prices(price);
        CREATE INDEX IF NOT EXISTS idx_prices_source ON basket_prices(source);
        ",
    )?;
    Ok(())
}

// ── Records ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Procon,
    Dieese,
    Sidra,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Procon, Source::Dieese, Source::Sidra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Procon => "procon",
            Source::Dieese => "dieese",
            Source::Sidra => "sidra",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Source::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidRequest(format!("unknown source {:?}", s)))
    }
}

impl ToSql for Source {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Source {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse().map_err(|_: Error| FromSqlError::InvalidType)
    }
}

/// One stored basket price observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub id: i64,
    pub source: Source,
    pub state: Option<String>,
    pub date: Option<NaiveDate>,
    pub product: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// A record as produced by the extractor, before the table assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrice {
    pub source: Source,
    pub state: Option<String>,
    pub date: Option<NaiveDate>,
    pub product: String,
    pub price: Decimal,
}

const SELECT_COLUMNS: &str = "SELECT id, source, state, date, product, price FROM basket_prices";

fn map_record(row: &Row<'_>) -> rusqlite::Result<PriceRecord> {
    let raw: f64 = row.get(5)?;
    let mut price = Decimal::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Real, Box::new(e)))?
        .round_dp(PRICE_SCALE);
    price.rescale(PRICE_SCALE);
    Ok(PriceRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        state: row.get(2)?,
        date: row.get(3)?,
        product: row.get(4)?,
        price,
    })
}

// ── Repository ──

pub struct Stats {
    pub total: usize,
    pub by_source: Vec<(Source, usize)>,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

/// Storage seam used by the extractor and the API handlers.
pub trait PriceRepository: Send + Sync {
    fn insert(&self, price: &NewPrice) -> Result<i64>;
    /// Records in insertion order.
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<PriceRecord>>;
    /// Lowest prices first, ties by ascending id.
    fn cheapest(&self, n: usize) -> Result<Vec<PriceRecord>>;
    fn get_by_id(&self, id: i64) -> Result<Option<PriceRecord>>;
    fn stats(&self) -> Result<Stats>;
    /// Delete every row; returns how many were removed.
    fn clear(&self) -> Result<usize>;
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = connect(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PriceRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, map_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl PriceRepository for SqliteRepository {
    fn insert(&self, p: &NewPrice) -> Result<i64> {
        let price = p
            .price
            .to_f64()
            .ok_or_else(|| Error::Parse(format!("price {} not representable", p.price)))?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO basket_prices (source, state, date, product, price)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![p.source, p.state, p.date, p.product, price],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<PriceRecord>> {
        self.query(
            &format!("{} ORDER BY id ASC LIMIT ?1 OFFSET ?2", SELECT_COLUMNS),
            params![limit as i64, offset as i64],
        )
    }

    fn cheapest(&self, n: usize) -> Result<Vec<PriceRecord>> {
        self.query(
            &format!("{} ORDER BY price ASC, id ASC LIMIT ?1", SELECT_COLUMNS),
            params![n as i64],
        )
    }

    fn get_by_id(&self, id: i64) -> Result<Option<PriceRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                map_record,
            )
            .optional()?;
        Ok(record)
    }

    fn stats(&self) -> Result<Stats> {
        let conn = self.conn();
        let total: usize = conn.query_row("SELECT COUNT(*) FROM basket_prices", [], |r| r.get(0))?;
        let (earliest, latest) = conn.query_row(
            "SELECT MIN(date), MAX(date) FROM basket_prices",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let mut stmt = conn.prepare(
            "SELECT source, COUNT(*) FROM basket_prices GROUP BY source ORDER BY source",
        )?;
        let by_source = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Stats {
            total,
            by_source,
            earliest,
            latest,
        })
    }

    fn clear(&self) -> Result<usize> {
        let removed = self.conn().execute("DELETE FROM basket_prices", [])?;
        Ok(removed)
    }
}
