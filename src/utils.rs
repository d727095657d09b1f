//! Loading bars from Binance-style kline dumps.

use crate::engine::{Bar, BarBuilder};
use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Binance emits prices and volumes as strings; other dumps of the same
// layout use plain numbers. Accept both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Price {
    Number(f64),
    Text(String),
}

impl Price {
    fn value(&self) -> Result<f64> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(text) => text
                .parse()
                .map_err(|_| Error::MalformedBar(format!("unparseable number `{text}`"))),
        }
    }
}

// One kline row: open time (ms), open, high, low, close, volume, close
// time (ms), quote asset volume, trade count, taker buy base volume,
// taker buy quote volume, and a field Binance documents as "ignore".
type Row = (
    i64,
    Price,
    Price,
    Price,
    Price,
    Price,
    i64,
    Price,
    u64,
    Price,
    Price,
    Price,
);

/// Reads a whole-file JSON array of Binance klines into validated bars.
///
/// Every row goes through [`BarBuilder`], so a malformed row (inverted
/// high/low range, negative volume, non-finite price) fails the load
/// instead of poisoning a run later.
///
/// ### Arguments
/// * `path` - A file containing `[[openTime, "open", "high", ...], ...]`.
///
/// ### Returns
/// The bars in file order; ordering is enforced by the engine, not here.
pub fn bars_from_file(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let rows: Vec<Row> = serde_json::from_reader(reader)?;
    rows.into_iter().map(bar_from_row).collect()
}

fn bar_from_row(row: Row) -> Result<Bar> {
    let (open_time, open, high, low, close, volume, close_time, ..) = row;
    BarBuilder::new()
        .open(open.value()?)
        .high(high.value()?)
        .low(low.value()?)
        .close(close.value()?)
        .volume(volume.value()?)
        .open_time(timestamp_millis(open_time)?)
        .close_time(timestamp_millis(close_time)?)
        .build()
}

fn timestamp_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::MalformedBar(format!("timestamp {ms} out of range")))
}

#[cfg(test)]
use std::io::Write;

#[cfg(test)]
fn write_payload(name: &str, payload: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(name);
    File::create(&path)
        .unwrap()
        .write_all(payload.as_bytes())
        .unwrap();
    path
}

#[cfg(test)]
#[test]
fn loads_klines_with_mixed_number_encodings() {
    let payload = r#"[
        [1700000000000, "100.0", "101.0", "99.0", "100.5", "1200.5", 1700000059999, "120000.0", 42, "600.0", "60000.0", "0"],
        [1700000060000, 100.5, 102.0, 100.0, 101.5, 900.0, 1700000119999, "91000.0", 30, "450.0", "45000.0", "0"]
    ]"#;
    let path = write_payload("barloop_klines_mixed.json", payload);
    let bars = bars_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].open(), 100.0);
    assert_eq!(bars[0].close(), 100.5);
    assert_eq!(bars[0].volume(), 1200.5);
    assert_eq!(bars[0].open_time().timestamp_millis(), 1_700_000_000_000);
    assert_eq!(bars[1].high(), 102.0);
    assert_eq!(bars[1].close_time().timestamp_millis(), 1_700_000_119_999);
}

#[cfg(test)]
#[test]
fn rejects_rows_that_break_bar_validation() {
    // high sits below the close
    let payload = r#"[[1700000000000, "100.0", "99.0", "98.0", "100.5", "1.0", 1700000059999, "1", 1, "1", "1", "0"]]"#;
    let path = write_payload("barloop_klines_inverted.json", payload);
    let result = bars_from_file(&path);
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(result, Err(Error::MalformedBar(_))));
}

#[cfg(test)]
#[test]
fn rejects_unparseable_price_text() {
    let payload = r#"[[1700000000000, "not-a-price", "101.0", "99.0", "100.5", "1.0", 1700000059999, "1", 1, "1", "1", "0"]]"#;
    let path = write_payload("barloop_klines_garbage.json", payload);
    let result = bars_from_file(&path);
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(result, Err(Error::MalformedBar(_))));
}
