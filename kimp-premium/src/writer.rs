use crate::{error::PremiumError, merge::PriceBook, table::PremiumTable};
use kimp_data::model::PricePoint;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Premium table output file name.
pub const PREMIUM_TABLE_FILE: &str = "premium_table.json";

/// Merged price book output file name.
pub const PRICES_FILE: &str = "prices.json";

/// Writes JSON output files into a data directory via temp-write then rename, so readers
/// never observe a partially written file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWriter {
    dir: PathBuf,
}

impl TableWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialise `value` as pretty JSON into `file_name`, atomically replacing any
    /// previous content. Returns the final path.
    pub fn write_atomic<T>(&self, file_name: &str, value: &T) -> Result<PathBuf, PremiumError>
    where
        T: Serialize + ?Sized,
    {
        fs::create_dir_all(&self.dir).map_err(|error| PremiumError::io(&self.dir, error))?;

        let path = self.dir.join(file_name);
        let tmp = self.dir.join(format!("{file_name}.tmp"));
        let body = serde_json::to_vec_pretty(value)?;

        fs::write(&tmp, body).map_err(|error| PremiumError::io(&tmp, error))?;
        fs::rename(&tmp, &path).map_err(|error| PremiumError::io(&path, error))?;

        debug!(path = %path.display(), "wrote output file");
        Ok(path)
    }

    pub fn write_table(&self, table: &PremiumTable) -> Result<PathBuf, PremiumError> {
        self.write_atomic(PREMIUM_TABLE_FILE, table)
    }

    /// Write the price book keyed by "EXCHANGE:SYMBOL:QUOTE".
    pub fn write_prices(&self, book: &PriceBook) -> Result<PathBuf, PremiumError> {
        let prices = book
            .iter()
            .map(|(key, point)| (key.to_string(), point))
            .collect::<BTreeMap<String, &PricePoint>>();

        self.write_atomic(PRICES_FILE, &prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{book, price, time_plus_millis};
    use kimp_data::model::{ExchangeId, Quote};

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TableWriter::new(dir.path().join("data"));

        let path = writer.write_atomic("values.json", &vec![1, 2, 3]).unwrap();
        assert_eq!(path, dir.path().join("data").join("values.json"));

        writer.write_atomic("values.json", &vec![4]).unwrap();
        let actual: Vec<i32> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(actual, vec![4]);

        // No temp file is left behind
        assert!(!dir.path().join("data").join("values.json.tmp").exists());
    }

    #[test]
    fn test_write_prices_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TableWriter::new(dir.path());

        let book = book([
            price(ExchangeId::Upbit, "BTC", Quote::Krw, 100_000_000.0),
            price(ExchangeId::BinanceSpot, "BTC", Quote::Usdt, 70_000.0),
        ]);

        let path = writer.write_prices(&book).unwrap();
        let prices: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(prices["UPBIT:BTC:KRW"]["price"], 100_000_000.0);
        assert_eq!(prices["BINANCE:BTC:USDT"]["quote"], "USDT");

        let table = crate::table::PremiumComputer::default().compute(&book, 1_400.0, time_plus_millis(0));
        let path = writer.write_table(&table).unwrap();
        let actual: PremiumTable = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(actual, table);
    }

    #[test]
    fn test_write_atomic_reports_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let writer = TableWriter::new(blocker.join("nested"));
        assert!(matches!(
            writer.write_atomic("values.json", &1),
            Err(PremiumError::Io { .. })
        ));
    }
}
