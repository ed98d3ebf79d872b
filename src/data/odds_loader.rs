//! Odds JSON loading for all bet types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::combination::Combination;
use crate::error::{validate_odds, Result};
use crate::models::{BetType, OddsBook, RaceKey};

/// Odds JSON structure, one file per race
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OddsFile {
    pub date: u32,
    pub venue_id: u8,
    pub race_no: u8,
    #[serde(default)]
    pub scraped_at: Option<String>,
    #[serde(default)]
    pub win: HashMap<String, f64>,
    #[serde(default)]
    pub exacta: HashMap<String, f64>,
    #[serde(default)]
    pub quinella: HashMap<String, f64>,
    #[serde(default)]
    pub trifecta: HashMap<String, f64>,
    #[serde(default)]
    pub trio: HashMap<String, f64>,
}

impl OddsFile {
    /// Canonicalize keys and drop malformed entries
    pub fn into_book(self) -> OddsBook {
        let mut book = OddsBook::default();
        for (bet_type, quotes) in [
            (BetType::Win, self.win),
            (BetType::Exacta, self.exacta),
            (BetType::Quinella, self.quinella),
            (BetType::Trifecta, self.trifecta),
            (BetType::Trio, self.trio),
        ] {
            let target = book.for_bet_type_mut(bet_type);
            for (key, odds) in quotes {
                match Combination::parse(bet_type, &key) {
                    Some(combination) if validate_odds(odds).is_ok() => {
                        target.insert(combination.key(), odds);
                    }
                    _ => debug!("Dropping {} odds entry {:?} = {}", bet_type.name(), key, odds),
                }
            }
        }
        book
    }
}

/// Odds file path for a race: `{date}_{venue:02}_{race:02}.json`
pub fn odds_path<P: AsRef<Path>>(odds_dir: P, key: &RaceKey) -> PathBuf {
    odds_dir.as_ref().join(format!("{}.json", key))
}

/// Check if an odds file exists for a race
pub fn odds_exists<P: AsRef<Path>>(odds_dir: P, key: &RaceKey) -> bool {
    odds_path(odds_dir, key).exists()
}

/// Load the odds book for a race; `Ok(None)` when no file exists
pub fn load_odds<P: AsRef<Path>>(odds_dir: P, key: &RaceKey) -> Result<Option<OddsBook>> {
    let path = odds_path(odds_dir, key);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let file: OddsFile = serde_json::from_str(&content)?;
    Ok(Some(file.into_book()))
}

/// List race keys with odds files in a directory, sorted
pub fn list_odds_files<P: AsRef<Path>>(odds_dir: P) -> Vec<RaceKey> {
    let mut results = Vec::new();

    if let Ok(entries) = fs::read_dir(odds_dir) {
        for entry in entries.flatten() {
            if let Some(filename) = entry.file_name().to_str() {
                if let Some(base) = filename.strip_suffix(".json") {
                    if let Ok(key) = base.parse::<RaceKey>() {
                        results.push(key);
                    }
                }
            }
        }
    }

    results.sort();
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "date": 20240115,
        "venue_id": 3,
        "race_no": 1,
        "scraped_at": "2024-01-15T10:03:54",
        "win": {"1": 1.8, "2": 5.2},
        "exacta": {"1-2": 7.6, "2-1": 20.3, "1-1": 3.0},
        "quinella": {"2-1": 5.5, "3=4": 30.1},
        "trio": {"3=1=2": 12.0},
        "trifecta": {"1-2-3": -4.0}
    }"#;

    #[test]
    fn test_into_book_canonicalizes() {
        let file: OddsFile = serde_json::from_str(SAMPLE).unwrap();
        let book = file.into_book();
        assert_eq!(book.win.len(), 2);
        assert_eq!(book.exacta.len(), 2);
        assert!((book.quinella["1=2"] - 5.5).abs() < 1e-9);
        assert!(book.quinella.contains_key("3=4"));
        assert!((book.trio["1=2=3"] - 12.0).abs() < 1e-9);
        // Negative odds dropped
        assert!(book.trifecta.is_empty());
    }

    #[test]
    fn test_load_odds_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let key = RaceKey::new(20240115, 3, 1);
        assert!(load_odds(dir.path(), &key).unwrap().is_none());

        fs::write(odds_path(dir.path(), &key), SAMPLE).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(odds_exists(dir.path(), &key));

        let book = load_odds(dir.path(), &key).unwrap().unwrap();
        assert!((book.exacta["1-2"] - 7.6).abs() < 1e-9);
        assert_eq!(list_odds_files(dir.path()), vec![key]);
    }

    #[test]
    fn test_odds_path_format() {
        let path = odds_path("/tmp/odds", &RaceKey::new(20231231, 24, 12));
        assert!(path.ends_with("20231231_24_12.json"));
    }
}
