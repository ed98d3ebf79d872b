//! SQLite persistence for predictions and backtest runs

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::backtesting::{BacktestResult, HitCounters};
use crate::core::matrix::PositionMatrix;
use crate::error::{EngineError, Result};
use crate::models::{RaceKey, NUM_BOATS};

/// Open (creating if needed) the database and ensure the schema exists
pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    debug!("Opened sqlite store {}", path.display());
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            race_id TEXT NOT NULL,
            model_version TEXT NOT NULL,
            boat_number INTEGER NOT NULL,
            prob_1st REAL NOT NULL,
            prob_2nd REAL NOT NULL,
            prob_3rd REAL NOT NULL,
            prob_4th REAL NOT NULL,
            prob_5th REAL NOT NULL,
            prob_6th REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (race_id, model_version, boat_number)
        );
        CREATE INDEX IF NOT EXISTS idx_predictions_race ON predictions(race_id);

        CREATE TABLE IF NOT EXISTS backtest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_at TEXT NOT NULL,
            model_version TEXT NOT NULL,
            total_races INTEGER NOT NULL,
            evaluated INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            counters_json TEXT NOT NULL,
            rates_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_backtest_runs_run_at ON backtest_runs(run_at);
        "#,
    )?;
    Ok(())
}

/// Upsert one race's matrix; the last write per (race, model version) wins
pub fn save_prediction(
    conn: &mut Connection,
    race: &RaceKey,
    model_version: &str,
    matrix: &PositionMatrix,
) -> Result<usize> {
    let race_id = race.to_string();
    let updated_at = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    for (row, probs) in matrix.rows().iter().enumerate() {
        tx.execute(
            r#"
            INSERT INTO predictions (
                race_id, model_version, boat_number,
                prob_1st, prob_2nd, prob_3rd, prob_4th, prob_5th, prob_6th,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(race_id, model_version, boat_number) DO UPDATE SET
                prob_1st = excluded.prob_1st,
                prob_2nd = excluded.prob_2nd,
                prob_3rd = excluded.prob_3rd,
                prob_4th = excluded.prob_4th,
                prob_5th = excluded.prob_5th,
                prob_6th = excluded.prob_6th,
                updated_at = excluded.updated_at
            "#,
            params![
                race_id,
                model_version,
                matrix.boat_numbers()[row] as i64,
                probs[0],
                probs[1],
                probs[2],
                probs[3],
                probs[4],
                probs[5],
                updated_at,
            ],
        )?;
    }
    tx.commit()?;
    debug!("Stored prediction for {} ({})", race_id, model_version);
    Ok(NUM_BOATS)
}

/// Stored matrix for a race and model version, in boat-number order
pub fn load_prediction(
    conn: &Connection,
    race: &RaceKey,
    model_version: &str,
) -> Result<Option<PositionMatrix>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT boat_number, prob_1st, prob_2nd, prob_3rd, prob_4th, prob_5th, prob_6th
        FROM predictions
        WHERE race_id = ?1 AND model_version = ?2
        ORDER BY boat_number ASC
        "#,
    )?;
    let rows = stmt.query_map(params![race.to_string(), model_version], |row| {
        let boat = row.get::<_, i64>(0)?;
        let probs = (1..=NUM_BOATS)
            .map(|i| row.get::<_, f64>(i))
            .collect::<rusqlite::Result<Vec<f64>>>()?;
        Ok((boat, probs))
    })?;

    let mut boats = Vec::new();
    let mut probs = Vec::new();
    for row in rows {
        let (boat, p) = row?;
        let boat = u8::try_from(boat)
            .map_err(|_| EngineError::Validation(format!("Stored boat number out of range: {}", boat)))?;
        boats.push(boat);
        probs.push(p);
    }
    if boats.is_empty() {
        return Ok(None);
    }
    PositionMatrix::new(&probs, &boats).map(Some)
}

/// One persisted backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub run_id: i64,
    /// RFC 3339
    pub run_at: String,
    pub model_version: String,
    pub counters: HitCounters,
    pub rates: BTreeMap<String, f64>,
}

/// Append a run; returns its id
pub fn insert_backtest_run(conn: &Connection, result: &BacktestResult) -> Result<i64> {
    let counters_json = serde_json::to_string(&result.counters)?;
    let rates_json = serde_json::to_string(&result.rates())?;
    conn.execute(
        "INSERT INTO backtest_runs(run_at, model_version, total_races, evaluated, skipped, counters_json, rates_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Utc::now().to_rfc3339(),
            result.model_version,
            result.counters.total_races as i64,
            result.counters.evaluated as i64,
            result.counters.skipped as i64,
            counters_json,
            rates_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent run, if any
pub fn latest_run(conn: &Connection) -> Result<Option<BacktestRun>> {
    let raw = conn
        .query_row(
            r#"
            SELECT run_id, run_at, model_version, counters_json, rates_json
            FROM backtest_runs
            ORDER BY run_at DESC, run_id DESC
            LIMIT 1
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    match raw {
        Some((run_id, run_at, model_version, counters_json, rates_json)) => Ok(Some(BacktestRun {
            run_id,
            run_at,
            model_version,
            counters: serde_json::from_str(&counters_json)?,
            rates: serde_json::from_str(&rates_json)?,
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtesting::HitMetric;

    fn matrix(first: f64) -> PositionMatrix {
        let rows: Vec<Vec<f64>> = (0..NUM_BOATS)
            .map(|i| {
                (0..NUM_BOATS)
                    .map(|pos| if pos == 0 && i == 0 { first } else { 1.0 })
                    .collect()
            })
            .collect();
        PositionMatrix::from_rows(&rows).unwrap()
    }

    fn result(win_hits: usize) -> BacktestResult {
        let mut counters = HitCounters::default();
        for i in 0..10 {
            if i < win_hits {
                counters.record_evaluated(&[HitMetric::Win]);
            } else {
                counters.record_evaluated(&[]);
            }
        }
        BacktestResult {
            model_version: "test".to_string(),
            counters,
            alerts: Vec::new(),
        }
    }

    #[test]
    fn test_prediction_upsert_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_db(&dir.path().join("store").join("engine.sqlite")).unwrap();
        let key = RaceKey::new(20240115, 1, 1);

        save_prediction(&mut conn, &key, "v1", &matrix(1.0)).unwrap();
        save_prediction(&mut conn, &key, "v1", &matrix(4.0)).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 6);

        let stored = load_prediction(&conn, &key, "v1").unwrap().unwrap();
        let expected = matrix(4.0);
        assert_eq!(stored.boat_numbers(), expected.boat_numbers());
        for (a, b) in stored.rows().iter().zip(expected.rows()) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-12);
            }
        }
        assert!(load_prediction(&conn, &key, "v2").unwrap().is_none());
    }

    #[test]
    fn test_latest_run() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(&dir.path().join("engine.sqlite")).unwrap();
        assert!(latest_run(&conn).unwrap().is_none());

        insert_backtest_run(&conn, &result(3)).unwrap();
        let id = insert_backtest_run(&conn, &result(5)).unwrap();

        let latest = latest_run(&conn).unwrap().unwrap();
        assert_eq!(latest.run_id, id);
        assert_eq!(latest.counters.win, 5);
        assert!((latest.rates["win_accuracy"] - 50.0).abs() < 1e-9);
    }
}
