//! Boatrace Forecast CLI - predict, backtest and train from the command line

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use boatrace_forecast::backtesting::BacktestEvaluator;
use boatrace_forecast::data::odds_loader::{list_odds_files, load_odds};
use boatrace_forecast::data::ResolvedStats;
use boatrace_forecast::store;
use boatrace_forecast::{
    BetType, EngineConfig, HistoricalRace, PositionModel, PositionPredictor, RaceDataset,
    RaceKey, RacePredictor, Trainer,
};

#[derive(Parser)]
#[command(name = "boatrace-forecast")]
#[command(author, version, about = "Boat race position and combination forecasts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, env = "ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Historical race CSV (overrides [storage].races_csv)
    #[arg(long)]
    races: Option<PathBuf>,

    /// Odds directory (overrides [storage].odds_dir)
    #[arg(long)]
    odds_dir: Option<PathBuf>,

    /// SQLite database (overrides [storage].db_path)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict a single race
    Predict {
        /// Race id (YYYYMMDD_VV_RR)
        #[arg(long)]
        race_id: String,

        /// Model artifact (overrides [storage].model_path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Number of combinations to show per bet type
        #[arg(long, default_value = "10")]
        top: usize,

        /// Do not persist the prediction
        #[arg(long)]
        no_save: bool,
    },

    /// List races for a date
    List {
        /// Race date (YYYYMMDD format)
        #[arg(short, long)]
        date: u32,
    },

    /// Evaluate the model on historical races and check for drift
    Backtest {
        /// Only the most recent N races
        #[arg(long, conflicts_with = "since")]
        limit: Option<usize>,

        /// Only races on or after this date (YYYYMMDD)
        #[arg(long)]
        since: Option<u32>,

        /// Model artifact (overrides [storage].model_path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Drift threshold in percentage points (overrides [backtest])
        #[arg(long)]
        threshold: Option<f64>,

        /// Do not persist the run
        #[arg(long)]
        no_save: bool,
    },

    /// Train a position model from historical races
    Train {
        /// Where to write the artifact (overrides [storage].model_path)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Half-life of sample weights in years (overrides [model])
        #[arg(long)]
        half_life: Option<f64>,

        /// Only races on or after this date (YYYYMMDD)
        #[arg(long)]
        since: Option<u32>,

        /// Train and report without writing the artifact
        #[arg(long)]
        no_save: bool,
    },

    /// Show feature importance of a trained model
    Importance {
        /// Model artifact (overrides [storage].model_path)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Number of features to show
        #[arg(long, default_value = "20")]
        top: usize,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    config.logging.init();
    if let Some(path) = cli.races {
        config.storage.races_csv = path;
    }
    if let Some(path) = cli.odds_dir {
        config.storage.odds_dir = path;
    }
    if let Some(path) = cli.db {
        config.storage.db_path = path;
    }

    println!(
        "{}",
        format!("Boatrace Forecast v{}", env!("CARGO_PKG_VERSION"))
            .cyan()
            .bold()
    );
    println!();

    match cli.command {
        Commands::Predict {
            race_id,
            model,
            top,
            no_save,
        } => {
            if let Some(path) = model {
                config.storage.model_path = path;
            }
            predict_race(&config, &race_id, top, no_save)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List { date } => {
            list_races(&config, date)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backtest {
            limit,
            since,
            model,
            threshold,
            no_save,
        } => {
            if let Some(path) = model {
                config.storage.model_path = path;
            }
            if let Some(t) = threshold {
                config.backtest.drift_threshold = t;
            }
            config.backtest.validate()?;
            let drift = run_backtest(&config, limit, since, no_save)?;
            Ok(if drift {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Train {
            output,
            half_life,
            since,
            no_save,
        } => {
            if let Some(path) = output {
                config.storage.model_path = path;
            }
            if let Some(h) = half_life {
                config.model.half_life_years = h;
            }
            config.model.validate()?;
            run_train(&config, since, no_save)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Importance { model, top } => {
            if let Some(path) = model {
                config.storage.model_path = path;
            }
            show_importance(&config, top)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    Ok(pb)
}

fn load_dataset(path: &Path) -> Result<RaceDataset> {
    let pb = spinner("Loading race data...")?;
    let dataset = RaceDataset::load(path)
        .with_context(|| format!("Failed to load races from {:?}", path))?;
    pb.finish_and_clear();
    info!("Loaded {} races from {}", dataset.len(), path.display());
    Ok(dataset)
}

fn load_model(path: &Path) -> Result<PositionModel> {
    if !path.exists() {
        bail!("Model file not found: {:?}", path);
    }
    PositionModel::load(path).with_context(|| format!("Failed to load model from {:?}", path))
}

fn venue_label(config: &EngineConfig, venue_id: u8) -> String {
    config
        .tables
        .venue_name(venue_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("venue {}", venue_id))
}

fn predict_race(config: &EngineConfig, race_id: &str, top: usize, no_save: bool) -> Result<()> {
    let key: RaceKey = race_id.parse()?;
    println!(
        "{}: {} / {} / {}R",
        "Predicting".green(),
        format_date(key.date),
        venue_label(config, key.venue_id),
        key.race_no
    );
    println!();

    let model = load_model(&config.storage.model_path)?;
    let dataset = load_dataset(&config.storage.races_csv)?;
    let race = dataset
        .get(&key)
        .with_context(|| format!("Race {} not found in {:?}", key, config.storage.races_csv))?;

    print_entries(race);

    let odds = load_odds(&config.storage.odds_dir, &key)
        .with_context(|| format!("Failed to read odds for {}", key))?;
    if odds.is_none() {
        println!("{}", "(no odds file for this race; expected values omitted)".dimmed());
        println!();
    }

    let predictor = RacePredictor::new(model, config.feature_builder());
    let prediction = predictor.predict(&race.context, odds.as_ref(), Some(top))?;

    println!("{}", "Position Probabilities:".yellow().bold());
    println!(
        "{:>4} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Boat", "1st", "2nd", "3rd", "4th", "5th", "6th"
    );
    println!("{}", "-".repeat(60));
    for prob in prediction.matrix.to_position_probs() {
        println!(
            "{:>4} {:>7.1}% {:>7.1}% {:>7.1}% {:>7.1}% {:>7.1}% {:>7.1}%",
            prob.boat_no,
            prob.probs[0] * 100.0,
            prob.probs[1] * 100.0,
            prob.probs[2] * 100.0,
            prob.probs[3] * 100.0,
            prob.probs[4] * 100.0,
            prob.probs[5] * 100.0
        );
    }
    println!();

    for bet_type in BetType::ALL {
        let Some(ranked) = prediction.for_bet_type(bet_type) else {
            continue;
        };
        println!(
            "{}",
            format!("{} (top {}):", bet_type.name(), top).yellow().bold()
        );
        println!("{:>10} {:>10} {:>8} {:>8}", "Combo", "Prob", "Odds", "EV");
        println!("{}", "-".repeat(40));
        for combo in &ranked.combinations {
            let odds_str = combo
                .odds
                .map(|o| format!("{:.1}", o))
                .unwrap_or_else(|| "-".to_string());
            let ev_str = combo
                .expected_value
                .map(|ev| format!("{:.3}", ev))
                .unwrap_or_else(|| "-".to_string());
            let ev_colored = if combo.is_value_bet {
                ev_str.green()
            } else {
                ev_str.normal()
            };
            println!(
                "{:>10} {:>9.2}% {:>8} {:>8}",
                combo.key,
                combo.probability * 100.0,
                odds_str,
                ev_colored
            );
        }
        println!();
    }

    if !prediction.value_bets.is_empty() {
        println!(
            "{} EV > 1.0 candidates: {}",
            "→".green(),
            prediction.value_bets.len()
        );
        println!();
    }

    if no_save {
        println!("{}", "Dry run: prediction not saved".dimmed());
    } else {
        let label = config.storage.version_label(&prediction.model_version);
        let mut conn = store::open_db(&config.storage.db_path)
            .with_context(|| format!("Failed to open {:?}", config.storage.db_path))?;
        store::save_prediction(&mut conn, &key, &label, &prediction.matrix)?;
        println!("{}: {} ({})", "Saved".green(), key, label);
    }

    Ok(())
}

fn print_entries(race: &HistoricalRace) {
    println!("{}", "Race Entries:".yellow().bold());
    println!(
        "{:>4} {:>6} {:<12} {:>4} {:>6} {:>6} {:>6} {:>6}",
        "Boat", "Racer", "Name", "Grd", "Win", "Mtr2", "Exh", "ST"
    );
    println!("{}", "-".repeat(70));
    for c in &race.context.competitors {
        let stats = ResolvedStats::from_competitor(c);
        println!(
            "{:>4} {:>6} {:<12} {:>4} {:>6.2} {:>6.2} {:>6.2} {:>6.2}",
            c.boat_number,
            c.racer_id,
            truncate_name(&c.racer_name, 12),
            c.racer_grade.as_deref().unwrap_or("-"),
            stats.win_rate,
            stats.motor_rate_2,
            stats.exhibition_time,
            stats.average_st
        );
    }
    println!();
}

fn list_races(config: &EngineConfig, date: u32) -> Result<()> {
    println!(
        "{}: {}",
        "Listing races for".green(),
        format_date(date)
    );
    println!();

    let dataset = load_dataset(&config.storage.races_csv)?;
    let with_odds = list_odds_files(&config.storage.odds_dir);
    let keys: Vec<&RaceKey> = dataset.keys().iter().filter(|k| k.date == date).collect();

    if keys.is_empty() {
        println!("{}", "No races found for this date.".yellow());
        return Ok(());
    }

    println!(
        "{:>4} {:<10} {:>4} {:>8} {:>6} {:>6}",
        "Code", "Venue", "R", "Entries", "Result", "Odds"
    );
    println!("{}", "-".repeat(50));
    for key in &keys {
        let Some(race) = dataset.get(*key) else {
            continue;
        };
        println!(
            "{:>4} {:<10} {:>4} {:>8} {:>6} {:>6}",
            key.venue_id,
            venue_label(config, key.venue_id),
            key.race_no,
            race.context.competitors.len(),
            if race.outcome.podium().is_some() { "yes" } else { "-" },
            if with_odds.contains(*key) { "yes" } else { "-" }
        );
    }

    println!();
    println!("Total: {} races", keys.len());
    Ok(())
}

/// Returns whether a drift alert fired
fn run_backtest(
    config: &EngineConfig,
    limit: Option<usize>,
    since: Option<u32>,
    no_save: bool,
) -> Result<bool> {
    println!("{}", "Running backtest...".green());
    println!("Drift threshold: {:.1}pp", config.backtest.drift_threshold);
    if let Some(n) = limit {
        println!("Most recent races: {}", n);
    }
    if let Some(date) = since {
        println!("Since: {}", format_date(date));
    }
    println!();

    let model = load_model(&config.storage.model_path)?;
    let dataset = load_dataset(&config.storage.races_csv)?;

    let mut races: Vec<&HistoricalRace> = match since {
        Some(date) => dataset.since(date).collect(),
        None => dataset.iter().collect(),
    };
    races.sort_by_key(|r| r.context.key);
    if let Some(n) = limit {
        let skip = races.len().saturating_sub(n);
        races.drain(..skip);
    }
    if races.is_empty() {
        bail!("No races selected for backtest");
    }

    let builder = config.feature_builder();
    let evaluator = BacktestEvaluator::new(&model, &builder, config.backtest.clone());

    let pb = ProgressBar::new(races.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let counters = evaluator.run_with(&races, || pb.inc(1));
    pb.finish_and_clear();

    let db_path = &config.storage.db_path;
    let conn = if no_save && !db_path.exists() {
        None
    } else {
        Some(store::open_db(db_path).with_context(|| format!("Failed to open {:?}", db_path))?)
    };
    let previous = match &conn {
        Some(c) => store::latest_run(c)?,
        None => None,
    };
    if let Some(run) = &previous {
        info!(
            "Comparing with run {} ({}, model {})",
            run.run_id, run.run_at, run.model_version
        );
    }

    let mut result = evaluator.finish(counters, previous.as_ref().map(|r| &r.rates));
    result.model_version = config.storage.version_label(&result.model_version);
    result.print_summary();

    match (&conn, no_save) {
        (Some(c), false) => {
            let id = store::insert_backtest_run(c, &result)?;
            println!("{}: run {}", "Saved".green(), id);
        }
        _ => println!("{}", "Dry run: backtest not saved".dimmed()),
    }

    if result.has_drift() {
        println!(
            "{}",
            format!("{} metric(s) degraded beyond threshold", result.alerts.len())
                .red()
                .bold()
        );
    }
    Ok(result.has_drift())
}

fn run_train(config: &EngineConfig, since: Option<u32>, no_save: bool) -> Result<()> {
    println!("{}", "Training position model...".green());
    println!("Half-life: {:.2} years", config.model.half_life_years);
    println!("Trees per class: {}", config.model.params.n_estimators);
    println!();

    let dataset = load_dataset(&config.storage.races_csv)?;
    let races: Vec<&HistoricalRace> = match since {
        Some(date) => dataset.since(date).collect(),
        None => dataset.iter().collect(),
    };

    let pb = spinner(&format!("Training on {} races...", races.len()))?;
    let trainer = Trainer::new(config.model.clone(), config.feature_builder());
    let report = trainer.train(races).context("Training failed")?;
    pb.finish_and_clear();

    println!("\n{}", "=".repeat(60));
    println!("TRAINING RESULTS");
    println!("{}", "=".repeat(60));
    println!("Model version: {}", report.model.version());
    println!("Training races: {}", report.train_races);
    println!("Training rows: {}", report.train_rows);
    println!("Skipped races: {}", report.skipped_races);
    match &report.metrics {
        Some(m) => {
            println!("{}", "-".repeat(60));
            println!("Holdout races: {}", m.holdout_races);
            println!("Position accuracy: {:.1}%", m.accuracy * 100.0);
            println!("Log loss: {:.4}", m.log_loss);
            println!("Win accuracy: {:.1}%", m.win_accuracy * 100.0);
            println!("Top3 contains winner: {:.1}%", m.top3_accuracy * 100.0);
            println!("Exacta top 5: {:.1}%", m.exacta_top5_accuracy * 100.0);
        }
        None => println!("Holdout: too few races"),
    }
    println!("{}", "=".repeat(60));

    if no_save {
        println!("{}", "Dry run: model not saved".dimmed());
    } else {
        report
            .model
            .save(&config.storage.model_path)
            .with_context(|| format!("Failed to save model to {:?}", config.storage.model_path))?;
        println!("{}: {:?}", "Saved".green(), config.storage.model_path);
    }
    Ok(())
}

fn show_importance(config: &EngineConfig, top: usize) -> Result<()> {
    let model = load_model(&config.storage.model_path)?;
    println!(
        "{} ({})",
        "Feature Importance:".yellow().bold(),
        model.version()
    );
    println!("{:>4} {:<32} {:>8}", "#", "Feature", "Share");
    println!("{}", "-".repeat(48));
    for (i, (name, share)) in model.feature_importance()?.iter().take(top).enumerate() {
        println!("{:>4} {:<32} {:>7.2}%", i + 1, name, share * 100.0);
    }
    Ok(())
}

/// Format date as YYYY-MM-DD
fn format_date(date: u32) -> String {
    let year = date / 10000;
    let month = (date / 100) % 100;
    let day = date % 100;
    format!("{}-{:02}-{:02}", year, month, day)
}

/// Truncate name to fit display width
fn truncate_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        name.to_string()
    } else {
        chars[..max_len - 1].iter().collect::<String>() + "…"
    }
}
