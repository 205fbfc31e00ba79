use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use flight_emissions::{
    bucket_total, emission_index, AmbientCondition, AmbientSeries, CalibrationTable,
    EmissionResult, InstallationCorrections, Movement, MovementEmissionAggregator,
    MovementEmissions, MovementPhaseEstimator, Pollutant, Repositories, StudyConfig, TimeBucket,
};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Aircraft movement emission inventory CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one BFFM2 emission index from a calibration table
    Index(IndexArgs),
    /// Compute bucketed gate/taxi/flight emissions for a study file
    Inventory(InventoryArgs),
}

#[derive(Parser, Debug)]
struct IndexArgs {
    /// Calibration table JSON (`{"pollutant": "NOx", "points": [...]}`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    calibration: PathBuf,

    /// Pollutant to evaluate (NOx, CO or HC); defaults to the table's pollutant
    #[arg(long)]
    pollutant: Option<String>,

    /// Engine fuel flow (kg/s)
    #[arg(long)]
    fuel_flow: f64,

    /// Ambient temperature (K)
    #[arg(long, default_value_t = 288.15)]
    temperature: f64,

    /// Ambient pressure (Pa)
    #[arg(long, default_value_t = 101_325.0)]
    pressure: f64,

    /// Relative humidity (0..1)
    #[arg(long, default_value_t = 0.6)]
    relative_humidity: f64,

    /// Flight Mach number
    #[arg(long, default_value_t = 0.0)]
    mach: f64,

    /// Optional installation correction overrides JSON (`{"Idle": 1.05}`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    corrections: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InventoryArgs {
    /// Study JSON with config, repositories, movements and ambient series
    #[arg(value_hint = ValueHint::FilePath)]
    study: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "emissions.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Study start (RFC 3339); defaults to the first movement's bucket
    #[arg(long)]
    start: Option<String>,

    /// Study end (RFC 3339, exclusive); defaults past the last movement
    #[arg(long)]
    end: Option<String>,

    /// Bucket length in minutes (overrides the study config)
    #[arg(long)]
    bucket_minutes: Option<u32>,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Deserialize)]
struct Study {
    #[serde(default)]
    config: StudyConfig,
    repositories: Repositories,
    movements: Vec<Movement>,
    #[serde(default)]
    ambient: AmbientSeries,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Index(args) => args.verbose,
        Command::Inventory(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Index(args) => handle_index(args),
        Command::Inventory(args) => handle_inventory(args),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn handle_index(args: IndexArgs) -> Result<()> {
    let table: CalibrationTable = read_json(&args.calibration)?;
    table.check_shape();
    let pollutant: Pollutant = match args.pollutant.as_deref() {
        Some(name) => name.parse()?,
        None => table.pollutant,
    };
    let corrections: InstallationCorrections = match args.corrections.as_ref() {
        Some(path) => read_json(path)?,
        None => InstallationCorrections::default(),
    };
    let ambient = AmbientCondition {
        temperature_k: args.temperature,
        pressure_pa: args.pressure,
        relative_humidity: args.relative_humidity,
        ..AmbientCondition::default()
    }
    .with_mach(args.mach);
    let ratios = ambient.try_normalize()?;
    debug!(
        theta = ratios.theta,
        delta = ratios.delta,
        omega = ratios.omega,
        h = ratios.humidity_coefficient,
        "ambient ratios"
    );

    let ei = emission_index(pollutant, args.fuel_flow, &table, &ambient, &corrections)
        .with_context(|| format!("failed to evaluate {} index", pollutant))?;
    info!("{} at {:.4} kg/s: {:.6} g/kg", pollutant, args.fuel_flow, ei);
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{ei:.12}")?;
    Ok(())
}

fn handle_inventory(args: InventoryArgs) -> Result<()> {
    let t_load = Instant::now();
    let mut study: Study = read_json(&args.study)?;
    if let Some(minutes) = args.bucket_minutes {
        study.config.bucket_minutes = minutes;
    }
    study.config.validate()?;
    info!(
        "Loaded {} movements ({:.1} ms), method {}, params sha256 {}",
        study.movements.len(),
        t_load.elapsed().as_secs_f64() * 1000.0,
        study.config.method,
        study.config.params_hash_sha256()?
    );
    if study.ambient.is_empty() {
        warn!("No ambient series supplied; using ISA sea level for every bucket");
    } else {
        debug!("Ambient series with {} entries", study.ambient.len());
    }
    for movement in &study.movements {
        if let Err(err) = study.repositories.runway(&movement.runway) {
            warn!("Movement {}: {}", movement.id, err);
        }
    }

    let step = Duration::minutes(i64::from(study.config.bucket_minutes));
    let start = match args.start.as_deref() {
        Some(s) => parse_time(s)?,
        None => {
            let first = study
                .movements
                .iter()
                .map(|m| m.runway_time)
                .min()
                .ok_or_else(|| anyhow!("study has no movements"))?;
            first
                .duration_trunc(step)
                .context("failed to align study start to the bucket grid")?
        }
    };
    let end = match args.end.as_deref() {
        Some(s) => parse_time(s)?,
        None => {
            let last = study
                .movements
                .iter()
                .map(|m| m.runway_time)
                .max()
                .ok_or_else(|| anyhow!("study has no movements"))?;
            last.duration_trunc(step)
                .context("failed to align study end to the bucket grid")?
                + step
        }
    };
    let buckets = TimeBucket::split(start, end, study.config.bucket_minutes)?;
    info!("Evaluating {} buckets from {} to {}", buckets.len(), start, end);

    let t_compute = Instant::now();
    let config = &study.config;
    let repos = &study.repositories;
    let movements = &study.movements;
    let ambient = &study.ambient;
    let results: Vec<Vec<MovementEmissions<'_>>> = buckets
        .par_iter()
        .map(|bucket| {
            let estimator = MovementPhaseEstimator::new(repos, config, ambient.at(bucket.start));
            let aggregator = MovementEmissionAggregator::new(repos, config, estimator);
            aggregator
                .process_bucket(bucket, movements)
                .with_context(|| format!("failed to process bucket starting {}", bucket.start))
        })
        .collect::<Result<Vec<_>>>()?;
    info!("Compute stage: {:.1} ms", t_compute.elapsed().as_secs_f64() * 1000.0);

    let mut study_total = EmissionResult::default();
    for (bucket, rows) in buckets.iter().zip(&results) {
        let total = bucket_total(rows);
        if !rows.is_empty() {
            debug!(
                bucket_start = %bucket.start,
                movements = rows.len(),
                fuel_kg = total.fuel_kg,
                nox_g = total.nox_g,
                "bucket total"
            );
        }
        study_total += total;
    }
    info!(
        "Study total: fuel {:.1} kg, NOx {:.1} g, CO {:.1} g, HC {:.1} g, CO2 {:.1} g",
        study_total.fuel_kg,
        study_total.nox_g,
        study_total.co_g,
        study_total.hc_g,
        study_total.co2_g
    );

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_emission_rows(&results, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_emission_rows(&results, &mut writer)?;
        info!("Wrote emissions CSV: {}", args.output.display());
    }
    Ok(())
}

fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(input.trim())
        .with_context(|| format!("invalid timestamp '{}': expected RFC 3339", input))?;
    Ok(parsed.with_timezone(&Utc))
}

fn write_emission_rows<W: Write>(
    results: &[Vec<MovementEmissions<'_>>],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "bucket_start",
        "movement",
        "aircraft",
        "operation",
        "phase",
        "fuel_kg",
        "co_g",
        "co2_g",
        "hc_g",
        "nox_g",
        "sox_g",
        "pm10_g",
        "p1_g",
        "p2_g",
    ])?;

    for row in results.iter().flatten() {
        let Some(phases) = row.phases.as_ref() else {
            continue;
        };
        for phase in phases {
            let e = &phase.emissions;
            writer.write_record([
                row.timestamp.to_rfc3339(),
                row.movement.id.clone(),
                row.movement.aircraft.clone(),
                row.movement.operation.to_string(),
                phase.phase.name().to_string(),
                format!("{:.4}", e.fuel_kg),
                format!("{:.4}", e.co_g),
                format!("{:.4}", e.co2_g),
                format!("{:.4}", e.hc_g),
                format!("{:.4}", e.nox_g),
                format!("{:.4}", e.sox_g),
                format!("{:.4}", e.pm10_g),
                format!("{:.4}", e.p1_g),
                format!("{:.4}", e.p2_g),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}
