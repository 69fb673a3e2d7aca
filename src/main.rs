//! `formtrace` command line: replay recorded form sessions, export stored
//! samples and check a field map against a model's feature keys.

use std::{
    collections::BTreeSet,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use formtrace::{
    inference::FeatureVector,
    init_logging,
    mapper::{MappedSample, VendorFieldMap},
    replay::{parse_script, run_script, ReplayOptions},
    settings::SettingsStore,
    store::{SampleExport, SampleStore},
    TrackerSettings,
};

#[derive(Parser, Debug)]
#[clap(name = "formtrace")]
#[clap(about = "Dual-baseline edit tracking and CREATE/EDIT sample capture")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSONL form script through the tracker
    Replay {
        script: PathBuf,

        /// SQLite sample store to write into
        #[clap(long, value_name = "FILE")]
        db: Option<PathBuf>,

        /// Vendor field map (JSON)
        #[clap(long, value_name = "FILE")]
        map: Option<PathBuf>,

        /// Tracker settings (JSON); missing keys take defaults
        #[clap(long, value_name = "FILE")]
        settings: Option<PathBuf>,

        /// Write emitted samples to this JSON file
        #[clap(long, value_name = "FILE")]
        export: Option<PathBuf>,

        /// Drive observation from the background poll loop
        #[clap(long)]
        live: bool,
    },
    /// Export every stored sample as `{"samples": [...]}`
    Export {
        #[clap(long, value_name = "FILE")]
        db: PathBuf,

        #[clap(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Report canonical fields the model has no feature for
    Align {
        #[clap(long, value_name = "FILE")]
        map: PathBuf,

        /// JSON array of the model's feature keys
        #[clap(long, value_name = "FILE")]
        keys: PathBuf,
    },
    /// Write one feature vector per stored sample as JSON lines
    Features {
        #[clap(long, value_name = "FILE")]
        db: PathBuf,

        /// JSON array of the model's feature keys
        #[clap(long, value_name = "FILE")]
        keys: PathBuf,

        #[clap(long, value_name = "FILE")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct FeatureRow {
    label: String,
    #[serde(flatten)]
    features: FeatureVector,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            script,
            db,
            map,
            settings,
            export,
            live,
        } => replay(&script, db, map, settings, export, live).await,
        Command::Export { db, out } => {
            let store = SampleStore::open(db)?;
            let count = store.export_json(&out).await?;
            info!("exported {count} sample(s) to {}", out.display());
            Ok(())
        }
        Command::Align { map, keys } => align(&map, &keys),
        Command::Features { db, keys, out } => features(db, &keys, &out).await,
    }
}

async fn replay(
    script: &Path,
    db: Option<PathBuf>,
    map: Option<PathBuf>,
    settings: Option<PathBuf>,
    export: Option<PathBuf>,
    live: bool,
) -> Result<()> {
    let contents = fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    let steps = parse_script(&contents)?;

    let field_map = match map {
        Some(path) => VendorFieldMap::load(&path)?,
        None => VendorFieldMap::default(),
    };
    let mut tracker_settings = match settings {
        Some(path) => SettingsStore::new(path)?.tracker(),
        None => TrackerSettings::default(),
    };
    tracker_settings.merge_identity_fields(field_map.identity_fields(&tracker_settings.vendor));

    let store = db.map(SampleStore::open).transpose()?;
    let summary = run_script(
        &steps,
        ReplayOptions {
            settings: tracker_settings,
            field_map: Arc::new(field_map),
            store,
            live,
            ..ReplayOptions::default()
        },
    )
    .await?;

    if let Some(path) = export {
        write_export(&path, summary.samples.clone())?;
        info!("wrote {} sample(s) to {}", summary.samples.len(), path.display());
    }

    println!(
        "{}",
        serde_json::json!({
            "emitted": summary.emitted,
            "suppressed": summary.suppressed,
            "predictions": summary.predictions,
        })
    );
    Ok(())
}

fn write_export(path: &Path, samples: Vec<MappedSample>) -> Result<()> {
    let body = serde_json::to_vec_pretty(&SampleExport { samples })?;
    fs::write(path, body).with_context(|| format!("failed to write export {}", path.display()))
}

fn load_feature_keys(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read feature keys {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("feature keys in {} must be a JSON array of strings", path.display()))
}

fn align(map: &Path, keys: &Path) -> Result<()> {
    let field_map = VendorFieldMap::load(map)?;
    let model_keys: BTreeSet<String> = load_feature_keys(keys)?.into_iter().collect();

    let gaps = field_map.alignment_report(&model_keys);
    if gaps.is_empty() {
        println!("all canonical fields are covered by the model");
        return Ok(());
    }
    for gap in gaps {
        let missing: Vec<&str> = gap.missing.iter().map(String::as_str).collect();
        println!("{}.{}: {}", gap.vendor, gap.object_type, missing.join(", "));
    }
    Ok(())
}

async fn features(db: PathBuf, keys: &Path, out: &Path) -> Result<()> {
    let feature_keys = load_feature_keys(keys)?;
    let store = SampleStore::open(db)?;
    let samples = store.list_samples(None).await?;

    let file = fs::File::create(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    let mut writer = BufWriter::new(file);
    for stored in &samples {
        let row = FeatureRow {
            label: stored.label.clone(),
            features: FeatureVector::build(
                &stored.sample.data.after,
                &stored.sample.changes,
                &feature_keys,
            ),
        };
        serde_json::to_writer(&mut writer, &row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!("wrote {} feature row(s) to {}", samples.len(), out.display());
    Ok(())
}
