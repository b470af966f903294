use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facereg_core::{
    BlobStore, DistanceMetric, Embedding, FileGalleryStore, GalleryStore, IdentityKey,
    MatchOutcome, Matcher, ProfileStore, ThresholdMatcher,
};
use facereg_store::SqliteStore;
use faceregd::config::{check_threshold, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facereg", about = "Inspect the facereg gallery, profiles and enrollment images")]
struct Cli {
    /// faceregd TOML config file (default: <data_dir>/faceregd.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding gallery.json and profiles.db (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities in enrollment order
    List,
    /// Print the profile record of an identity as JSON
    Show {
        /// Identity key
        key: String,
    },
    /// Write the enrollment image of an identity to a file
    ExportImage {
        /// Identity key
        key: String,
        /// Output path
        out: PathBuf,
    },
    /// Match a probe embedding (JSON array of floats) against the gallery
    Identify {
        /// File containing the probe embedding
        probe: PathBuf,
        /// Match threshold (default: the daemon's configured threshold)
        #[arg(long)]
        threshold: Option<f32>,
        /// Distance metric (default: the daemon's configured metric)
        #[arg(long)]
        metric: Option<DistanceMetric>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.gallery_path = dir.join(facereg_core::GALLERY_FILE);
        config.db_path = dir.join(facereg_core::STORE_FILE);
        config.data_dir = dir;
    }
    let gallery_store = FileGalleryStore::new(&config.gallery_path);
    let open_store = || SqliteStore::open(&config.db_path).context("opening profile store");

    match cli.command {
        Commands::List => {
            let gallery = gallery_store.load();
            if gallery.is_empty() {
                println!("No identities enrolled");
                return Ok(());
            }
            let store = open_store()?;
            for (i, entry) in gallery.entries().iter().enumerate() {
                let name = match ProfileStore::get(&store, &entry.identity_key) {
                    Ok(Some(p)) => p.name,
                    Ok(None) => "<no profile>".to_string(),
                    Err(e) => {
                        tracing::warn!(key = %entry.identity_key, error = %e, "profile lookup failed");
                        "<unreadable>".to_string()
                    }
                };
                println!(
                    "{i:>4}  {}  {}  {name}",
                    entry.identity_key,
                    entry.enrolled_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            let orphans = store
                .list_profiles()?
                .into_iter()
                .filter(|p| gallery.find(&p.key).is_none())
                .count();
            if orphans > 0 {
                println!("{orphans} profile(s) have no gallery entry");
            }
        }
        Commands::Show { key } => {
            let store = open_store()?;
            let key = IdentityKey::from(key);
            match ProfileStore::get(&store, &key)? {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => bail!("no profile for {key}"),
            }
        }
        Commands::ExportImage { key, out } => {
            let store = open_store()?;
            let key = IdentityKey::from(key);
            let Some(bytes) = BlobStore::get(&store, &key)? else {
                bail!("no enrollment image for {key}");
            };
            std::fs::write(&out, &bytes).with_context(|| format!("writing {}", out.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), out.display());
        }
        Commands::Identify { probe, threshold, metric } => {
            let text = std::fs::read_to_string(&probe)
                .with_context(|| format!("reading {}", probe.display()))?;
            let values: Vec<f32> = serde_json::from_str(&text).context("probe must be a JSON array of numbers")?;
            let gallery = gallery_store.load();
            let matcher = configured_matcher(&config, threshold, metric)?;
            let threshold = matcher.threshold;

            match matcher.identify(&Embedding::new(values), &gallery) {
                MatchOutcome::Match { key, index, distance } => {
                    println!("match {key} (index {index}, distance {distance:.4})");
                }
                MatchOutcome::NoMatch { nearest: Some(d) } => {
                    println!("no match (nearest distance {d:.4}, threshold {threshold})");
                }
                MatchOutcome::NoMatch { nearest: None } => {
                    println!("no match ({} identities enrolled)", gallery.len());
                }
            }
        }
    }

    Ok(())
}

/// The daemon's matcher, with command-line overrides applied.
fn configured_matcher(
    config: &Config,
    threshold: Option<f32>,
    metric: Option<DistanceMetric>,
) -> Result<ThresholdMatcher> {
    let threshold = match threshold {
        Some(t) => check_threshold(t)?,
        None => config.threshold,
    };
    Ok(ThresholdMatcher::new(metric.unwrap_or(config.metric), threshold))
}
