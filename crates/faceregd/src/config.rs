//! Daemon and CLI configuration.

use anyhow::{Context, Result};
use facereg_core::{matcher::DEFAULT_THRESHOLD, DistanceMetric};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "faceregd.toml";
const FEED_FILE: &str = "feed.jsonl";

/// Daemon configuration: optional TOML file, then `FACEREG_*` environment
/// overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root for the gallery, database and feed defaults.
    pub data_dir: PathBuf,
    /// Gallery JSON file.
    pub gallery_path: PathBuf,
    /// SQLite database holding profiles and enrollment images.
    pub db_path: PathBuf,
    /// JSON-lines frame feed written by the detector sidecar. The daemon
    /// follows it like `tail -f`; a FIFO works too.
    pub feed_path: PathBuf,
    /// Distance metric used for matching.
    pub metric: DistanceMetric,
    /// Inclusive distance threshold for a positive match.
    pub threshold: f32,
    /// Consecutive frames a face may be missing before its enrollment is cancelled.
    pub cancel_after_absent_frames: u32,
    /// Speech command (program plus leading args); the phrase is appended.
    pub voice_command: Option<String>,
    /// Phrase spoken after a successful enrollment.
    pub confirmation: String,
}

/// On-disk form; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub gallery_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub feed_path: Option<PathBuf>,
    pub metric: Option<DistanceMetric>,
    pub threshold: Option<f32>,
    pub cancel_after_absent_frames: Option<u32>,
    pub voice_command: Option<String>,
    pub confirmation: Option<String>,
}

impl Config {
    /// Load from `explicit` (must exist), else `FACEREG_CONFIG`, else
    /// `<data_dir>/faceregd.toml` if present; then apply the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match env("FACEREG_CONFIG") {
                Some(p) => (PathBuf::from(p), true),
                None => {
                    let dir = env("FACEREG_DATA_DIR")
                        .map(PathBuf::from)
                        .unwrap_or_else(facereg_core::default_data_dir);
                    (dir.join(CONFIG_FILE), false)
                }
            },
        };

        let file = match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse_file(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading config file {}", path.display()))
            }
        };

        Self::resolve(file, env)
    }

    pub fn parse_file(text: &str) -> Result<FileConfig> {
        Ok(toml::from_str(text)?)
    }

    /// Merge a parsed file with environment lookups. Environment wins.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("FACEREG_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(facereg_core::default_data_dir);

        let path_or = |key: &str, from_file: Option<PathBuf>, default: &str| {
            env(key)
                .map(PathBuf::from)
                .or(from_file)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let gallery_path = path_or("FACEREG_GALLERY_PATH", file.gallery_path, facereg_core::GALLERY_FILE);
        let db_path = path_or("FACEREG_DB_PATH", file.db_path, facereg_core::STORE_FILE);
        let feed_path = path_or("FACEREG_FEED_PATH", file.feed_path, FEED_FILE);

        let metric = match env("FACEREG_METRIC") {
            Some(v) => v.parse::<DistanceMetric>().map_err(anyhow::Error::msg)?,
            None => file.metric.unwrap_or_default(),
        };

        let threshold = check_threshold(
            parse_env(&env, "FACEREG_THRESHOLD")?
                .or(file.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
        )?;

        let cancel_after_absent_frames = parse_env(&env, "FACEREG_CANCEL_AFTER_ABSENT_FRAMES")?
            .or(file.cancel_after_absent_frames)
            .unwrap_or(15);

        let voice_command = env("FACEREG_VOICE_COMMAND")
            .or(file.voice_command)
            .filter(|c| !c.trim().is_empty());

        let confirmation = env("FACEREG_CONFIRMATION")
            .or(file.confirmation)
            .unwrap_or_else(|| facereg_core::enroll::DEFAULT_CONFIRMATION.to_string());

        Ok(Self {
            data_dir,
            gallery_path,
            db_path,
            feed_path,
            metric,
            threshold,
            cancel_after_absent_frames,
            voice_command,
            confirmation,
        })
    }
}

/// Reject a NaN, infinite or negative match threshold.
pub fn check_threshold(threshold: f32) -> Result<f32> {
    if !threshold.is_finite() || threshold < 0.0 {
        anyhow::bail!("threshold must be a non-negative number, got {threshold}");
    }
    Ok(threshold)
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={v}: {e}")),
        None => Ok(None),
    }
}
