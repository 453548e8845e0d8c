use chrono::{FixedOffset, NaiveTime};
use punchclock_core::Zone;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_MATCH_THRESHOLD: f32 = punchclock_core::types::DEFAULT_MATCH_THRESHOLD;
const DEFAULT_EMBEDDING_DIM: usize = 128;
const DEFAULT_LATE_CUTOFF: &str = "07:00";
const DEFAULT_RECENT_RECORDS: usize = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance a match must stay strictly below.
    pub match_threshold: f32,
    /// Length every enrolled embedding must have.
    pub embedding_dim: usize,
    /// Entries after this local time count as late.
    pub late_cutoff: NaiveTime,
    /// Deployment timezone used for calendar dates and report times.
    pub zone: Zone,
    /// Number of recent punches returned after a successful punch.
    pub recent_records: usize,
}

/// Optional TOML file; every key falls back to its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub embedding_dim: Option<usize>,
    pub late_cutoff: Option<String>,
    /// IANA zone name, e.g. `America/Sao_Paulo`.
    pub timezone: Option<String>,
    /// Fixed offset override; takes precedence over `timezone`.
    pub utc_offset_minutes: Option<i32>,
    pub recent_records: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load the file named by `PUNCHCLOCK_CONFIG` (if set), then apply
    /// `PUNCHCLOCK_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var("PUNCHCLOCK_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| match key {
            "TZ" => std::env::var(key).ok().or_else(system_zone_name),
            _ => std::env::var(key).ok(),
        })
    }

    /// Merge file values with overrides from `lookup`; overrides win.
    pub fn resolve(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let db_path = lookup("PUNCHCLOCK_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&lookup).join("attendance.db"));

        let late_cutoff = match lookup("PUNCHCLOCK_LATE_CUTOFF").or(file.late_cutoff) {
            Some(raw) => parse_clock("PUNCHCLOCK_LATE_CUTOFF", &raw)?,
            None => parse_clock("PUNCHCLOCK_LATE_CUTOFF", DEFAULT_LATE_CUTOFF)?,
        };

        let zone = resolve_zone(&lookup, file.utc_offset_minutes, file.timezone)?;

        let match_threshold = parsed::<f32>(&lookup, "PUNCHCLOCK_MATCH_THRESHOLD")?
            .or(file.match_threshold)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);
        if !(match_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "PUNCHCLOCK_MATCH_THRESHOLD",
                value: match_threshold.to_string(),
            });
        }

        let embedding_dim = parsed::<usize>(&lookup, "PUNCHCLOCK_EMBEDDING_DIM")?
            .or(file.embedding_dim)
            .unwrap_or(DEFAULT_EMBEDDING_DIM);
        if embedding_dim == 0 {
            return Err(ConfigError::Invalid {
                key: "PUNCHCLOCK_EMBEDDING_DIM",
                value: "0".into(),
            });
        }

        Ok(Self {
            db_path,
            match_threshold,
            embedding_dim,
            late_cutoff,
            zone,
            recent_records: parsed::<usize>(&lookup, "PUNCHCLOCK_RECENT_RECORDS")?
                .or(file.recent_records)
                .unwrap_or(DEFAULT_RECENT_RECORDS),
        })
    }
}

/// Offset override first, then a named zone, then the host zone from `TZ`,
/// then UTC. Environment values beat file values at each step.
fn resolve_zone(
    lookup: &impl Fn(&str) -> Option<String>,
    file_offset: Option<i32>,
    file_timezone: Option<String>,
) -> Result<Zone, ConfigError> {
    if let Some(minutes) =
        parsed::<i32>(lookup, "PUNCHCLOCK_UTC_OFFSET_MINUTES")?.or(file_offset)
    {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::Invalid {
                key: "PUNCHCLOCK_UTC_OFFSET_MINUTES",
                value: minutes.to_string(),
            })?;
        return Ok(Zone::Fixed(offset));
    }

    if let Some(name) = lookup("PUNCHCLOCK_TZ").or(file_timezone) {
        return Zone::from_name(&name).ok_or(ConfigError::Invalid {
            key: "PUNCHCLOCK_TZ",
            value: name,
        });
    }

    match lookup("TZ") {
        Some(name) => Ok(Zone::from_name(&name).unwrap_or_else(|| {
            tracing::warn!(tz = %name, "host timezone is not an IANA name; using UTC");
            Zone::default()
        })),
        None => Ok(Zone::default()),
    }
}

/// Zone name from the `/etc/localtime` symlink, e.g. `.../zoneinfo/Europe/Lisbon`.
fn system_zone_name() -> Option<String> {
    let target = std::fs::read_link("/etc/localtime").ok()?;
    let target = target.to_str()?;
    let (_, name) = target.split_once("zoneinfo/")?;
    Some(name.to_string())
}

fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("punchclock")
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

fn parse_clock(key: &'static str, raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}
