//! Configuration loader and validator for the content index.
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub site: Site,
    pub index: Index,
    #[serde(default)]
    pub background: Background,
}

/// Site-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub url: String,
    #[serde(default)]
    pub timezone: Timezone,
    /// Debug mode never sends real outbound notifications.
    #[serde(default)]
    pub debug: bool,
}

/// Content indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    pub database: String,
    pub content_folder: PathBuf,
    /// Seconds between automatic rescans; 0 disables them.
    #[serde(default = "default_rescan_interval")]
    pub index_rescan_interval: u64,
    #[serde(default = "default_index_threads")]
    pub max_index_threads: usize,
}

/// Background worker pool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Background {
    pub max_worker_threads: Option<usize>,
}

fn default_rescan_interval() -> u64 {
    7200
}

fn default_index_threads() -> usize {
    4
}

impl Background {
    /// Configured pool size, or twice the available parallelism.
    pub fn worker_count(&self) -> usize {
        self.max_worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
        })
    }
}

/// Zone applied to entry dates that do not carry one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum Timezone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl Timezone {
    /// Accepts `local`, `utc`, `Z` or a `+HH:MM`/`-HHMM` offset.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("local") {
            return Some(Timezone::Local);
        }
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return FixedOffset::east_opt(0).map(Timezone::Fixed);
        }
        let (sign, rest) = match s.as_bytes().first()? {
            b'+' => (1, &s[1..]),
            b'-' => (-1, &s[1..]),
            _ => return None,
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        if minutes >= 60 {
            return None;
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Timezone::Fixed)
    }

    /// Attach this zone to a naive local time.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Timezone::Fixed(offset) => offset.from_local_datetime(&naive).single(),
            Timezone::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&dt.offset().fix())),
        }
    }

    /// Express a UTC instant in this zone.
    pub fn from_utc(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Timezone::Fixed(offset) => instant.with_timezone(offset),
            Timezone::Local => {
                let local = instant.with_timezone(&Local);
                local.with_timezone(&local.offset().fix())
            }
        }
    }
}

impl TryFrom<String> for Timezone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Timezone::parse(&value).ok_or_else(|| format!("unrecognized timezone {value:?}"))
    }
}

impl From<Timezone> for String {
    fn from(tz: Timezone) -> Self {
        match tz {
            Timezone::Local => "local".to_string(),
            Timezone::Fixed(offset) => offset.to_string(),
        }
    }
}

impl Config {
    /// Ensure the content folder exists so a fresh install scans cleanly.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.index.content_folder)
    }

    /// Database URL, honoring a `DATABASE_URL` override.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.index.database.clone())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let url = cfg.site.url.trim();
    if url.is_empty() {
        return Err(ConfigError::Invalid("site.url must be non-empty"));
    }
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => return Err(ConfigError::Invalid("site.url must be an absolute http(s) URL")),
    }

    if cfg.index.database.trim().is_empty() {
        return Err(ConfigError::Invalid("index.database must be non-empty"));
    }
    if cfg.index.content_folder.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("index.content_folder must be non-empty"));
    }
    if cfg.index.max_index_threads == 0 {
        return Err(ConfigError::Invalid("index.max_index_threads must be > 0"));
    }
    if cfg.background.max_worker_threads == Some(0) {
        return Err(ConfigError::Invalid("background.max_worker_threads must be > 0"));
    }

    Ok(())
}

/// Example configuration, also used as the test fixture.
pub fn example() -> &'static str {
    r#"site:
  url: "https://example.com/"
  timezone: "local"
  debug: false

index:
  database: "sqlite://./data/index.db"
  content_folder: "content"
  index_rescan_interval: 7200
  max_index_threads: 4

background:
  max_worker_threads: null
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.index.index_rescan_interval, 7200);
        assert_eq!(cfg.site.timezone, Timezone::Local);
        assert!(cfg.background.worker_count() >= 1);
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let yaml = r#"site:
  url: "https://example.com/"
index:
  database: "sqlite::memory:"
  content_folder: "content"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.index.index_rescan_interval, 7200);
        assert_eq!(cfg.index.max_index_threads, 4);
        assert!(!cfg.site.debug);
        assert_eq!(cfg.background.max_worker_threads, None);
    }

    #[test]
    fn invalid_site_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.site.url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("site.url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.site.url = "ftp://example.com/".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_pool_sizes() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.index.max_index_threads = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("max_index_threads")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.background.max_worker_threads = Some(0);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn timezone_forms() {
        assert_eq!(Timezone::parse("local"), Some(Timezone::Local));
        assert_eq!(
            Timezone::parse("UTC"),
            Some(Timezone::Fixed(FixedOffset::east_opt(0).unwrap()))
        );
        assert_eq!(
            Timezone::parse("-08:00"),
            Some(Timezone::Fixed(FixedOffset::west_opt(8 * 3600).unwrap()))
        );
        assert_eq!(
            Timezone::parse("+0530"),
            Some(Timezone::Fixed(FixedOffset::east_opt(5 * 3600 + 1800).unwrap()))
        );
        assert_eq!(Timezone::parse("Mars/Olympus"), None);
        assert_eq!(Timezone::parse("+25:99"), None);

        let yaml = example().replace("\"local\"", "\"bogus\"");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn localize_fixed_offset() {
        let tz = Timezone::parse("-08:00").unwrap();
        let naive = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let dt = tz.localize(naive).unwrap();
        assert_eq!(dt.to_rfc3339(), "2020-01-01T12:00:00-08:00");
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.site.url, "https://example.com/");
        assert_eq!(cfg.index.content_folder, PathBuf::from("content"));
    }

    #[test]
    fn ensure_dirs_creates_content_folder() {
        let td = tempdir().unwrap();
        let content = td.path().join("content");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.index.content_folder = content.clone();
        cfg.ensure_dirs().unwrap();
        assert!(content.exists());
    }
}
