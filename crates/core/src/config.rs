use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://emotion_monitor.db";
pub const DEFAULT_MODEL_PATH: &str = "models/emotion_classifier.onnx";
pub const DEFAULT_SEGMENT_SECS: f32 = 5.0;
pub const DEFAULT_TRIM_OFFSET_SECS: f32 = 0.6;
pub const DEFAULT_TRIM_MAX_SECS: f32 = 2.5;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 50;
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;
pub const ENV_LISTEN_ADDR: &str = "EMOTION_MONITOR_LISTEN";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MODEL_PATH: &str = "EMOTION_MODEL_PATH";
pub const ENV_SCALER_PATH: &str = "EMOTION_SCALER_PATH";
pub const ENV_SCRATCH_DIR: &str = "EMOTION_SCRATCH_DIR";
pub const ENV_DECODER: &str = "EMOTION_DECODER";

/// Where the SQLite database lives.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl StoreLocation {
    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://path`, `sqlite:path` or a bare path.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if url == ":memory:" || url == "sqlite::memory:" || url == "sqlite://:memory:" {
            return Ok(Self::Memory);
        }
        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if url.contains("://") {
            return Err(ConfigError::UnsupportedDatabaseUrl(url.to_owned()));
        } else {
            url
        };
        if path.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        Ok(Self::File(PathBuf::from(path)))
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("sqlite::memory:"),
            Self::File(p) => write!(f, "sqlite://{}", p.display()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DecoderKind {
    #[default]
    Symphonia,
    Ffmpeg,
}

impl FromStr for DecoderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symphonia" => Ok(Self::Symphonia),
            "ffmpeg" => Ok(Self::Ffmpeg),
            other => Err(ConfigError::UnknownDecoder(other.to_owned())),
        }
    }
}

/// Length of the windows a recording is cut into before scoring.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentLength {
    pub secs: f32,
}

impl SegmentLength {
    pub fn new(secs: f32) -> Result<Self, ConfigError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::InvalidSegmentLength(secs));
        }
        Ok(Self { secs })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.secs)
    }

    pub fn frames_for_sample_rate(&self, sample_rate_hz: u32) -> usize {
        let frames = (f64::from(self.secs) * f64::from(sample_rate_hz)).round();
        (frames as usize).max(1)
    }
}

impl Default for SegmentLength {
    fn default() -> Self {
        Self {
            secs: DEFAULT_SEGMENT_SECS,
        }
    }
}

/// Portion of each segment that is actually analysed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrimWindow {
    pub offset_secs: f32,
    pub max_secs: f32,
}

impl TrimWindow {
    pub fn new(offset_secs: f32, max_secs: f32) -> Result<Self, ConfigError> {
        if !offset_secs.is_finite() || offset_secs < 0.0 {
            return Err(ConfigError::InvalidTrimWindow(offset_secs, max_secs));
        }
        if !max_secs.is_finite() || max_secs <= 0.0 {
            return Err(ConfigError::InvalidTrimWindow(offset_secs, max_secs));
        }
        Ok(Self {
            offset_secs,
            max_secs,
        })
    }
}

impl Default for TrimWindow {
    fn default() -> Self {
        Self {
            offset_secs: DEFAULT_TRIM_OFFSET_SECS,
            max_secs: DEFAULT_TRIM_MAX_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub segment: SegmentLength,
    pub trim: TrimWindow,
    pub noise_seed: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: ANALYSIS_SAMPLE_RATE,
            segment: SegmentLength::default(),
            trim: TrimWindow::default(),
            noise_seed: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    pub store: StoreLocation,
    pub model_path: PathBuf,
    pub scaler_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub decoder: DecoderKind,
    pub analysis: AnalysisConfig,
    pub max_upload_bytes: usize,
    pub dry_run_classifier: bool,
}

impl ServiceConfig {
    pub fn scratch_root(&self) -> &Path {
        &self.scratch_dir
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("database url must not be empty")]
    EmptyDatabaseUrl,
    #[error("unsupported database url (expected sqlite): {0}")]
    UnsupportedDatabaseUrl(String),
    #[error("unknown decoder '{0}' (expected symphonia or ffmpeg)")]
    UnknownDecoder(String),
    #[error("segment length must be > 0 s, got {0}")]
    InvalidSegmentLength(f32),
    #[error("invalid trim window offset={0}s max={1}s")]
    InvalidTrimWindow(f32, f32),
    #[error("invalid listen address: {0}")]
    InvalidListenAddr(String),
    #[error("upload limit must be > 0 MB")]
    ZeroUploadLimit,
}

pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidListenAddr(value.to_owned()))
}

pub fn upload_limit_bytes(megabytes: usize) -> Result<usize, ConfigError> {
    if megabytes == 0 {
        return Err(ConfigError::ZeroUploadLimit);
    }
    Ok(megabytes.saturating_mul(1024 * 1024))
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key).filter(|v| !v.trim().is_empty()),
    }
}

pub fn resolve_scratch_dir(cli_value: Option<String>, env: &impl Env) -> PathBuf {
    resolve_optional_string(cli_value, ENV_SCRATCH_DIR, env)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
