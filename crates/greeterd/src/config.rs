use greeter_core::{AfterTalk, MachineConfig, Surface, TalkEnd};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Daemon configuration: an optional TOML file overridden by `GREETER_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sidecar detector command line.
    pub detector_cmd: String,
    /// Per-request detector timeout.
    pub detector_timeout_ms: u64,
    /// Detection poll interval.
    pub detection_interval_ms: u64,
    /// Render/update ticks per second.
    pub tick_hz: u32,
    /// Capture surface size, for ROI math.
    pub surface: Surface,
    pub machine: MachineConfig,
    pub content_path: PathBuf,
    /// Directory holding the audio clips named by the content file.
    pub assets_dir: PathBuf,
    pub player_cmd: String,
    pub tts_cmd: Option<String>,
    pub db_path: PathBuf,
}

/// Shape of the optional TOML file. Top-level keys mirror the environment
/// variables without the `GREETER_` prefix; `[machine]` holds the full
/// state machine tuning.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub detector_cmd: Option<String>,
    pub detector_timeout_ms: Option<u64>,
    pub detection_interval_ms: Option<u64>,
    pub tick_hz: Option<u32>,
    pub surface_width: Option<u32>,
    pub surface_height: Option<u32>,
    pub content_path: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
    pub player_cmd: Option<String>,
    pub tts_cmd: Option<String>,
    pub db_path: Option<PathBuf>,
    pub machine: MachineConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

impl Config {
    /// Load from the process environment, reading `GREETER_CONFIG` first if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let file = match lookup("GREETER_CONFIG") {
            Some(path) => FileConfig::load(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, lookup))
    }

    /// Merge `file` with variables from `env`; variables win.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("greeter");

        let path = |key: &str, from_file: Option<PathBuf>, default: &str| {
            env(key)
                .map(PathBuf::from)
                .or(from_file)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let mut machine = file.machine;
        let filter = &mut machine.filter;
        override_with(&env, "GREETER_MIN_PROBABILITY", &mut filter.min_probability);
        override_with(&env, "GREETER_MIN_FACE_FRAC", &mut filter.min_face_frac);
        override_flag(&env, "GREETER_USE_ROI", &mut filter.use_roi);
        override_with(&env, "GREETER_STABLE_FRAMES", &mut machine.stable_frames);
        override_with(&env, "GREETER_WAVE_MS", &mut machine.wave_ms);
        override_with::<TalkEnd>(&env, "GREETER_TALK_END", &mut machine.talk_end);
        override_with::<AfterTalk>(&env, "GREETER_AFTER_TALK", &mut machine.after_talk);
        override_with(&env, "GREETER_COOLDOWN_MS", &mut machine.cooldown_ms);
        override_with(&env, "GREETER_SILENCE_MS", &mut machine.silence_ms);
        override_flag(
            &env,
            "GREETER_SILENCE_CLEARS_ON_ABSENCE",
            &mut machine.silence_clears_on_absence,
        );
        override_with(&env, "GREETER_LONG_DWELL_TICKS", &mut machine.long_dwell_ticks);
        if let Some(category) = env("GREETER_CATEGORY") {
            machine.category_override = Some(category).filter(|c| !c.trim().is_empty());
        }

        let defaults = Surface::default();
        Self {
            detector_cmd: env("GREETER_DETECTOR_CMD")
                .or(file.detector_cmd)
                .unwrap_or_else(|| "greeter-detector".to_string()),
            detector_timeout_ms: parsed(&env, "GREETER_DETECTOR_TIMEOUT_MS")
                .or(file.detector_timeout_ms)
                .unwrap_or(2000),
            detection_interval_ms: parsed(&env, "GREETER_DETECTION_INTERVAL_MS")
                .or(file.detection_interval_ms)
                .unwrap_or(80),
            tick_hz: parsed(&env, "GREETER_TICK_HZ")
                .or(file.tick_hz)
                .unwrap_or(30),
            surface: Surface::new(
                parsed(&env, "GREETER_SURFACE_WIDTH")
                    .or(file.surface_width)
                    .unwrap_or(defaults.width),
                parsed(&env, "GREETER_SURFACE_HEIGHT")
                    .or(file.surface_height)
                    .unwrap_or(defaults.height),
            ),
            machine,
            content_path: path("GREETER_CONTENT_PATH", file.content_path, "compliments.json"),
            assets_dir: path("GREETER_ASSETS_DIR", file.assets_dir, "sfx"),
            player_cmd: env("GREETER_PLAYER_CMD")
                .or(file.player_cmd)
                .unwrap_or_else(|| "mpg123 -q".to_string()),
            tts_cmd: env("GREETER_TTS_CMD")
                .or(file.tts_cmd)
                .filter(|c| !c.trim().is_empty()),
            db_path: path("GREETER_DB_PATH", file.db_path, "stats.db"),
        }
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "ignoring unparseable setting");
            None
        }
    }
}

fn override_with<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(v) = parsed(env, key) {
        *slot = v;
    }
}

fn override_flag(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(v) = env(key) {
        *slot = v.trim() != "0";
    }
}
