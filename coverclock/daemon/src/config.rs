//! TOML Configuration File Support
//!
//! Settings are layered from a TOML file at
//! `~/.config/coverclock/coverclock.toml`, environment variables and CLI
//! flags, then turned into the core's [`WatchSettings`].
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [home_assistant]
//! url = "https://ha.local:8123"
//! token = "eyJhbGciOi..."
//! entity_id = "media_player.living_room"
//! insecure_tls = false
//!
//! [display]
//! width = 32
//! height = 32
//! cover_fit = "cover"
//! clock_fit = "fit"
//! rotate = 0
//! output = "/run/coverclock/frame.png"
//! send_delay_ms = 200
//!
//! [timing]
//! min_cover_interval_ms = 1000
//! clock_interval_ms = 1000
//! reconnect_delay_ms = 2000
//! heartbeat_interval_secs = 30
//!
//! [clock]
//! sprite_sheet = "/usr/share/coverclock/clock.png"
//! timezone = "+02:00"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coverclock_core::{
    ConfigError, DisplaySettings, FitMode, HassSettings, TimeZoneSetting, TimingSettings,
    WatchSettings,
};

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[home_assistant]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantToml {
    /// Base URL, e.g. `https://ha.local:8123`
    pub url: Option<String>,
    /// Long-lived access token
    pub token: Option<String>,
    /// Watched media player
    pub entity_id: Option<String>,
    /// Skip TLS verification for REST calls
    pub insecure_tls: Option<bool>,
}

/// `[display]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Canvas width
    pub width: Option<u32>,
    /// Canvas height
    pub height: Option<u32>,
    /// Fit mode for covers
    pub cover_fit: Option<FitMode>,
    /// Fit mode for clock sprites
    pub clock_fit: Option<FitMode>,
    /// Counter-clockwise rotation in degrees
    pub rotate: Option<u16>,
    /// Mirror horizontally
    pub mirror: Option<bool>,
    /// Invert colors
    pub invert: Option<bool>,
    /// Where frames are written
    pub output: Option<PathBuf>,
    /// Delay handed to the sink per frame, in milliseconds
    pub send_delay_ms: Option<u64>,
}

/// `[timing]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingToml {
    /// Minimum time between cover renders while a cover shows
    pub min_cover_interval_ms: Option<u64>,
    /// Idle clock tick
    pub clock_interval_ms: Option<u64>,
    /// Delay between reconnect attempts
    pub reconnect_delay_ms: Option<u64>,
    /// WebSocket heartbeat interval
    pub heartbeat_interval_secs: Option<u64>,
    /// Bound on connect + auth + subscribe
    pub handshake_timeout_secs: Option<u64>,
}

/// `[clock]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockToml {
    /// 8x8 grid of 16x16 sprites
    pub sprite_sheet: Option<PathBuf>,
    /// `local` or a fixed offset such as `+02:00`
    pub timezone: Option<TimeZoneSetting>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverclockToml {
    /// Home Assistant connection
    pub home_assistant: HomeAssistantToml,
    /// Canvas and output
    pub display: DisplayToml,
    /// Intervals
    pub timing: TimingToml,
    /// Clock face
    pub clock: ClockToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Configuration after all layers have been applied
#[derive(Clone)]
pub struct DaemonConfig {
    /// Home Assistant base URL
    pub base_url: Option<String>,
    /// Access token
    pub token: Option<String>,
    /// Watched entity
    pub entity_id: Option<String>,
    /// Skip TLS verification for REST calls
    pub insecure_tls: bool,
    /// Intervals and delays
    pub timing: TimingSettings,
    /// Canvas and transforms
    pub display: DisplaySettings,
    /// Clock face time zone
    pub time_zone: TimeZoneSetting,
    /// Clock sprite sheet
    pub sprite_sheet: Option<PathBuf>,
    /// Frame output path
    pub output: PathBuf,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            entity_id: None,
            insecure_tls: false,
            timing: TimingSettings::default(),
            display: DisplaySettings::default(),
            time_zone: TimeZoneSetting::Local,
            sprite_sheet: None,
            output: default_output_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("entity_id", &self.entity_id)
            .field("insecure_tls", &self.insecure_tls)
            .field("timing", &self.timing)
            .field("display", &self.display)
            .field("time_zone", &self.time_zone)
            .field("sprite_sheet", &self.sprite_sheet)
            .field("output", &self.output)
            .field("config_file_path", &self.config_file_path)
            .field("source", &self.source)
            .finish()
    }
}

impl DaemonConfig {
    /// Highest-priority layer that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Core settings for the watch command
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the Home Assistant URL, token
    /// or entity is missing, or any value is out of range.
    pub fn watch_settings(&self) -> Result<WatchSettings, ConfigError> {
        let required = |value: &Option<String>, what: &str, hint: &str| {
            value.clone().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "missing {what}: set {hint} or the [home_assistant] section"
                ))
            })
        };

        WatchSettings {
            hass: HassSettings {
                base_url: required(&self.base_url, "Home Assistant URL", "--url / HASS_URL")?,
                token: required(&self.token, "access token", "--token / HASS_TOKEN")?,
                entity_id: required(&self.entity_id, "entity id", "--entity / HASS_ENTITY")?,
                insecure_tls: self.insecure_tls,
            },
            timing: self.timing,
            display: self.display,
            time_zone: self.time_zone,
        }
        .validated()
    }

    /// Sprite sheet path, required by both commands
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if no sheet was configured.
    pub fn sprite_sheet(&self) -> Result<&Path, ConfigError> {
        self.sprite_sheet.as_deref().ok_or_else(|| {
            ConfigError::Validation(
                "missing clock sprite sheet: set --sprite-sheet, COVERCLOCK_SPRITE_SHEET or [clock] sprite_sheet"
                    .to_string(),
            )
        })
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/coverclock/coverclock.toml` or
/// `~/.config/coverclock/coverclock.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("coverclock").join("coverclock.toml"))
}

/// Default frame output: `$XDG_RUNTIME_DIR/coverclock/frame.png`, else the temp dir
fn default_output_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("coverclock")
        .join("frame.png")
}

/// Load configuration from a file and the process environment
///
/// A missing file is not an error; defaults are used.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DaemonConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config_from_path`] with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DaemonConfig, ConfigError> {
    let mut config = DaemonConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: CoverclockToml =
                toml::from_str(&toml_content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DaemonConfig, toml: CoverclockToml) {
    let ha = toml.home_assistant;
    if ha.url.is_some() {
        config.base_url = ha.url;
    }
    if ha.token.is_some() {
        config.token = ha.token;
    }
    if ha.entity_id.is_some() {
        config.entity_id = ha.entity_id;
    }
    if let Some(insecure) = ha.insecure_tls {
        config.insecure_tls = insecure;
    }

    let display = toml.display;
    if let Some(width) = display.width {
        config.display.width = width;
    }
    if let Some(height) = display.height {
        config.display.height = height;
    }
    if let Some(fit) = display.cover_fit {
        config.display.cover_fit = fit;
    }
    if let Some(fit) = display.clock_fit {
        config.display.clock_fit = fit;
    }
    if let Some(rotate) = display.rotate {
        config.display.rotate = rotate;
    }
    if let Some(mirror) = display.mirror {
        config.display.mirror = mirror;
    }
    if let Some(invert) = display.invert {
        config.display.invert = invert;
    }
    if let Some(output) = display.output {
        config.output = output;
    }
    if let Some(ms) = display.send_delay_ms {
        config.timing.send_delay = Duration::from_millis(ms);
    }

    let timing = toml.timing;
    if let Some(ms) = timing.min_cover_interval_ms {
        config.timing.min_cover_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = timing.clock_interval_ms {
        config.timing.clock_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = timing.reconnect_delay_ms {
        config.timing.reconnect_delay = Duration::from_millis(ms);
    }
    if let Some(secs) = timing.heartbeat_interval_secs {
        config.timing.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = timing.handshake_timeout_secs {
        config.timing.handshake_timeout = Duration::from_secs(secs);
    }

    if toml.clock.sprite_sheet.is_some() {
        config.sprite_sheet = toml.clock.sprite_sheet;
    }
    if let Some(zone) = toml.clock.timezone {
        config.time_zone = zone;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut DaemonConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(url) = env("HASS_URL") {
        config.base_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(token) = env("HASS_TOKEN") {
        config.token = Some(token);
        config.source = ConfigSource::Env;
    }
    if let Some(entity) = env("HASS_ENTITY") {
        config.entity_id = Some(entity);
        config.source = ConfigSource::Env;
    }
    if let Some(insecure) = env("COVERCLOCK_INSECURE_TLS") {
        config.insecure_tls = insecure != "0" && !insecure.eq_ignore_ascii_case("false");
        config.source = ConfigSource::Env;
    }
    if let Some(output) = env("COVERCLOCK_OUTPUT") {
        config.output = PathBuf::from(output);
        config.source = ConfigSource::Env;
    }
    if let Some(sheet) = env("COVERCLOCK_SPRITE_SHEET") {
        config.sprite_sheet = Some(PathBuf::from(sheet));
        config.source = ConfigSource::Env;
    }
    if let Some(zone) = env("COVERCLOCK_TIMEZONE") {
        match zone.parse() {
            Ok(zone) => {
                config.time_zone = zone;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring COVERCLOCK_TIMEZONE"),
        }
    }

    let millis = |key: &str| {
        let raw = env(key)?;
        match raw.parse::<u64>() {
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "Ignoring non-numeric value");
                None
            }
        }
    };
    if let Some(interval) = millis("COVERCLOCK_MIN_COVER_INTERVAL_MS") {
        config.timing.min_cover_interval = interval;
        config.source = ConfigSource::Env;
    }
    if let Some(interval) = millis("COVERCLOCK_CLOCK_INTERVAL_MS") {
        config.timing.clock_interval = interval;
        config.source = ConfigSource::Env;
    }
    if let Some(delay) = millis("COVERCLOCK_RECONNECT_DELAY_MS") {
        config.timing.reconnect_delay = delay;
        config.source = ConfigSource::Env;
    }
    if let Some(interval) = millis("COVERCLOCK_HEARTBEAT_INTERVAL_MS") {
        config.timing.heartbeat_interval = interval;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Values given on the command line
///
/// Apply after loading so they win over every other layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Home Assistant base URL
    pub base_url: Option<String>,
    /// Access token
    pub token: Option<String>,
    /// Watched entity
    pub entity_id: Option<String>,
    /// Skip TLS verification for REST calls
    pub insecure_tls: Option<bool>,
    /// Frame output path
    pub output: Option<PathBuf>,
    /// Clock sprite sheet
    pub sprite_sheet: Option<PathBuf>,
    /// Clock face time zone
    pub time_zone: Option<TimeZoneSetting>,
    /// Canvas width
    pub width: Option<u32>,
    /// Canvas height
    pub height: Option<u32>,
    /// Fit mode for covers
    pub cover_fit: Option<FitMode>,
    /// Fit mode for clock sprites
    pub clock_fit: Option<FitMode>,
    /// Rotation in degrees
    pub rotate: Option<u16>,
    /// Mirror horizontally
    pub mirror: Option<bool>,
    /// Invert colors
    pub invert: Option<bool>,
    /// Sink delay
    pub send_delay: Option<Duration>,
    /// Minimum time between cover renders
    pub min_cover_interval: Option<Duration>,
    /// Idle clock tick
    pub clock_interval: Option<Duration>,
    /// Delay between reconnect attempts
    pub reconnect_delay: Option<Duration>,
    /// WebSocket heartbeat interval
    pub heartbeat_interval: Option<Duration>,
}

impl ConfigOverrides {
    /// Apply every set override
    pub fn apply_to(self, config: &mut DaemonConfig) {
        if self != Self::default() {
            config.source = ConfigSource::Cli;
        }

        if self.base_url.is_some() {
            config.base_url = self.base_url;
        }
        if self.token.is_some() {
            config.token = self.token;
        }
        if self.entity_id.is_some() {
            config.entity_id = self.entity_id;
        }
        if let Some(insecure) = self.insecure_tls {
            config.insecure_tls = insecure;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if self.sprite_sheet.is_some() {
            config.sprite_sheet = self.sprite_sheet;
        }
        if let Some(zone) = self.time_zone {
            config.time_zone = zone;
        }
        if let Some(width) = self.width {
            config.display.width = width;
        }
        if let Some(height) = self.height {
            config.display.height = height;
        }
        if let Some(fit) = self.cover_fit {
            config.display.cover_fit = fit;
        }
        if let Some(fit) = self.clock_fit {
            config.display.clock_fit = fit;
        }
        if let Some(rotate) = self.rotate {
            config.display.rotate = rotate;
        }
        if let Some(mirror) = self.mirror {
            config.display.mirror = mirror;
        }
        if let Some(invert) = self.invert {
            config.display.invert = invert;
        }
        if let Some(delay) = self.send_delay {
            config.timing.send_delay = delay;
        }
        if let Some(interval) = self.min_cover_interval {
            config.timing.min_cover_interval = interval;
        }
        if let Some(interval) = self.clock_interval {
            config.timing.clock_interval = interval;
        }
        if let Some(delay) = self.reconnect_delay {
            config.timing.reconnect_delay = delay;
        }
        if let Some(interval) = self.heartbeat_interval {
            config.timing.heartbeat_interval = interval;
        }
    }
}
