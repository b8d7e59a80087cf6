//! Watch Settings
//!
//! Everything the core needs to run, already resolved by the caller. The
//! core never reads files or environment variables; the daemon layers CLI,
//! environment, TOML and defaults and hands over a [`WatchSettings`].
//!
//! # Floors
//!
//! Timing values below their floor are raised silently:
//!
//! | setting | floor |
//! |---|---|
//! | heartbeat interval | 5 s |
//! | reconnect delay | 0.5 s |
//! | clock tick | 50 ms |
//! | min cover interval | 0 |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use chrono_tz::Tz;
use image::imageops::FilterType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::display::{FitMode, LocalWallClock, PrepareOptions};
use crate::hass::client::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, MIN_HEARTBEAT_INTERVAL,
};
use crate::hass::supervisor::{DEFAULT_RECONNECT_DELAY, MIN_RECONNECT_DELAY};
use crate::hass::BaseUrl;

/// Lowest accepted idle clock tick
pub const MIN_CLOCK_INTERVAL: Duration = Duration::from_millis(50);

/// Errors raised while assembling settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// A config file or value could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A value is out of range or missing
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

// =============================================================================
// Home Assistant
// =============================================================================

/// Connection details for one Home Assistant instance and entity
#[derive(Clone, PartialEq, Eq)]
pub struct HassSettings {
    /// `http(s)://host[:port]`
    pub base_url: String,
    /// Long-lived access token
    pub token: String,
    /// Watched media player, e.g. `media_player.living_room`
    pub entity_id: String,
    /// Skip certificate verification for REST calls
    pub insecure_tls: bool,
}

impl fmt::Debug for HassSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HassSettings")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("entity_id", &self.entity_id)
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

impl HassSettings {
    /// Parsed base URL
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for malformed URLs.
    pub fn base_url(&self) -> Result<BaseUrl, ConfigError> {
        BaseUrl::parse(&self.base_url).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Check that all fields are usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Home Assistant access token is empty".to_string(),
            ));
        }
        let entity = self.entity_id.trim();
        if entity.is_empty() || !entity.contains('.') {
            return Err(ConfigError::Validation(format!(
                "'{}' is not an entity id (expected domain.object_id)",
                self.entity_id
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Timing
// =============================================================================

/// Intervals and delays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingSettings {
    /// Minimum time between two cover renders while showing a cover
    pub min_cover_interval: Duration,
    /// Idle clock tick
    pub clock_interval: Duration,
    /// Delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// WebSocket heartbeat interval
    pub heartbeat_interval: Duration,
    /// Bound on connect + auth + subscribe
    pub handshake_timeout: Duration,
    /// Inter-stage delay passed to every sink call
    pub send_delay: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            min_cover_interval: Duration::from_secs(1),
            clock_interval: Duration::from_secs(1),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            send_delay: Duration::from_millis(200),
        }
    }
}

impl TimingSettings {
    /// Raise every value to its floor
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            clock_interval: self.clock_interval.max(MIN_CLOCK_INTERVAL),
            reconnect_delay: self.reconnect_delay.max(MIN_RECONNECT_DELAY),
            heartbeat_interval: self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
            ..self
        }
    }
}

// =============================================================================
// Display
// =============================================================================

/// Canvas geometry and transforms
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySettings {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// How covers are fitted
    pub cover_fit: FitMode,
    /// How clock sprites are fitted
    pub clock_fit: FitMode,
    /// Counter-clockwise rotation in degrees, modulo 360
    pub rotate: u16,
    /// Mirror horizontally
    pub mirror: bool,
    /// Invert colors
    pub invert: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 32,
            height: 32,
            cover_fit: FitMode::Fit,
            clock_fit: FitMode::Fit,
            rotate: 0,
            mirror: false,
            invert: false,
        }
    }
}

impl DisplaySettings {
    /// Check the canvas size
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for a zero-sized canvas.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Validation(format!(
                "canvas must be at least 1x1, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Preparation options for cover art (Lanczos resampling)
    #[must_use]
    pub fn cover_options(&self) -> PrepareOptions {
        PrepareOptions::new(self.width, self.height)
            .with_fit(self.cover_fit)
            .with_rotate(self.rotate)
            .with_flags(self.mirror, self.invert)
    }

    /// Preparation options for clock sprites (nearest-neighbour resampling)
    #[must_use]
    pub fn clock_options(&self) -> PrepareOptions {
        PrepareOptions::new(self.width, self.height)
            .with_fit(self.clock_fit)
            .with_rotate(self.rotate)
            .with_flags(self.mirror, self.invert)
            .with_filter(FilterType::Nearest)
    }
}

// =============================================================================
// Time zone
// =============================================================================

/// Time zone the clock face follows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeZoneSetting {
    /// Host local time
    #[default]
    Local,
    /// Fixed UTC offset
    Fixed(FixedOffset),
    /// IANA zone such as `Europe/Warsaw`
    Named(Tz),
}

impl TimeZoneSetting {
    /// Wall clock for this setting
    #[must_use]
    pub fn wall_clock(&self) -> LocalWallClock {
        match self {
            Self::Local => LocalWallClock::local(),
            Self::Fixed(offset) => LocalWallClock::with_offset(*offset),
            Self::Named(tz) => LocalWallClock::in_zone(*tz),
        }
    }
}

impl fmt::Display for TimeZoneSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Fixed(offset) => write!(f, "{offset}"),
            Self::Named(tz) => f.write_str(tz.name()),
        }
    }
}

impl FromStr for TimeZoneSetting {
    type Err = ConfigError;

    /// Accepts `local`, `auto` or empty, `utc`, `Z`, an offset (`+HH:MM`,
    /// `-HH:MM`, `+HHMM`, `+HH`) or an IANA name such as `Europe/Warsaw`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || {
            ConfigError::Parse(format!(
                "'{s}' is not a timezone (use 'local', an offset like '+02:00' or a name like 'Europe/Warsaw')"
            ))
        };

        if s.is_empty() || s.eq_ignore_ascii_case("local") || s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Local);
        }
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return FixedOffset::east_opt(0).map(Self::Fixed).ok_or_else(invalid);
        }

        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return s.parse::<Tz>().map(Self::Named).map_err(|_| invalid()),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let (hours, minutes) = match digits.len() {
            1 | 2 => (digits.as_str(), "0"),
            4 => digits.split_at(2),
            _ => return Err(invalid()),
        };
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::Fixed)
            .ok_or_else(invalid)
    }
}

impl Serialize for TimeZoneSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeZoneSetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Everything together
// =============================================================================

/// Complete settings for a watch session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchSettings {
    /// Home Assistant connection
    pub hass: HassSettings,
    /// Intervals and delays
    pub timing: TimingSettings,
    /// Canvas and transforms
    pub display: DisplaySettings,
    /// Clock face time zone
    pub time_zone: TimeZoneSetting,
}

impl WatchSettings {
    /// Settings with default timing and display for one instance and entity
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            hass: HassSettings {
                base_url: base_url.into(),
                token: token.into(),
                entity_id: entity_id.into(),
                insecure_tls: false,
            },
            timing: TimingSettings::default(),
            display: DisplaySettings::default(),
            time_zone: TimeZoneSetting::Local,
        }
    }

    /// Validate every section and clamp timing to its floors
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Validation`] found.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.hass.validate()?;
        self.display.validate()?;
        self.timing = self.timing.clamped();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let timing = TimingSettings::default();
        assert_eq!(timing.min_cover_interval, Duration::from_secs(1));
        assert_eq!(timing.clock_interval, Duration::from_secs(1));
        assert_eq!(timing.reconnect_delay, Duration::from_secs(2));
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(timing.send_delay, Duration::from_millis(200));

        let display = DisplaySettings::default();
        assert_eq!((display.width, display.height), (32, 32));
        assert_eq!(display.cover_fit, FitMode::Fit);
        assert_eq!(display.clock_fit, FitMode::Fit);
    }

    #[test]
    fn test_clamping_applies_floors() {
        let timing = TimingSettings {
            min_cover_interval: Duration::ZERO,
            clock_interval: Duration::from_millis(1),
            reconnect_delay: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(1),
            ..TimingSettings::default()
        }
        .clamped();

        assert_eq!(timing.min_cover_interval, Duration::ZERO);
        assert_eq!(timing.clock_interval, MIN_CLOCK_INTERVAL);
        assert_eq!(timing.reconnect_delay, Duration::from_millis(500));
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_hass_validation() {
        let settings = WatchSettings::new("http://ha.local:8123", "token", "media_player.den");
        assert!(settings.clone().validated().is_ok());

        let mut bad = settings.clone();
        bad.hass.base_url = "ha.local".into();
        assert!(matches!(bad.validated(), Err(ConfigError::Validation(_))));

        let mut bad = settings.clone();
        bad.hass.token = "  ".into();
        assert!(bad.validated().is_err());

        let mut bad = settings;
        bad.hass.entity_id = "den".into();
        assert!(bad.validated().is_err());
    }

    #[test]
    fn test_display_validation() {
        let mut display = DisplaySettings::default();
        display.rotate = 270;
        assert!(display.validate().is_ok());
        display.rotate = 45;
        assert!(display.validate().is_ok());
        display.rotate = 0;
        display.width = 0;
        assert!(display.validate().is_err());
    }

    #[test]
    fn test_prepare_options_per_content() {
        let display = DisplaySettings {
            cover_fit: FitMode::Cover,
            clock_fit: FitMode::Scale,
            rotate: 90,
            mirror: true,
            ..DisplaySettings::default()
        };
        let cover = display.cover_options();
        assert_eq!(cover.fit, FitMode::Cover);
        assert_eq!(cover.filter, FilterType::Lanczos3);
        assert_eq!(cover.rotate, 90);
        assert!(cover.mirror);

        let clock = display.clock_options();
        assert_eq!(clock.fit, FitMode::Scale);
        assert_eq!(clock.filter, FilterType::Nearest);
    }

    #[test]
    fn test_time_zone_parsing() {
        assert_eq!("local".parse::<TimeZoneSetting>().unwrap(), TimeZoneSetting::Local);
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!("UTC".parse::<TimeZoneSetting>().unwrap(), TimeZoneSetting::Fixed(utc));

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        for raw in ["+02:00", "+0200", "+2"] {
            assert_eq!(raw.parse::<TimeZoneSetting>().unwrap(), TimeZoneSetting::Fixed(plus_two));
        }
        let minus = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!("-05:30".parse::<TimeZoneSetting>().unwrap(), TimeZoneSetting::Fixed(minus));

        for raw in ["auto", "AUTO", ""] {
            assert_eq!(raw.parse::<TimeZoneSetting>().unwrap(), TimeZoneSetting::Local);
        }
        assert_eq!(
            "Europe/Berlin".parse::<TimeZoneSetting>().unwrap(),
            TimeZoneSetting::Named(chrono_tz::Europe::Berlin)
        );

        for raw in ["Mars/Olympus_Mons", "+25:00", "+02:75", "+"] {
            assert!(raw.parse::<TimeZoneSetting>().is_err(), "{raw}");
        }
    }

    #[test]
    fn test_time_zone_display_round_trips() {
        let zone: TimeZoneSetting = "+02:00".parse().unwrap();
        assert_eq!(zone.to_string(), "+02:00");
        assert_eq!(zone.to_string().parse::<TimeZoneSetting>().unwrap(), zone);
        assert_eq!(TimeZoneSetting::Local.to_string(), "local");

        let warsaw: TimeZoneSetting = " Europe/Warsaw ".parse().unwrap();
        assert_eq!(warsaw.to_string(), "Europe/Warsaw");
        assert_eq!(warsaw.to_string().parse::<TimeZoneSetting>().unwrap(), warsaw);
    }

    #[test]
    fn test_settings_debug_redacts_token() {
        let settings = WatchSettings::new("http://ha.local", "very-secret", "media_player.den");
        assert!(!format!("{settings:?}").contains("very-secret"));
    }
}
