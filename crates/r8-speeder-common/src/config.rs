//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Shared primitives and utilities for the speed monitor."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use toml::{Table, Value};

use crate::logging::LogFormat;

fn default_alert_margin() -> f64 {
    5.0
}

fn default_over_margin() -> f64 {
    20.0
}

fn default_sustained_duration() -> Duration {
    Duration::from_secs(300)
}

fn default_hard_couple_speed() -> f64 {
    7.0
}

fn default_priority_bonus() -> f64 {
    25.0
}

fn default_priority_tokens() -> Vec<String> {
    split_tokens("991,981,119,198,Super")
}

fn default_special_route_bonus() -> f64 {
    20.0
}

fn default_special_route_prefix() -> String {
    "320".to_owned()
}

fn default_confirmation_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_hysteresis() -> f64 {
    1.0
}

fn default_stale_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_reaper_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_stopped_epsilon() -> f64 {
    0.01
}

fn default_self_name() -> String {
    "R8Speeder".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_replay_speedup() -> f64 {
    1.0
}

/// Split a comma separated token list, dropping blanks.
pub fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Primary configuration object for the speed monitor.
///
/// Loading is lenient: every entry is read on its own and an entry
/// that is missing or malformed keeps its documented default. The problems found
/// along the way are returned in [`LoadedConfig::warnings`] so they can be logged
/// once tracing is up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpeederConfig {
    pub limits: LimitsConfig,
    pub tracker: TrackerConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
    pub feed: FeedConfig,
}

/// Metadata describing where a [`SpeederConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SpeederConfig,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl SpeederConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R8_SPEEDER_CONFIG";

    /// Load configuration from disk, respecting the `R8_SPEEDER_CONFIG` override.
    ///
    /// Never fails. Without a readable file the defaults are returned.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> LoadedConfig {
        let mut warnings = Vec::new();
        let env_path = std::env::var(Self::ENV_CONFIG_PATH)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let path = env_path.or_else(|| {
            candidates
                .iter()
                .map(|candidate| candidate.as_ref().to_path_buf())
                .find(|candidate| candidate.exists())
        });

        let Some(path) = path else {
            warnings.push(format!(
                "no configuration file found (inspected: {}); using defaults",
                candidates
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            return LoadedConfig {
                config: Self::default(),
                source: None,
                warnings,
            };
        };

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let config = Self::from_toml_lenient(&contents, &mut warnings);
                LoadedConfig {
                    config,
                    source: Some(path),
                    warnings,
                }
            }
            Err(err) => {
                warnings.push(format!(
                    "unable to read config file {}: {}; using defaults",
                    path.display(),
                    err
                ));
                LoadedConfig {
                    config: Self::default(),
                    source: None,
                    warnings,
                }
            }
        }
    }

    /// Parse TOML content, falling back to defaults field by field.
    pub fn from_toml_lenient(contents: &str, warnings: &mut Vec<String>) -> Self {
        let root = match toml::from_str::<Table>(contents) {
            Ok(root) => root,
            Err(err) => {
                warnings.push(format!("failed to parse configuration: {}; using defaults", err));
                return Self::default();
            }
        };

        let limits = LimitsConfig::read(&mut SectionReader::new(&root, "limits", warnings));
        let tracker = TrackerConfig::read(&mut SectionReader::new(&root, "tracker", warnings));
        let notifications =
            NotificationConfig::read(&mut SectionReader::new(&root, "notifications", warnings));
        let logging = LoggingConfig::read(&mut SectionReader::new(&root, "logging", warnings));
        let feed = FeedConfig::read(&mut SectionReader::new(&root, "feed", warnings));
        let config = Self {
            limits,
            tracker,
            notifications,
            logging,
            feed,
        };
        config.normalise(warnings)
    }

    /// Replace out-of-range values with their defaults.
    pub fn normalise(mut self, warnings: &mut Vec<String>) -> Self {
        let limits = &mut self.limits;
        reset_if(
            &mut limits.alert_margin_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_alert_margin(),
            "limits.alert_margin_mph",
            warnings,
        );
        reset_if(
            &mut limits.over_margin_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_over_margin(),
            "limits.over_margin_mph",
            warnings,
        );
        reset_if(
            &mut limits.hard_couple_speed_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_hard_couple_speed(),
            "limits.hard_couple_speed_mph",
            warnings,
        );
        reset_if(
            &mut limits.priority_bonus_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_priority_bonus(),
            "limits.priority_bonus_mph",
            warnings,
        );
        reset_if(
            &mut limits.special_route_bonus_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_special_route_bonus(),
            "limits.special_route_bonus_mph",
            warnings,
        );

        let tracker = &mut self.tracker;
        reset_if(
            &mut tracker.hysteresis_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_hysteresis(),
            "tracker.hysteresis_mph",
            warnings,
        );
        reset_if(
            &mut tracker.stopped_epsilon_mph,
            |v| !v.is_finite() || *v < 0.0,
            default_stopped_epsilon(),
            "tracker.stopped_epsilon_mph",
            warnings,
        );
        reset_if(
            &mut tracker.stale_timeout,
            Duration::is_zero,
            default_stale_timeout(),
            "tracker.stale_timeout_secs",
            warnings,
        );
        reset_if(
            &mut tracker.reaper_interval,
            Duration::is_zero,
            default_reaper_interval(),
            "tracker.reaper_interval_ms",
            warnings,
        );

        reset_if(
            &mut self.feed.replay_speedup,
            |v| !v.is_finite() || *v <= 0.0,
            default_replay_speedup(),
            "feed.replay_speedup",
            warnings,
        );

        let notifications = &mut self.notifications;
        for webhook in [
            &mut notifications.status_webhook,
            &mut notifications.alert_webhook,
        ] {
            if webhook.as_deref().is_some_and(|url| url.trim().is_empty()) {
                *webhook = None;
            }
        }
        if notifications
            .alert_role
            .as_deref()
            .is_some_and(|role| role.trim().is_empty())
        {
            notifications.alert_role = None;
        }
        self
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl std::str::FromStr for SpeederConfig {
    type Err = std::convert::Infallible;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut warnings = Vec::new();
        Ok(Self::from_toml_lenient(content, &mut warnings))
    }
}

fn reset_if<T, F>(value: &mut T, invalid: F, default: T, key: &str, warnings: &mut Vec<String>)
where
    T: std::fmt::Debug,
    F: Fn(&T) -> bool,
{
    if invalid(value) {
        warnings.push(format!(
            "{} has out-of-range value {:?}; using default {:?}",
            key, value, default
        ));
        *value = default;
    }
}

/// Reads the entries of one `[section]`, recording any entry it had to skip.
struct SectionReader<'a> {
    name: &'static str,
    table: Option<&'a Table>,
    warnings: &'a mut Vec<String>,
}

impl<'a> SectionReader<'a> {
    fn new(root: &'a Table, name: &'static str, warnings: &'a mut Vec<String>) -> Self {
        let table = match root.get(name) {
            Some(Value::Table(table)) => Some(table),
            Some(other) => {
                warnings.push(format!(
                    "[{}] must be a table, found {}; using defaults",
                    name,
                    other.type_str()
                ));
                None
            }
            None => None,
        };
        Self {
            name,
            table,
            warnings,
        }
    }

    fn get<T: DeserializeOwned>(&mut self, key: &str, default: T) -> T {
        let Some(value) = self.table.and_then(|table| table.get(key)) else {
            return default;
        };
        match value.clone().try_into::<T>() {
            Ok(parsed) => parsed,
            Err(err) => {
                self.warnings.push(format!(
                    "{}.{} is invalid ({}); using default",
                    self.name,
                    key,
                    err.to_string().trim()
                ));
                default
            }
        }
    }

    fn secs(&mut self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.get(key, default.as_secs()))
    }

    fn millis(&mut self, key: &str, default: Duration) -> Duration {
        let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.get(key, fallback))
    }

    fn tokens(&mut self, key: &str, default: Vec<String>) -> Vec<String> {
        match self.table.and_then(|table| table.get(key)) {
            None => default,
            Some(Value::String(raw)) => split_tokens(raw),
            Some(Value::Array(items)) => {
                let tokens: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(|s| s.trim().to_owned()))
                    .collect();
                match tokens {
                    Some(tokens) => tokens.into_iter().filter(|t| !t.is_empty()).collect(),
                    None => {
                        self.warnings.push(format!(
                            "{}.{} must contain only strings; using default",
                            self.name, key
                        ));
                        default
                    }
                }
            }
            Some(other) => {
                self.warnings.push(format!(
                    "{}.{} must be a string or list, found {}; using default",
                    self.name,
                    key,
                    other.type_str()
                ));
                default
            }
        }
    }
}

/// Speed rule thresholds and route/train bonuses.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct LimitsConfig {
    pub alert_margin_mph: f64,
    pub over_margin_mph: f64,
    #[serde(rename = "sustained_duration_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sustained_duration: Duration,
    pub hard_couple_speed_mph: f64,
    pub priority_bonus_mph: f64,
    pub priority_tokens: Vec<String>,
    pub special_route_bonus_mph: f64,
    pub special_route_prefix: String,
}

impl LimitsConfig {
    fn read(section: &mut SectionReader<'_>) -> Self {
        let defaults = Self::default();
        Self {
            alert_margin_mph: section.get("alert_margin_mph", defaults.alert_margin_mph),
            over_margin_mph: section.get("over_margin_mph", defaults.over_margin_mph),
            sustained_duration: section.secs("sustained_duration_secs", defaults.sustained_duration),
            hard_couple_speed_mph: section
                .get("hard_couple_speed_mph", defaults.hard_couple_speed_mph),
            priority_bonus_mph: section.get("priority_bonus_mph", defaults.priority_bonus_mph),
            priority_tokens: section.tokens("priority_tokens", defaults.priority_tokens),
            special_route_bonus_mph: section
                .get("special_route_bonus_mph", defaults.special_route_bonus_mph),
            special_route_prefix: section
                .get("special_route_prefix", defaults.special_route_prefix),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            alert_margin_mph: default_alert_margin(),
            over_margin_mph: default_over_margin(),
            sustained_duration: default_sustained_duration(),
            hard_couple_speed_mph: default_hard_couple_speed(),
            priority_bonus_mph: default_priority_bonus(),
            priority_tokens: default_priority_tokens(),
            special_route_bonus_mph: default_special_route_bonus(),
            special_route_prefix: default_special_route_prefix(),
        }
    }
}

/// Timing knobs for session tracking and violation confirmation.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct TrackerConfig {
    #[serde(rename = "confirmation_delay_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub confirmation_delay: Duration,
    pub hysteresis_mph: f64,
    #[serde(rename = "stale_timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stale_timeout: Duration,
    #[serde(rename = "reaper_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reaper_interval: Duration,
    pub stopped_epsilon_mph: f64,
}

impl TrackerConfig {
    fn read(section: &mut SectionReader<'_>) -> Self {
        let defaults = Self::default();
        Self {
            confirmation_delay: section
                .secs("confirmation_delay_secs", defaults.confirmation_delay),
            hysteresis_mph: section.get("hysteresis_mph", defaults.hysteresis_mph),
            stale_timeout: section.secs("stale_timeout_secs", defaults.stale_timeout),
            reaper_interval: section.millis("reaper_interval_ms", defaults.reaper_interval),
            stopped_epsilon_mph: section.get("stopped_epsilon_mph", defaults.stopped_epsilon_mph),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirmation_delay: default_confirmation_delay(),
            hysteresis_mph: default_hysteresis(),
            stale_timeout: default_stale_timeout(),
            reaper_interval: default_reaper_interval(),
            stopped_epsilon_mph: default_stopped_epsilon(),
        }
    }
}

/// Outbound notification settings. The webhook URLs identify the status and
/// alert channels.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub status_webhook: Option<String>,
    pub alert_webhook: Option<String>,
    pub alert_role: Option<String>,
    pub self_name: String,
    pub lifecycle_messages: bool,
    pub speed_change_messages: bool,
    #[serde(rename = "request_timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl NotificationConfig {
    fn read(section: &mut SectionReader<'_>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: section.get("enabled", defaults.enabled),
            status_webhook: section.get("status_webhook", defaults.status_webhook),
            alert_webhook: section.get("alert_webhook", defaults.alert_webhook),
            alert_role: section.get("alert_role", defaults.alert_role),
            self_name: section.get("self_name", defaults.self_name),
            lifecycle_messages: section.get("lifecycle_messages", defaults.lifecycle_messages),
            speed_change_messages: section
                .get("speed_change_messages", defaults.speed_change_messages),
            request_timeout: section.secs("request_timeout_secs", defaults.request_timeout),
        }
    }

    /// True when at least one channel has a webhook to deliver to.
    pub fn has_webhooks(&self) -> bool {
        self.status_webhook.is_some() || self.alert_webhook.is_some()
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            status_webhook: None,
            alert_webhook: None,
            alert_role: None,
            self_name: default_self_name(),
            lifecycle_messages: true,
            speed_change_messages: false,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    /// Filter used when neither `R8_SPEEDER_LOG` nor `RUST_LOG` is set.
    pub level: String,
    pub directory: PathBuf,
    pub format: LogFormat,
    /// Keep a daily rolling JSON file next to the console output.
    pub file: bool,
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    fn read(section: &mut SectionReader<'_>) -> Self {
        let defaults = Self::default();
        Self {
            level: section.get("level", defaults.level),
            directory: section.get("directory", defaults.directory),
            format: section.get("format", defaults.format),
            file: section.get("file", defaults.file),
            file_prefix: section.get("file_prefix", defaults.file_prefix),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directory: default_logging_directory(),
            format: LogFormat::default(),
            file: true,
            file_prefix: None,
        }
    }
}

/// Scenario replay input standing in for the live telemetry connection.
#[derive(Debug, Clone, Serialize)]
pub struct FeedConfig {
    pub scenario: Option<PathBuf>,
    pub replay_speedup: f64,
}

impl FeedConfig {
    fn read(section: &mut SectionReader<'_>) -> Self {
        let defaults = Self::default();
        Self {
            scenario: section.get("scenario", defaults.scenario),
            replay_speedup: section.get("replay_speedup", defaults.replay_speedup),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            scenario: None,
            replay_speedup: default_replay_speedup(),
        }
    }
}
