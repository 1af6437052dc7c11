//! Daemon tunables.
//!
//! The rule file ([`crate::config`]) says *what* to mirror; these settings say
//! *how*: orphan timeout, retry policy, queue soft cap, identity endpoint and
//! logging. They live in an optional YAML file; every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default identity (login) endpoint.
pub const DEFAULT_IDENTITY_URL: &str = "https://identity.api.rackspacecloud.com/v2.0/tokens";

// ---------------------------------------------------------------------------
// Settings struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level daemon settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub pairing: PairingSettings,
    pub workers: WorkerSettings,
    pub auth: AuthSettings,
    pub http: HttpSettings,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

/// Rename/move pairing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingSettings {
    /// How long half of a move waits for its partner, in milliseconds.
    pub grace_period_ms: u64,
    /// How often pending halves are checked for expiry, in milliseconds.
    pub sweep_interval_ms: u64,
}

/// Per-destination worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Attempts per job before it is dropped as a permanent failure.
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles on every attempt.
    pub base_backoff_ms: u64,
    /// Upper bound for a single retry delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Queue depth above which a backpressure warning is logged.
    pub queue_soft_cap: usize,
}

/// Account login settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Identity service token endpoint.
    pub identity_url: String,
}

/// HTTPS transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Startup synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Reconcile every watched tree against the remote side at startup.
    pub initial_sync: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl DaemonSettings {
    /// Load settings from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: DaemonSettings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from `path` when it exists; a missing file yields the defaults.
    ///
    /// Unlike a missing file, an unreadable or malformed one is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Platform-appropriate default path for the settings file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cdnmirror/settings.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("cdnmirror")
            .join("settings.yaml")
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.pairing.grace_period_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.pairing.sweep_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            sweep_interval_ms: 250,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            queue_soft_cap: 10_000,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { initial_sync: true }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"workers.max_attempts"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl DaemonSettings {
    /// Validate the settings and return all errors found.
    ///
    /// An empty vector means the settings are valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        positive("pairing.grace_period_ms", self.pairing.grace_period_ms);
        positive("pairing.sweep_interval_ms", self.pairing.sweep_interval_ms);
        positive("workers.max_attempts", u64::from(self.workers.max_attempts));
        positive("workers.base_backoff_ms", self.workers.base_backoff_ms);
        positive("workers.max_backoff_ms", self.workers.max_backoff_ms);
        positive("workers.queue_soft_cap", self.workers.queue_soft_cap as u64);
        positive("http.timeout_secs", self.http.timeout_secs);

        if self.workers.base_backoff_ms > self.workers.max_backoff_ms {
            errors.push(ValidationError {
                field: "workers.base_backoff_ms".into(),
                message: format!(
                    "base_backoff_ms ({}) must not exceed max_backoff_ms ({})",
                    self.workers.base_backoff_ms, self.workers.max_backoff_ms
                ),
            });
        }

        if url::Url::parse(&self.auth.identity_url).is_err() {
            errors.push(ValidationError {
                field: "auth.identity_url".into(),
                message: format!("not a valid URL: '{}'", self.auth.identity_url),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// SettingsBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing [`DaemonSettings`] programmatically.
///
/// Starts from [`DaemonSettings::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust
/// use cdnmirror_core::settings::SettingsBuilder;
///
/// let settings = SettingsBuilder::new()
///     .grace_period_ms(500)
///     .max_attempts(3)
///     .build();
/// assert_eq!(settings.workers.max_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: DaemonSettings,
}

impl SettingsBuilder {
    /// Create a new builder initialised with [`DaemonSettings::default`] values.
    pub fn new() -> Self {
        Self {
            settings: DaemonSettings::default(),
        }
    }

    // --- pairing ---

    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.settings.pairing.grace_period_ms = ms;
        self
    }

    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.settings.pairing.sweep_interval_ms = ms;
        self
    }

    // --- workers ---

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.settings.workers.max_attempts = n;
        self
    }

    pub fn base_backoff_ms(mut self, ms: u64) -> Self {
        self.settings.workers.base_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.settings.workers.max_backoff_ms = ms;
        self
    }

    pub fn queue_soft_cap(mut self, n: usize) -> Self {
        self.settings.workers.queue_soft_cap = n;
        self
    }

    // --- auth / http ---

    pub fn identity_url(mut self, url: impl Into<String>) -> Self {
        self.settings.auth.identity_url = url.into();
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.http.timeout_secs = secs;
        self
    }

    // --- sync / logging ---

    pub fn initial_sync(mut self, enabled: bool) -> Self {
        self.settings.sync.initial_sync = enabled;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.settings.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`DaemonSettings`].
    pub fn build(self) -> DaemonSettings {
        self.settings
    }

    /// Build and validate in one step.
    pub fn build_validated(self) -> Result<DaemonSettings, Vec<ValidationError>> {
        let settings = self.build();
        let errors = settings.validate();
        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(errors)
        }
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = DaemonSettings::default();
        assert!(settings.validate().is_empty());
        assert_eq!(settings.grace_period(), Duration::from_secs(1));
        assert_eq!(settings.workers.max_attempts, 5);
        assert!(settings.sync.initial_sync);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "workers:\n  max_attempts: 9\nlogging:\n  level: debug\n";
        let settings: DaemonSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.workers.max_attempts, 9);
        assert_eq!(settings.workers.base_backoff_ms, 1000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.pairing, PairingSettings::default());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pairing:\n  grace_period_ms: 250").unwrap();
        let settings = DaemonSettings::load(file.path()).unwrap();
        assert_eq!(settings.grace_period(), Duration::from_millis(250));
    }

    #[test]
    fn load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DaemonSettings::load_or_default(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(settings, DaemonSettings::default());
    }

    #[test]
    fn load_or_default_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: [not, a, map").unwrap();
        assert!(DaemonSettings::load_or_default(file.path()).is_err());
    }

    #[test]
    fn validate_reports_every_problem() {
        let settings = SettingsBuilder::new()
            .grace_period_ms(0)
            .base_backoff_ms(10_000)
            .max_backoff_ms(10)
            .identity_url("not a url")
            .logging_level("loud")
            .build();
        let fields: Vec<String> = settings.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"pairing.grace_period_ms".to_string()));
        assert!(fields.contains(&"workers.base_backoff_ms".to_string()));
        assert!(fields.contains(&"auth.identity_url".to_string()));
        assert!(fields.contains(&"logging.level".to_string()));
    }

    #[test]
    fn build_validated_ok() {
        let settings = SettingsBuilder::new().max_attempts(2).build_validated().unwrap();
        assert_eq!(settings.workers.max_attempts, 2);
    }
}
