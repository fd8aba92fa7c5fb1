//! authmap configuration (`config.toml`).
//!
//! Defines the typed configuration for `<state-dir>/config.toml`: which
//! shared table to manage, the controller's worker pool and retry limits,
//! the namespace watch list, and logging.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use authmap_core::merge::MergePolicy;
use authmap_core::store::TableRef;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthmapConfig {
    /// The shared table and its protected entries.
    #[serde(default)]
    pub table: TableConfig,

    /// Worker pool, queue and retry settings.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Which namespaces' snippets are reconciled.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log level and format.
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// TableConfig
// ---------------------------------------------------------------------------

/// Shared table settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Resource namespace (default: `"kube-system"`).
    #[serde(default = "default_table_namespace")]
    pub namespace: String,

    /// Resource name (default: `"aws-auth"`).
    #[serde(default = "default_table_name")]
    pub name: String,

    /// RBAC name prefixes of platform-managed entries that no snippet may
    /// touch (default: `["system:node:"]`).
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            namespace: default_table_namespace(),
            name: default_table_name(),
            protected_prefixes: default_protected_prefixes(),
        }
    }
}

impl TableConfig {
    /// The configured resource.
    #[must_use]
    pub fn table_ref(&self) -> TableRef {
        TableRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Merge policy built from the protected prefixes.
    #[must_use]
    pub fn policy(&self) -> MergePolicy {
        MergePolicy::new(&self.protected_prefixes)
    }
}

fn default_table_namespace() -> String {
    TableRef::default().namespace
}

fn default_table_name() -> String {
    TableRef::default().name
}

fn default_protected_prefixes() -> Vec<String> {
    vec![authmap_core::merge::DEFAULT_PROTECTED_PREFIX.to_owned()]
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// Controller runtime settings.
///
/// ```toml
/// [controller]
/// workers = 4
/// queue_capacity = 1024
/// max_conflict_retries = 5
/// requeue_base_ms = 100
/// requeue_max_ms = 30000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Worker threads draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of distinct identities waiting in the queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Conditional-write attempts per cycle before giving up with
    /// `Contended`.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// First requeue delay after a retryable failure.
    #[serde(default = "default_requeue_base_ms")]
    pub requeue_base_ms: u64,

    /// Upper bound on the requeue delay.
    #[serde(default = "default_requeue_max_ms")]
    pub requeue_max_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_conflict_retries: default_max_conflict_retries(),
            requeue_base_ms: default_requeue_base_ms(),
            requeue_max_ms: default_requeue_max_ms(),
        }
    }
}

impl ControllerConfig {
    /// [`Self::requeue_base_ms`] as a duration.
    #[must_use]
    pub const fn requeue_base(&self) -> Duration {
        Duration::from_millis(self.requeue_base_ms)
    }

    /// [`Self::requeue_max_ms`] as a duration.
    #[must_use]
    pub const fn requeue_max(&self) -> Duration {
        Duration::from_millis(self.requeue_max_ms)
    }

    fn check(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("controller.workers must be at least 1".to_owned());
        }
        if self.queue_capacity == 0 {
            return Err("controller.queue_capacity must be at least 1".to_owned());
        }
        if self.max_conflict_retries == 0 {
            return Err("controller.max_conflict_retries must be at least 1".to_owned());
        }
        if self.requeue_base_ms > self.requeue_max_ms {
            return Err(format!(
                "controller.requeue_base_ms ({}) exceeds requeue_max_ms ({})",
                self.requeue_base_ms, self.requeue_max_ms
            ));
        }
        Ok(())
    }
}

const fn default_workers() -> usize {
    4
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_max_conflict_retries() -> u32 {
    5
}

const fn default_requeue_base_ms() -> u64 {
    100
}

const fn default_requeue_max_ms() -> u64 {
    30_000
}

// ---------------------------------------------------------------------------
// WatchConfig
// ---------------------------------------------------------------------------

/// Namespace watch list.
///
/// Empty, or a list holding only `""`, means every namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Namespaces whose snippets are reconciled.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

// ---------------------------------------------------------------------------
// LogConfig
// ---------------------------------------------------------------------------

/// Logging settings. `RUST_LOG` overrides `level` when set.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive (default: `"info"`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl AuthmapConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML, unknown fields or
    ///   out-of-range values, returns a [`ConfigError`].
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields or values the
    /// controller cannot run with.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        config
            .controller
            .check()
            .map_err(|message| ConfigError { path: None, message })?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
