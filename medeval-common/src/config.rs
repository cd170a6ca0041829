//! Configuration loading and resolution
//!
//! Every setting is resolved in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MEDEVAL_*`)
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! The first two tiers arrive together as [`ConfigOverrides`]: the binary
//! binds each flag to its environment variable through clap.
//!
//! A missing TOML file is not an error: the remaining tiers apply and
//! [`EvalConfig::log_source`] reports it once logging is up. A TOML file
//! that exists but does not parse is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default evaluator roster
pub const DEFAULT_EVALUATOR_COUNT: usize = 6;

/// Default number of patients handed to each evaluator
pub const DEFAULT_PATIENTS_PER_EVALUATOR: usize = 12;

/// Default HTTP port for medeval-ev
pub const DEFAULT_PORT: u16 = 5740;

/// Compiled defaults used when no other tier supplies a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub data_dir: PathBuf,
    pub evaluators: Vec<String>,
    pub patients_per_evaluator: usize,
    pub bind_address: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was built for
    pub fn for_current_platform() -> Self {
        let data_dir = if cfg!(target_os = "windows") {
            // %LOCALAPPDATA%\medeval
            dirs::data_local_dir()
                .map(|d| d.join("medeval"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\medeval"))
        } else if cfg!(target_os = "macos") {
            // ~/Library/Application Support/medeval
            dirs::data_dir()
                .map(|d| d.join("medeval"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/medeval"))
        } else {
            // ~/.local/share/medeval
            dirs::data_local_dir()
                .map(|d| d.join("medeval"))
                .unwrap_or_else(|| PathBuf::from("./medeval_data"))
        };

        Self {
            data_dir,
            evaluators: default_evaluators(),
            patients_per_evaluator: DEFAULT_PATIENTS_PER_EVALUATOR,
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            request_timeout_secs: 10,
            log_level: "info".to_string(),
        }
    }
}

/// `Evaluator 1` .. `Evaluator 6`
pub fn default_evaluators() -> Vec<String> {
    (1..=DEFAULT_EVALUATOR_COUNT)
        .map(|i| format!("Evaluator {}", i))
        .collect()
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset (trace, debug, info, warn, error)
    pub level: Option<String>,
}

/// TOML config file contents
///
/// Every field is optional; absent fields fall through to the compiled
/// defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    pub data_dir: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub docx_folder: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    /// Spreadsheet script endpoint receiving submissions
    pub endpoint_url: Option<String>,
    pub evaluators: Option<Vec<String>>,
    pub patients_per_evaluator: Option<usize>,
    pub admin_password: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Load a TOML config file
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

        Ok(Some(config))
    }
}

/// Platform config file location: `<config_dir>/medeval/medeval-ev.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("medeval").join("medeval-ev.toml"))
}

/// Values supplied on the command line or through `MEDEVAL_*` variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub docx_folder: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub endpoint_url: Option<String>,
    pub admin_password: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

/// Where the TOML tier came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Loaded(PathBuf),
    NotFound(PathBuf),
    /// No path given and no platform config directory
    NoConfigDir,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub csv_path: PathBuf,
    pub docx_folder: PathBuf,
    pub ledger_path: PathBuf,
    pub endpoint_url: Option<String>,
    pub evaluators: Vec<String>,
    pub patients_per_evaluator: usize,
    pub admin_password: Option<String>,
    pub bind_address: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub source: ConfigSource,
}

impl EvalConfig {
    /// Resolve configuration from all four tiers
    ///
    /// Reads the TOML file named by the overrides, or the platform default
    /// location. Nothing is logged here; call [`Self::log_source`] after
    /// the subscriber is installed.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides.config_path.clone().or_else(default_config_path);

        let (toml_config, source) = match config_path {
            Some(path) => match TomlConfig::load(&path)? {
                Some(config) => (config, ConfigSource::Loaded(path)),
                None => (TomlConfig::default(), ConfigSource::NotFound(path)),
            },
            None => (TomlConfig::default(), ConfigSource::NoConfigDir),
        };

        let mut config =
            Self::from_tiers(overrides, toml_config, CompiledDefaults::for_current_platform())?;
        config.source = source;
        Ok(config)
    }

    /// Report where the TOML tier came from
    pub fn log_source(&self) {
        match &self.source {
            ConfigSource::Loaded(path) => info!("Loaded config file: {}", path.display()),
            ConfigSource::NotFound(path) => warn!(
                "Config file not found: {} (using environment and defaults)",
                path.display()
            ),
            ConfigSource::NoConfigDir => {
                warn!("Could not determine config directory (using environment and defaults)")
            }
        }
    }

    /// Merge explicit tiers (no file or environment access)
    ///
    /// The result reports [`ConfigSource::NoConfigDir`] since no file was read.
    pub fn from_tiers(
        overrides: &ConfigOverrides,
        toml: TomlConfig,
        defaults: CompiledDefaults,
    ) -> Result<Self> {
        let data_dir = overrides
            .data_dir
            .clone()
            .or(toml.data_dir)
            .unwrap_or(defaults.data_dir);

        let csv_path = overrides
            .csv_path
            .clone()
            .or(toml.csv_path)
            .unwrap_or_else(|| data_dir.join("cases.csv"));

        let docx_folder = overrides
            .docx_folder
            .clone()
            .or(toml.docx_folder)
            .unwrap_or_else(|| data_dir.join("docx_responses"));

        let ledger_path = overrides
            .ledger_path
            .clone()
            .or(toml.ledger_path)
            .unwrap_or_else(|| data_dir.join("assignments.json"));

        let endpoint_url = overrides
            .endpoint_url
            .clone()
            .or(toml.endpoint_url)
            .filter(|url| !url.trim().is_empty());

        let admin_password = overrides
            .admin_password
            .clone()
            .or(toml.admin_password)
            .filter(|p| !p.is_empty());

        let evaluators = toml.evaluators.unwrap_or(defaults.evaluators);
        if evaluators.is_empty() {
            return Err(Error::Config("evaluators list must not be empty".to_string()));
        }

        let patients_per_evaluator = toml
            .patients_per_evaluator
            .unwrap_or(defaults.patients_per_evaluator);
        if patients_per_evaluator == 0 {
            return Err(Error::Config(
                "patients_per_evaluator must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            csv_path,
            docx_folder,
            ledger_path,
            endpoint_url,
            evaluators,
            patients_per_evaluator,
            admin_password,
            bind_address: overrides
                .bind_address
                .clone()
                .or(toml.bind_address)
                .unwrap_or(defaults.bind_address),
            port: overrides.port.or(toml.port).unwrap_or(defaults.port),
            request_timeout_secs: toml
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            log_level: overrides
                .log_level
                .clone()
                .or(toml.logging.level)
                .unwrap_or(defaults.log_level),
            source: ConfigSource::NoConfigDir,
        })
    }

    /// `bind_address:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
