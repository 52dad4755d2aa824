use std::collections::HashSet;
use std::fs;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::{Validate, ValidationError};

use crate::core::error::{OrbError, OrbResult};
use crate::interceptor;
use crate::selector::{Endpoint, TargetIdentity};

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:\d{1,3}\.){3}\d{1,3}|\[[0-9a-f:]+\]|[a-z0-9.-]+)$").unwrap()
});

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_target_ids"))]
pub struct Config {
    #[validate(nested)]
    pub log: Option<Log>,

    #[serde(default)]
    #[validate(nested)]
    pub pool: PoolConfig,

    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    #[validate(nested)]
    pub interceptors: InterceptorsConfig,

    #[serde(default)]
    #[validate(nested)]
    pub targets: Vec<TargetConfig>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> OrbResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).map_err(|e| {
            OrbError::Configuration(format!("Unable to read conf file from {path}: {e}"))
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> OrbResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> OrbResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn validate_target_ids(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id.as_str()) {
                let mut err = ValidationError::new("duplicate_target_id");
                err.add_param("id".into(), &target.id);
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[serde(default = "Log::default_level")]
    #[validate(custom(function = "Log::validate_level"))]
    pub level: String,
    /// Append log lines to this file instead of stderr
    pub path: Option<String>,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(level: &str) -> Result<(), ValidationError> {
        if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ValidationError::new("invalid_log_level"))
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "PoolConfig::validate_limits"))]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_name")]
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default = "PoolConfig::default_min_threads")]
    pub min_threads: usize,
    #[serde(default = "PoolConfig::default_max_threads")]
    #[validate(range(min = 1))]
    pub max_threads: usize,
    #[serde(default = "PoolConfig::default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl PoolConfig {
    fn default_name() -> String {
        "orb".to_string()
    }

    fn default_min_threads() -> usize {
        1
    }

    fn default_max_threads() -> usize {
        16
    }

    fn default_idle_timeout_ms() -> u64 {
        60_000
    }

    fn validate_limits(&self) -> Result<(), ValidationError> {
        if self.min_threads > self.max_threads {
            Err(ValidationError::new("min_threads_exceeds_max_threads"))
        } else {
            Ok(())
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            min_threads: Self::default_min_threads(),
            max_threads: Self::default_max_threads(),
            idle_timeout_ms: Self::default_idle_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Location forwards followed before a request fails
    #[serde(default = "DispatchConfig::default_max_forwards")]
    #[validate(range(max = 64))]
    pub max_forwards: usize,
}

impl DispatchConfig {
    fn default_max_forwards() -> usize {
        8
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_forwards: Self::default_max_forwards(),
        }
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct InterceptorsConfig {
    #[serde(default)]
    #[validate(nested)]
    pub client: Vec<InterceptorEntry>,
    #[serde(default)]
    #[validate(nested)]
    pub server: Vec<InterceptorEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct InterceptorEntry {
    #[validate(custom(function = "InterceptorEntry::validate_name"))]
    pub name: String,
    #[serde(default = "InterceptorEntry::default_config")]
    pub config: JsonValue,
}

impl InterceptorEntry {
    fn default_config() -> JsonValue {
        JsonValue::Object(Default::default())
    }

    fn validate_name(name: &str) -> Result<(), ValidationError> {
        if interceptor::builtin_names().iter().any(|n| *n == name) {
            Ok(())
        } else {
            let mut err = ValidationError::new("unknown_interceptor");
            err.add_param("name".into(), &name.to_string());
            Err(err)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct TargetConfig {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub endpoints: Vec<EndpointConfig>,
}

impl TargetConfig {
    pub fn identity(&self) -> TargetIdentity {
        TargetIdentity::new(self.id.as_str())
    }

    pub fn to_endpoints(&self) -> Vec<Endpoint> {
        let owner = self.identity();
        self.endpoints
            .iter()
            .map(|e| e.to_endpoint(owner.clone()))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct EndpointConfig {
    #[serde(default = "EndpointConfig::default_kind")]
    #[validate(length(min = 1))]
    pub kind: String,
    #[validate(custom(function = "validate_host"))]
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    fn default_kind() -> String {
        "clear".to_string()
    }

    pub fn to_endpoint(&self, owner: TargetIdentity) -> Endpoint {
        Endpoint::new(self.kind.as_str(), self.host.as_str(), self.port, owner)
    }
}

/// Accepts IPv4 addresses, bracketed IPv6 addresses and host names.
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if HOST_PATTERN.is_match(host) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_host");
        err.add_param("host".into(), &host.to_string());
        Err(err)
    }
}
