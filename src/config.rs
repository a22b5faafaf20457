//! Service configuration: loaded and validated once, then immutable.
//!
//! Initialization is two-phase. [`ServiceConfiguration::from_env`] produces the static
//! settings; once the datastore is reachable, [`ServiceConfiguration::resolve`] merges the
//! endpoints it reports and returns a *new* value. Components receive the configuration
//! (or the parts they need) explicitly; nothing reads it from a global.
//!
//! Environment variables:
//!
//! | variable | default | meaning |
//! |---|---|---|
//! | `FUNCTION_NAME` | required | service name used in logs |
//! | `FLEETLINE_ENV` | `dev` | `production`, `dev`, or `test`/`offline` |
//! | `TRANSPORT_URL` | required unless offline | message transport server |
//! | `RELOAD_URL` | `TRANSPORT_URL` | server carrying the reload channel |
//! | `RELOAD_CHANNEL` | `config:reload` | reload channel name |
//! | `SUBSCRIPTIONS` | derived from `RULE_NAME`/`RULE_VERSION` | comma-separated subjects |
//! | `PUBLISH_SUBJECT` | derived from `RULE_NAME`/`RULE_VERSION` | outbound subject |
//! | `TENANTS` | all tenants | JSON array of tenant ids to cache |
//! | `MAX_CPU` | `1` | parallelism factor; `1` disables forking |
//! | `TRANSPORT_MAX_ATTEMPTS` | `10` | bootstrap attempt bound |
//! | `TRANSPORT_RETRY_DELAY_MS` | `5000` | fixed delay between bootstrap attempts |
//! | `WORKER_RESTART_MAX` | `5` | respawns per slot per window; `0` = unbounded |
//! | `WORKER_RESTART_WINDOW_MS` | `60000` | restart budget window |
//! | `WORKER_RESTART_BACKOFF_MS` | `500` | first respawn delay |
//! | `WORKER_RESTART_BACKOFF_MAX_MS` | `30000` | respawn delay cap |
//! | `STORE_PATH` | none | JSON store file shared by the fleet |
//! | `RELAY_PLUGIN` | `log` | relay implementation name |

use crate::store::TenantId;
use crate::topology::RestartPolicy;
use crate::Backoff;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default reload channel shared by the control plane and every worker.
pub const DEFAULT_RELOAD_CHANNEL: &str = "config:reload";
/// Default bootstrap attempt bound.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;
/// Default fixed delay between bootstrap attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors raised while loading configuration. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid { name: &'static str, value: String, reason: String },
}

/// How the process treats external dependencies. Never inferred: it comes from
/// `FLEETLINE_ENV` or an explicit constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    Production,
    #[default]
    Development,
    /// Test harness mode: transport bootstrap is skipped. A worker given a reload
    /// channel still subscribes to it.
    Offline,
}

impl ExecutionMode {
    pub fn is_offline(self) -> bool {
        self == ExecutionMode::Offline
    }

    /// TLS and credential handling applies outside development.
    pub fn is_dev(self) -> bool {
        self == ExecutionMode::Development
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(ExecutionMode::Production),
            "dev" | "development" => Ok(ExecutionMode::Development),
            "test" | "offline" => Ok(ExecutionMode::Offline),
            other => Err(format!("unknown execution mode {other:?}")),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Production => "production",
            ExecutionMode::Development => "dev",
            ExecutionMode::Offline => "offline",
        })
    }
}

/// Bounded bootstrap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSettings {
    pub max_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, retry_delay: DEFAULT_RETRY_DELAY }
    }
}

/// Endpoints learned after the datastore connection is up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub transport_url: Option<String>,
    pub reload_url: Option<String>,
}

/// Validated, immutable service settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfiguration {
    pub service_name: String,
    pub mode: ExecutionMode,
    pub transport_url: String,
    pub reload_url: String,
    pub reload_channel: String,
    pub subscriptions: Vec<String>,
    pub publish_subject: Option<String>,
    /// Tenants to cache; empty means every tenant the store reports.
    pub tenants: Vec<TenantId>,
    pub max_cpu: usize,
    pub bootstrap: BootstrapSettings,
    pub restart: RestartPolicy,
    pub store_path: Option<PathBuf>,
    pub relay_plugin: String,
    resolved: bool,
}

impl ServiceConfiguration {
    /// Offline configuration for tests and embedding.
    pub fn offline(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            mode: ExecutionMode::Offline,
            transport_url: String::new(),
            reload_url: String::new(),
            reload_channel: DEFAULT_RELOAD_CHANNEL.into(),
            subscriptions: Vec::new(),
            publish_subject: None,
            tenants: Vec::new(),
            max_cpu: 1,
            bootstrap: BootstrapSettings::default(),
            restart: RestartPolicy::default(),
            store_path: None,
            relay_plugin: "log".into(),
            resolved: false,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let service_name = get("FUNCTION_NAME").ok_or(ConfigError::Missing("FUNCTION_NAME"))?;
        let mode = match get("FLEETLINE_ENV") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                name: "FLEETLINE_ENV",
                value: raw.clone(),
                reason,
            })?,
            None => ExecutionMode::default(),
        };

        let transport_url = match get("TRANSPORT_URL") {
            Some(url) => url,
            None if mode.is_offline() => String::new(),
            None => return Err(ConfigError::Missing("TRANSPORT_URL")),
        };
        let reload_url = get("RELOAD_URL").unwrap_or_else(|| transport_url.clone());
        let reload_channel =
            get("RELOAD_CHANNEL").unwrap_or_else(|| DEFAULT_RELOAD_CHANNEL.to_string());

        let rule = get("RULE_NAME").zip(get("RULE_VERSION"));
        let subscriptions = match get("SUBSCRIPTIONS") {
            Some(raw) => raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
            None => rule.iter().map(|(name, version)| format!("sub-rule-{name}@{version}")).collect(),
        };
        let publish_subject = get("PUBLISH_SUBJECT")
            .or_else(|| rule.as_ref().map(|(name, version)| format!("pub-rule-{name}@{version}")));

        let tenants = match get("TENANTS") {
            Some(raw) => serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|e| ConfigError::Invalid { name: "TENANTS", value: raw.clone(), reason: e.to_string() })?
                .into_iter()
                .map(TenantId::from)
                .collect(),
            None => Vec::new(),
        };

        let max_cpu = parse_or(&get, "MAX_CPU", 1usize)?;
        if max_cpu == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_CPU",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let max_attempts = parse_or(&get, "TRANSPORT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "TRANSPORT_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let retry_delay = Duration::from_millis(parse_or(
            &get,
            "TRANSPORT_RETRY_DELAY_MS",
            DEFAULT_RETRY_DELAY.as_millis() as u64,
        )?);

        let restart = restart_policy(&get)?;

        Ok(Self {
            service_name,
            mode,
            transport_url,
            reload_url,
            reload_channel,
            subscriptions,
            publish_subject,
            tenants,
            max_cpu,
            bootstrap: BootstrapSettings { max_attempts, retry_delay },
            restart,
            store_path: get("STORE_PATH").map(PathBuf::from),
            relay_plugin: get("RELAY_PLUGIN").unwrap_or_else(|| "log".into()),
            resolved: false,
        })
    }

    /// Second initialization phase: merge datastore-reported endpoints into a new value.
    ///
    /// For embedders whose datastore reports transport endpoints. The bundled service
    /// takes its endpoints from the environment and never calls this.
    pub fn resolve(&self, endpoints: ResolvedEndpoints) -> Self {
        let mut next = self.clone();
        if let Some(url) = endpoints.transport_url {
            next.transport_url = url;
        }
        if let Some(url) = endpoints.reload_url {
            next.reload_url = url;
        }
        next.resolved = true;
        next
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

fn parse_or<G, T>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn restart_policy<G>(get: &G) -> Result<RestartPolicy, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let max_restarts = parse_or(get, "WORKER_RESTART_MAX", 5usize)?;
    if max_restarts == 0 {
        return Ok(RestartPolicy::Always);
    }
    let window = Duration::from_millis(parse_or(get, "WORKER_RESTART_WINDOW_MS", 60_000u64)?);
    let base = Duration::from_millis(parse_or(get, "WORKER_RESTART_BACKOFF_MS", 500u64)?);
    let cap = Duration::from_millis(parse_or(get, "WORKER_RESTART_BACKOFF_MAX_MS", 30_000u64)?);
    let backoff = if base.is_zero() {
        Backoff::constant(Duration::ZERO)
    } else {
        Backoff::exponential(base).with_max(cap).map_err(|e| ConfigError::Invalid {
            name: "WORKER_RESTART_BACKOFF_MAX_MS",
            value: cap.as_millis().to_string(),
            reason: e.to_string(),
        })?
    };
    Ok(RestartPolicy::Bounded { max_restarts, window, backoff })
}
