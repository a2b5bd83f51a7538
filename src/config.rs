//! Service configuration, read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Longest accepted token lifetime, ten years.
const MAX_TOKEN_TTL_DAYS: i64 = 3650;

/// Deployment profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("expected development or production, got '{other}'")),
        }
    }
}

/// Which work queue implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Rows in the shared libSQL file; works across processes.
    Sqlite,
    /// In-process only; API and workers must share one process.
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "libsql" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected sqlite or memory, got '{other}'")),
        }
    }
}

/// Token signing settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: SecretString,
    pub token_ttl: chrono::Duration,
    /// Subject for token requests that don't name one.
    pub default_subject: String,
    /// The secret was generated at startup rather than configured.
    pub ephemeral_secret: bool,
}

/// Registry and queue storage settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Prefix for every stored key.
    pub namespace: String,
    pub queue_backend: QueueBackend,
    pub poll_interval: Duration,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub environment: Environment,
    pub project_name: String,
    pub bind_addr: SocketAddr,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    /// Worker units per worker process.
    pub worker_concurrency: usize,
    pub allowed_origins: Vec<String>,
    pub log_dir: PathBuf,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment: Environment = parse_or(&get, "APP_ENV", Environment::Development)?;
        let project_name = get("PROJECT_NAME").unwrap_or_else(|| "taskgate".to_string());
        let bind_addr: SocketAddr =
            parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?;

        let (secret, ephemeral_secret) = match get("JWT_SECRET_KEY") {
            Some(secret) => (SecretString::from(secret), false),
            None if environment == Environment::Production => {
                return Err(ConfigError::MissingRequired {
                    key: "JWT_SECRET_KEY".into(),
                    hint: "Production deployments must set a signing secret.".into(),
                });
            }
            None => (SecretString::from(random_secret()), true),
        };

        let ttl_days: i64 = parse_or(&get, "JWT_ACCESS_TOKEN_EXPIRES", 30)?;
        if !(1..=MAX_TOKEN_TTL_DAYS).contains(&ttl_days) {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ACCESS_TOKEN_EXPIRES".into(),
                message: format!("token lifetime must be 1 to {MAX_TOKEN_TTL_DAYS} days"),
            });
        }
        let token_ttl =
            chrono::Duration::try_days(ttl_days).ok_or_else(|| ConfigError::InvalidValue {
                key: "JWT_ACCESS_TOKEN_EXPIRES".into(),
                message: format!("{ttl_days} days is out of range"),
            })?;
        let default_subject = get("TOKEN_DEFAULT_SUBJECT").unwrap_or_else(|| project_name.clone());

        let db_path = PathBuf::from(
            get("TASKGATE_DB_PATH").unwrap_or_else(|| "./data/taskgate.db".to_string()),
        );
        let namespace = get("TASK_KEY_PREFIX").unwrap_or_else(|| "taskgate".to_string());
        let queue_backend: QueueBackend = parse_or(&get, "QUEUE_BACKEND", QueueBackend::Sqlite)?;
        let poll_ms: u64 = parse_or(&get, "QUEUE_POLL_INTERVAL_MS", 250)?;

        let worker_concurrency: usize = parse_or(&get, "WORKER_CONCURRENCY", 4)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }

        let allowed_origins = match get("ALLOWED_ORIGINS") {
            Some(raw) => parse_origins(&raw)?,
            None => Vec::new(),
        };
        let log_dir = PathBuf::from(get("LOG_DIR").unwrap_or_else(|| "logs".to_string()));

        Ok(Self {
            environment,
            project_name,
            bind_addr,
            auth: AuthConfig {
                secret,
                token_ttl,
                default_subject,
                ephemeral_secret,
            },
            store: StoreConfig {
                db_path,
                namespace,
                queue_backend,
                poll_interval: Duration::from_millis(poll_ms.max(1)),
            },
            worker_concurrency,
            allowed_origins,
            log_dir,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Accepts a JSON array (`["https://a.example"]`) or a comma-separated list.
///
/// A wildcard is refused: credentialed CORS needs explicit origins.
fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "ALLOWED_ORIGINS".into(),
        message,
    };

    let trimmed = raw.trim();
    let origins: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| invalid(e.to_string()))?
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        trimmed
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    if origins.iter().any(|o| o == "*") {
        return Err(invalid("'*' is not allowed; list each origin".into()));
    }
    Ok(origins)
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.project_name, "taskgate");
        assert_eq!(cfg.bind_addr.port(), 5000);
        assert_eq!(cfg.auth.token_ttl, chrono::Duration::days(30));
        assert_eq!(cfg.auth.default_subject, "taskgate");
        assert_eq!(cfg.store.namespace, "taskgate");
        assert_eq!(cfg.store.queue_backend, QueueBackend::Sqlite);
        assert_eq!(cfg.store.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.worker_concurrency, 4);
        assert!(cfg.allowed_origins.is_empty());
        assert!(cfg.auth.ephemeral_secret);
        assert_eq!(cfg.auth.secret.expose_secret().len(), 48);
    }

    #[test]
    fn production_requires_secret() {
        let err = config(&[("APP_ENV", "production")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "JWT_SECRET_KEY"));

        let cfg = config(&[("APP_ENV", "production"), ("JWT_SECRET_KEY", "s3cret")]).unwrap();
        assert_eq!(cfg.auth.secret.expose_secret(), "s3cret");
        assert!(!cfg.auth.ephemeral_secret);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("PROJECT_NAME", "ai_api_service"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("JWT_ACCESS_TOKEN_EXPIRES", "7"),
            ("TASK_KEY_PREFIX", "ai_api_service"),
            ("QUEUE_BACKEND", "memory"),
            ("WORKER_CONCURRENCY", "12"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.auth.token_ttl, chrono::Duration::days(7));
        assert_eq!(cfg.auth.default_subject, "ai_api_service");
        assert_eq!(cfg.store.namespace, "ai_api_service");
        assert_eq!(cfg.store.queue_backend, QueueBackend::Memory);
        assert_eq!(cfg.worker_concurrency, 12);
    }

    #[test]
    fn invalid_values_are_reported() {
        for (key, value) in [
            ("APP_ENV", "staging"),
            ("BIND_ADDR", "nope"),
            ("JWT_ACCESS_TOKEN_EXPIRES", "0"),
            ("JWT_ACCESS_TOKEN_EXPIRES", "100000000"),
            ("JWT_ACCESS_TOKEN_EXPIRES", "3651"),
            ("WORKER_CONCURRENCY", "0"),
            ("QUEUE_BACKEND", "redis"),
            ("ALLOWED_ORIGINS", "[not json"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
                "{key}={value} gave {err}"
            );
        }
    }

    #[test]
    fn origins_accept_json_or_commas() {
        let cfg = config(&[("ALLOWED_ORIGINS", r#"["https://a.example", "https://b.example"]"#)])
            .unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);

        let cfg = config(&[("ALLOWED_ORIGINS", "https://a.example, https://b.example,")]).unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn wildcard_origin_is_rejected() {
        for raw in [r#"["*"]"#, "*", "https://a.example, *"] {
            let err = config(&[("ALLOWED_ORIGINS", raw)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ALLOWED_ORIGINS"),
                "{raw} gave {err}"
            );
        }
    }

    #[test]
    fn longest_token_lifetime_is_accepted() {
        let cfg = config(&[("JWT_ACCESS_TOKEN_EXPIRES", "3650")]).unwrap();
        assert_eq!(cfg.auth.token_ttl, chrono::Duration::days(3650));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("PROJECT_NAME", "  "), ("WORKER_CONCURRENCY", "")]).unwrap();
        assert_eq!(cfg.project_name, "taskgate");
        assert_eq!(cfg.worker_concurrency, 4);
    }
}
