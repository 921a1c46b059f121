//! Infrastructure config: SQL servers, credentials and their resolution into
//! connection descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::connection::{ConnectionDescriptor, SslMode};
use crate::error::{MigratorError, Result};

pub const DEFAULT_PORT: &str = "5432";

/// A config value given literally or by reference to an environment variable.
#[derive(Clone, PartialEq, Eq)]
pub enum SecretValue {
    Literal(String),
    EnvRef(String),
}

impl Default for SecretValue {
    fn default() -> Self {
        SecretValue::Literal(String::new())
    }
}

impl SecretValue {
    /// Resolve against the process environment.
    pub fn resolve(&self) -> std::result::Result<String, String> {
        self.resolve_with(|var| std::env::var(var).ok())
    }

    /// Resolve with a custom variable lookup. Unset and empty variables are both
    /// errors; the error carries the variable name.
    pub fn resolve_with<F>(&self, lookup: F) -> std::result::Result<String, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            SecretValue::Literal(value) => Ok(value.clone()),
            SecretValue::EnvRef(var) => match lookup(var) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => Err(var.clone()),
            },
        }
    }

    pub fn is_empty_literal(&self) -> bool {
        matches!(self, SecretValue::Literal(v) if v.is_empty())
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(value) => write!(f, "{}", value),
            SecretValue::EnvRef(var) => write!(f, "$env:{}", var),
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(_) => write!(f, "Literal([REDACTED])"),
            SecretValue::EnvRef(var) => write!(f, "EnvRef({:?})", var),
        }
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SecretVisitor;

        impl<'de> Visitor<'de> for SecretVisitor {
            type Value = SecretValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(r#"a string or {"$env": "VAR_NAME"}"#)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<SecretValue, E> {
                Ok(SecretValue::Literal(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<SecretValue, E> {
                Ok(SecretValue::Literal(v))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<SecretValue, E> {
                Ok(SecretValue::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<SecretValue, A::Error> {
                let mut var: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    if key != "$env" {
                        return Err(de::Error::unknown_field(&key, &["$env"]));
                    }
                    if var.is_some() {
                        return Err(de::Error::duplicate_field("$env"));
                    }
                    var = Some(map.next_value()?);
                }
                match var {
                    Some(var) if !var.is_empty() => Ok(SecretValue::EnvRef(var)),
                    Some(_) => Err(de::Error::custom("empty $env reference")),
                    None => Err(de::Error::missing_field("$env")),
                }
            }
        }

        deserializer.deserialize_any(SecretVisitor)
    }
}

/// Top-level infrastructure document. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub sql_servers: Vec<SqlServer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlServer {
    pub host: String,
    #[serde(default)]
    pub tls_config: Option<TlsConfig>,
    /// Keyed by logical database name.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseSecret>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub client_cert: Option<ClientCert>,
    #[serde(default, alias = "disable_hostname_verification")]
    pub disable_tls_hostname_verification: bool,
    #[serde(default)]
    pub disable_ca_validation: bool,
}

#[derive(Clone, Deserialize)]
pub struct ClientCert {
    pub cert: String,
    pub key: String,
}

impl fmt::Debug for ClientCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCert")
            .field("cert", &self.cert)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSecret {
    /// Physical database name; empty means "same as the logical name".
    #[serde(default)]
    pub name: SecretValue,
    #[serde(default)]
    pub username: SecretValue,
    #[serde(default)]
    pub password: SecretValue,
    #[serde(default)]
    pub min_connections: Option<u32>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl TlsConfig {
    /// TLS is only enforced when mutual-TLS material is configured.
    pub fn ssl_mode(tls: Option<&TlsConfig>) -> SslMode {
        match tls {
            Some(tls) if !tls.disabled && tls.client_cert.is_some() => SslMode::Require,
            _ => SslMode::Disable,
        }
    }
}

impl InfraConfig {
    /// Read and parse an infrastructure config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigratorError::ConfigError(format!(
                "Failed to read infra config '{}': {}",
                path.display(),
                e
            ))
        })?;

        // The file carries credentials
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(path) {
                let mode = meta.permissions().mode();
                if mode & 0o077 != 0 {
                    tracing::warn!(
                        path = %path.display(),
                        mode = format!("{:o}", mode & 0o777),
                        "Infra config has overly permissive permissions. Consider chmod 600."
                    );
                }
            }
        }

        let config = Self::from_json(&content).map_err(|e| match e {
            MigratorError::ConfigError(msg) => {
                MigratorError::ConfigError(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })?;
        tracing::debug!(sql_servers = config.sql_servers.len(), "Infra config loaded");
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            MigratorError::ConfigError(format!("Failed to parse infra config: {}", e))
        })
    }

    /// Every logical name configured, server by server.
    pub fn database_names(&self) -> Vec<&str> {
        self.sql_servers
            .iter()
            .flat_map(|s| s.databases.keys().map(String::as_str))
            .collect()
    }

    /// Resolve a logical database against the process environment.
    pub fn resolve(&self, logical_name: &str) -> Result<ConnectionDescriptor> {
        self.resolve_with(logical_name, |var| std::env::var(var).ok())
    }

    /// Resolve a logical database to a fully resolved connection descriptor.
    ///
    /// The first server declaring the name wins.
    pub fn resolve_with<F>(&self, logical_name: &str, lookup: F) -> Result<ConnectionDescriptor>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (server, secret) = self
            .sql_servers
            .iter()
            .find_map(|s| s.databases.get(logical_name).map(|d| (s, d)))
            .ok_or_else(|| MigratorError::ConfigNotFound {
                name: logical_name.to_string(),
            })?;

        let unresolved = |field: &str, var: String| MigratorError::SecretUnresolved {
            database: logical_name.to_string(),
            field: field.to_string(),
            var,
        };

        let (host, port) = split_host_port(&server.host);
        let username = secret
            .username
            .resolve_with(&lookup)
            .map_err(|var| unresolved("username", var))?;
        let password = secret
            .password
            .resolve_with(&lookup)
            .map_err(|var| unresolved("password", var))?;

        let database = if secret.name.is_empty_literal() {
            logical_name.to_string()
        } else {
            secret
                .name
                .resolve_with(&lookup)
                .map_err(|var| unresolved("database name", var))?
        };

        Ok(ConnectionDescriptor {
            logical_name: logical_name.to_string(),
            database,
            host,
            port: port.unwrap_or(DEFAULT_PORT).to_string(),
            username,
            password,
            ssl_mode: TlsConfig::ssl_mode(server.tls_config.as_ref()),
        })
    }
}

/// Split `host[:port]` on the last colon.
pub fn split_host_port(value: &str) -> (String, Option<&str>) {
    match value.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), Some(port)),
        None => (value.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    const CONFIG: &str = r#"{
        "metadata": {"app_id": "demo"},
        "sql_servers": [
            {
                "host": "db.internal:5555",
                "databases": {
                    "orders": {"name": "", "username": "u", "password": {"$env": "PW"}},
                    "users": {"username": {"$env": "USERS_USER"}, "password": "p"}
                }
            },
            {
                "host": "replica.internal",
                "tls_config": {"client_cert": {"cert": "c", "key": "k"}},
                "databases": {
                    "orders": {"name": "shadowed", "username": "x", "password": "y"},
                    "billing": {"name": {"$env": "BILLING_DB"}, "username": "b", "password": "b"}
                }
            }
        ]
    }"#;

    #[test]
    fn test_resolve_with_env_password_and_default_name() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        let d = config.resolve_with("orders", lookup(&[("PW", "secret")])).unwrap();
        assert_eq!(d.host, "db.internal");
        assert_eq!(d.port, "5555");
        assert_eq!(d.username, "u");
        assert_eq!(d.password, "secret");
        assert_eq!(d.database, "orders");
        assert_eq!(d.ssl_mode, SslMode::Disable);
    }

    #[test]
    fn test_unset_env_is_secret_unresolved() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        let err = config.resolve_with("orders", lookup(&[])).unwrap_err();
        match err {
            MigratorError::SecretUnresolved { database, field, var } => {
                assert_eq!(database, "orders");
                assert_eq!(field, "password");
                assert_eq!(var, "PW");
            }
            other => panic!("unexpected error: {}", other),
        }
        // Siblings still resolve
        assert!(config.resolve_with("users", lookup(&[("USERS_USER", "svc")])).is_ok());
    }

    #[test]
    fn test_empty_env_value_is_unresolved() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        assert!(config.resolve_with("orders", lookup(&[("PW", "")])).is_err());
    }

    #[test]
    fn test_env_name_must_resolve() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        assert!(matches!(
            config.resolve_with("billing", lookup(&[])),
            Err(MigratorError::SecretUnresolved { .. })
        ));
        let d = config
            .resolve_with("billing", lookup(&[("BILLING_DB", "billing_prod")]))
            .unwrap();
        assert_eq!(d.database, "billing_prod");
        assert_eq!(d.port, DEFAULT_PORT);
        assert_eq!(d.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_first_server_wins() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        let d = config.resolve_with("orders", lookup(&[("PW", "s")])).unwrap();
        assert_eq!(d.host, "db.internal");
        assert_eq!(d.database, "orders");
    }

    #[test]
    fn test_not_found() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        let err = config.resolve_with("ord", lookup(&[])).unwrap_err();
        assert!(matches!(err, MigratorError::ConfigNotFound { ref name } if name == "ord"));
    }

    #[test]
    fn test_ssl_mode_matrix() {
        let cert = || Some(ClientCert { cert: "c".into(), key: "k".into() });
        assert_eq!(TlsConfig::ssl_mode(None), SslMode::Disable);
        assert_eq!(TlsConfig::ssl_mode(Some(&TlsConfig::default())), SslMode::Disable);
        assert_eq!(
            TlsConfig::ssl_mode(Some(&TlsConfig {
                ca: Some("ca".into()),
                disable_ca_validation: true,
                ..Default::default()
            })),
            SslMode::Disable
        );
        assert_eq!(
            TlsConfig::ssl_mode(Some(&TlsConfig {
                disabled: true,
                client_cert: cert(),
                ..Default::default()
            })),
            SslMode::Disable
        );
        assert_eq!(
            TlsConfig::ssl_mode(Some(&TlsConfig {
                client_cert: cert(),
                ..Default::default()
            })),
            SslMode::Require
        );
    }

    #[test]
    fn test_secret_value_decoding() {
        let v: SecretValue = serde_json::from_str(r#""plain""#).unwrap();
        assert_eq!(v, SecretValue::Literal("plain".into()));
        let v: SecretValue = serde_json::from_str(r#"{"$env": "DB_PASS"}"#).unwrap();
        assert_eq!(v, SecretValue::EnvRef("DB_PASS".into()));
        assert_eq!(v.to_string(), "$env:DB_PASS");

        assert!(serde_json::from_str::<SecretValue>(r#"{"$env": ""}"#).is_err());
        assert!(serde_json::from_str::<SecretValue>(r#"{"env": "X"}"#).is_err());
        assert!(serde_json::from_str::<SecretValue>("42").is_err());
    }

    #[test]
    fn test_secret_debug_redacts_literals() {
        let v = SecretValue::Literal("hunter2".into());
        assert!(!format!("{:?}", v).contains("hunter2"));
    }

    #[test]
    fn test_malformed_document_is_config_error() {
        assert!(matches!(
            InfraConfig::from_json(r#"{"sql_servers": [{"databases": {}}]}"#),
            Err(MigratorError::ConfigError(_))
        ));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("db:6432"), ("db".to_string(), Some("6432")));
        assert_eq!(split_host_port("db"), ("db".to_string(), None));
    }

    #[test]
    fn test_database_names() {
        let config = InfraConfig::from_json(CONFIG).unwrap();
        assert_eq!(
            config.database_names(),
            vec!["orders", "users", "billing", "orders"]
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infra.json");
        std::fs::write(&path, CONFIG).unwrap();
        let config = InfraConfig::load(&path).unwrap();
        assert_eq!(config.sql_servers.len(), 2);
        assert!(InfraConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
