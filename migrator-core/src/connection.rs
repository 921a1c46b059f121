use std::fmt;

use serde::Serialize;

use crate::error::{MigratorError, Result};
use crate::infra::split_host_port;

/// SSL/TLS connection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Plaintext connection.
    #[default]
    Disable,
    /// Encrypted connection without certificate validation, as libpq's `require`.
    Require,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved connection target for one logical database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub logical_name: String,
    /// Physical database name.
    pub database: String,
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub ssl_mode: SslMode,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("logical_name", &self.logical_name)
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Build a `postgres://` URL with percent-encoded credentials and database name.
    pub fn connection_string(&self) -> Result<String> {
        if self.host.is_empty() {
            return Err(MigratorError::ConfigError(format!(
                "Host is required for database '{}'",
                self.logical_name
            )));
        }
        if self.database.is_empty() {
            return Err(MigratorError::ConfigError(format!(
                "Database name is required for database '{}'",
                self.logical_name
            )));
        }
        if self.username.is_empty() {
            return Err(MigratorError::ConfigError(format!(
                "Username is required for database '{}'",
                self.logical_name
            )));
        }
        let port = if self.port.is_empty() {
            crate::infra::DEFAULT_PORT
        } else {
            self.port.as_str()
        };
        if port.parse::<u16>().is_err() {
            return Err(MigratorError::ConfigError(format!(
                "Invalid port '{}' for database '{}'",
                port, self.logical_name
            )));
        }

        let mut auth = urlencoding::encode(&self.username).into_owned();
        if !self.password.is_empty() {
            auth.push(':');
            auth.push_str(&urlencoding::encode(&self.password));
        }

        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        Ok(format!(
            "postgres://{}@{}:{}/{}?sslmode={}",
            auth,
            host,
            port,
            urlencoding::encode(&self.database),
            self.ssl_mode
        ))
    }
}

/// Connection settings supplied on the command line; applied after resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOverrides {
    /// `host` or `host:port`.
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionOverrides {
    /// Apply host, then user, then password. Empty values are ignored.
    pub fn apply(&self, descriptor: &mut ConnectionDescriptor) {
        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            let (new_host, new_port) = split_host_port(host);
            tracing::info!(
                database = %descriptor.logical_name,
                original_host = %descriptor.host,
                original_port = %descriptor.port,
                new_host = %new_host,
                new_port = new_port.unwrap_or(descriptor.port.as_str()),
                "Host override applied"
            );
            descriptor.host = new_host;
            if let Some(port) = new_port {
                descriptor.port = port.to_string();
            }
        }

        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            tracing::info!(
                database = %descriptor.logical_name,
                original_user = %descriptor.username,
                new_user = %user,
                "User override applied"
            );
            descriptor.username = user.to_string();
        }

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            tracing::info!(database = %descriptor.logical_name, "Password override applied");
            descriptor.password = password.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            logical_name: "orders".into(),
            database: "orders_prod".into(),
            host: "db.internal".into(),
            port: "5555".into(),
            username: "svc".into(),
            password: "pw".into(),
            ssl_mode: SslMode::Disable,
        }
    }

    #[test]
    fn test_connection_string_basic() {
        assert_eq!(
            descriptor().connection_string().unwrap(),
            "postgres://svc:pw@db.internal:5555/orders_prod?sslmode=disable"
        );
    }

    #[test]
    fn test_connection_string_round_trips_special_characters() {
        let mut d = descriptor();
        d.username = "a@b".into();
        d.password = "p/q:@%".into();
        d.ssl_mode = SslMode::Require;
        let url = d.connection_string().unwrap();
        assert!(url.contains("a%40b"));
        assert!(url.contains("p%2Fq%3A%40%25"));

        let parsed: tokio_postgres::Config = url.parse().unwrap();
        assert_eq!(parsed.get_user(), Some("a@b"));
        assert_eq!(parsed.get_password(), Some("p/q:@%".as_bytes()));
        assert_eq!(parsed.get_dbname(), Some("orders_prod"));
        assert_eq!(parsed.get_ports(), &[5555]);
        assert_eq!(parsed.get_ssl_mode(), tokio_postgres::config::SslMode::Require);
    }

    #[test]
    fn test_connection_string_requires_fields() {
        let mut d = descriptor();
        d.username.clear();
        assert!(d.connection_string().is_err());

        let mut d = descriptor();
        d.host.clear();
        assert!(d.connection_string().is_err());

        let mut d = descriptor();
        d.port = "abc".into();
        assert!(d.connection_string().is_err());
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let mut d = descriptor();
        d.host = "::1".into();
        assert!(d
            .connection_string()
            .unwrap()
            .contains("@[::1]:5555/"));
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let mut d = descriptor();
        ConnectionOverrides {
            host: Some("tailnet-db:6543".into()),
            user: Some("admin".into()),
            password: Some("override".into()),
        }
        .apply(&mut d);
        assert_eq!(d.host, "tailnet-db");
        assert_eq!(d.port, "6543");
        assert_eq!(d.username, "admin");
        assert_eq!(d.password, "override");
    }

    #[test]
    fn test_host_override_without_port_keeps_port() {
        let mut d = descriptor();
        ConnectionOverrides {
            host: Some("other".into()),
            ..Default::default()
        }
        .apply(&mut d);
        assert_eq!(d.host, "other");
        assert_eq!(d.port, "5555");
        assert_eq!(d.username, "svc");
    }

    #[test]
    fn test_debug_redacts_password() {
        assert!(!format!("{:?}", descriptor()).contains("pw\""));
    }
}
