//! Database connection, TLS support, advisory locking, and raw execution.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::{Client, Config};

use crate::error::{MigratorError, Result};
use crate::history::MIGRATIONS_TABLE;

/// Multiplier applied to the CRC32 lock key; matches golang-migrate so both tools
/// contend for the same lock.
const ADVISORY_LOCK_SALT: u32 = 1486364155;

/// Upper bound on connect retries.
pub const MAX_CONNECT_RETRIES: u32 = 20;

/// Quote a SQL identifier.
///
/// Doubles any embedded double-quotes and wraps in double-quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Server certificate verifier with libpq `sslmode=require` semantics.
///
/// The channel is encrypted and handshake signatures are checked, but the
/// certificate chain and host name are not validated.
#[derive(Debug)]
struct EncryptOnlyVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for EncryptOnlyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build the rustls ClientConfig used for `sslmode=require` and `prefer`.
fn make_rustls_config() -> Result<rustls::ClientConfig> {
    let provider = rustls::crypto::ring::default_provider();
    let verifier = EncryptOnlyVerifier {
        algorithms: provider.signature_verification_algorithms,
    };
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| MigratorError::ConfigError(format!("Failed to configure TLS: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Check if a postgres error is a permanent authentication failure that should not be retried.
fn is_permanent_error(e: &MigratorError) -> bool {
    if let MigratorError::DatabaseError(e) = e {
        if let Some(db_err) = e.as_db_error() {
            let code = db_err.code().code();
            // 28P01 = invalid_password, 28000 = invalid_authorization_specification
            return code == "28P01" || code == "28000";
        }
    }
    false
}

fn spawn_connection<S, T>(connection: tokio_postgres::Connection<S, T>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "Database connection error");
        }
    });
}

async fn connect_tls(config: &Config) -> Result<Client> {
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_rustls_config()?);
    let (client, connection) = config.connect(tls).await?;
    spawn_connection(connection);
    Ok(client)
}

async fn connect_plain(config: &Config) -> Result<Client> {
    let (client, connection) = config.connect(tokio_postgres::NoTls).await?;
    spawn_connection(connection);
    Ok(client)
}

/// One connection attempt. TLS is chosen from the `sslmode` in the connection string.
async fn connect_once(config: &Config, connect_timeout_secs: u32) -> Result<Client> {
    let connect_fut = async {
        match config.get_ssl_mode() {
            PgSslMode::Disable => connect_plain(config).await,
            PgSslMode::Require => connect_tls(config).await,
            _ => match connect_tls(config).await {
                Ok(client) => Ok(client),
                Err(_) => {
                    tracing::debug!("TLS connection failed, falling back to plaintext");
                    connect_plain(config).await
                }
            },
        }
    };

    if connect_timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(connect_timeout_secs as u64),
            connect_fut,
        )
        .await
        .map_err(|_| MigratorError::ConnectTimeout(connect_timeout_secs))?
    } else {
        connect_fut.await
    }
}

/// Connect, retrying up to `retries` times with exponential backoff + jitter.
///
/// Each retry waits `min(2^attempt, 30)s + rand(0..1000ms)`. Authentication
/// failures are not retried.
pub async fn connect_with_retries(
    conn_string: &str,
    retries: u32,
    connect_timeout_secs: u32,
) -> Result<Client> {
    let config: Config = conn_string.parse()?;
    let retries = retries.min(MAX_CONNECT_RETRIES);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let base_delay = std::cmp::min(1u64 << attempt, 30);
            let delay = Duration::from_secs(base_delay) + Duration::from_millis(fastrand::u64(0..1000));
            tracing::info!(
                attempt = attempt + 1,
                max_attempts = retries + 1,
                delay_ms = delay.as_millis() as u64,
                "Connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        match connect_once(&config, connect_timeout_secs).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!(
                        attempt = attempt + 1,
                        max_attempts = retries + 1,
                        "Connected successfully after retry"
                    );
                }
                return Ok(client);
            }
            Err(e) if is_permanent_error(&e) => {
                tracing::error!(error = %e, "Permanent connection error, not retrying");
                return Err(e);
            }
            Err(e) if attempt >= retries => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, attempt = attempt + 1, "Connection attempt failed");
                attempt += 1;
            }
        }
    }
}

/// Compute golang-migrate's advisory lock id for the version table of `database` in `schema`.
pub fn advisory_lock_id(database: &str, schema: &str) -> i64 {
    let key = [schema, MIGRATIONS_TABLE, database].join("\0");
    crc32fast::hash(key.as_bytes()).wrapping_mul(ADVISORY_LOCK_SALT) as i64
}

/// Acquire the advisory lock for the current database's version table.
///
/// Blocks while another migrator holds it. Returns the lock id for release.
pub async fn acquire_advisory_lock(client: &Client) -> Result<i64> {
    let row = client
        .query_one("SELECT current_database(), current_schema()", &[])
        .await?;
    let database: String = row.get(0);
    let schema: Option<String> = row.get(1);
    let lock_id = advisory_lock_id(&database, schema.as_deref().unwrap_or("public"));
    tracing::debug!(lock_id = lock_id, database = %database, "Acquiring advisory lock");

    client
        .execute("SELECT pg_advisory_lock($1)", &[&lock_id])
        .await
        .map_err(|e| MigratorError::LockError(format!("Failed to acquire advisory lock: {}", e)))?;

    Ok(lock_id)
}

/// Release a lock taken by [`acquire_advisory_lock`].
pub async fn release_advisory_lock(client: &Client, lock_id: i64) -> Result<()> {
    tracing::debug!(lock_id = lock_id, "Releasing advisory lock");

    client
        .execute("SELECT pg_advisory_unlock($1)", &[&lock_id])
        .await
        .map_err(|e| MigratorError::LockError(format!("Failed to release advisory lock: {}", e)))?;

    Ok(())
}

/// Execute SQL without a transaction wrapper. Returns the execution time in milliseconds.
pub async fn execute_raw(client: &Client, sql: &str) -> Result<u64> {
    let start = std::time::Instant::now();
    client.batch_execute(sql).await?;
    Ok(start.elapsed().as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("schema_migrations"), "\"schema_migrations\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_advisory_lock_id_is_stable() {
        let a = advisory_lock_id("orders", "public");
        assert_eq!(a, advisory_lock_id("orders", "public"));
        assert_ne!(a, advisory_lock_id("users", "public"));
        assert_ne!(a, advisory_lock_id("orders", "tenant"));
        assert!(a >= 0);
    }

    #[test]
    fn test_rustls_config_builds() {
        assert!(make_rustls_config().is_ok());
    }

    #[test]
    fn test_require_accepts_private_ca_certificate() {
        let provider = rustls::crypto::ring::default_provider();
        let verifier = EncryptOnlyVerifier {
            algorithms: provider.signature_verification_algorithms,
        };
        // Not chained to any public root, and not even valid DER
        let cert = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x01]);
        let server_name = ServerName::try_from("orders.db.internal").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &server_name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
