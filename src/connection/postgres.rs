use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use log::{debug, info, warn};
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use std::error::Error as _;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;

use crate::error::{MetricsError, Result};

/// Pool settings for a PostgreSQL backend
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// libpq-style connection string or URL
    pub dsn: String,
    pub max_size: usize,
    /// How long a caller waits for a free connection
    pub wait_timeout: Duration,
    /// Extra root certificate for TLS connections
    pub ca_cert: Option<String>,
}

impl PoolConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            max_size: 16,
            wait_timeout: Duration::from_secs(5),
            ca_cert: None,
        }
    }
}

/// Create a connection pool from a DSN
///
/// `sslmode=disable` connects in plain text, any other mode negotiates TLS
/// through `native-tls`.
pub fn create_pool(config: &PoolConfig) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = config
        .dsn
        .parse()
        .map_err(|e| MetricsError::Config(format!("Invalid database DSN: {}", e)))?;

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = match pg_config.get_ssl_mode() {
        SslMode::Disable => {
            debug!("Creating PostgreSQL pool with SSL disabled");
            Manager::from_config(pg_config, NoTls, manager_config)
        }
        mode => {
            debug!("Creating PostgreSQL pool with SSL enabled (mode: {:?})", mode);
            let connector = build_tls_connector(config, mode)?;
            Manager::from_config(pg_config, MakeTlsConnector::new(connector), manager_config)
        }
    };

    let pool = Pool::builder(manager)
        .max_size(config.max_size)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(config.wait_timeout))
        .create_timeout(Some(config.wait_timeout))
        .build()
        .map_err(|e| MetricsError::database(format!("Failed to create connection pool: {}", e)))?;

    info!("PostgreSQL pool ready (max {} connections)", config.max_size);
    Ok(pool)
}

/// Build a TLS connector for the given SSL mode
fn build_tls_connector(config: &PoolConfig, mode: SslMode) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if let Some(ca_cert_path) = &config.ca_cert {
        builder.add_root_certificate(load_certificate(ca_cert_path)?);
    }

    // prefer/require encrypt without authenticating the server
    if matches!(mode, SslMode::Prefer | SslMode::Require) && config.ca_cert.is_none() {
        warn!("TLS enabled without a CA certificate; server identity is not verified");
        builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| MetricsError::Tls(format!("Failed to build TLS connector: {}", e)))
}

/// Load a certificate from a file
pub fn load_certificate<P: AsRef<Path>>(path: P) -> Result<Certificate> {
    let path = path.as_ref();
    let cert_data = fs::read(path).map_err(|e| {
        MetricsError::Tls(format!("Failed to read certificate file {}: {}", path.display(), e))
    })?;
    Certificate::from_pem(&cert_data)
        .map_err(|e| MetricsError::Tls(format!("Invalid certificate format: {}", e)))
}

/// SQLSTATE codes worth retrying
///
/// Class 08 is connection exceptions, 57P01..57P03 are server shutdown or
/// startup, 40001 and 40P01 are serialization failures and deadlocks.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03" | "40001" | "40P01")
}

/// Map a driver error, classifying whether it is worth retrying
pub fn classify_pg_error(err: tokio_postgres::Error, context: &str) -> MetricsError {
    let transient = if let Some(state) = err.code() {
        is_transient_sqlstate(state.code())
    } else {
        err.is_closed() || err.source().is_some_and(|s| s.is::<io::Error>())
    };

    MetricsError::Database {
        message: format!("{}: {}", context, err),
        transient,
    }
}

/// Map a pool checkout error
pub fn classify_pool_error(err: deadpool_postgres::PoolError) -> MetricsError {
    use deadpool_postgres::PoolError;

    match err {
        PoolError::Backend(e) => classify_pg_error(e, "Failed to connect to database"),
        PoolError::Timeout(kind) => MetricsError::Database {
            message: format!("Timed out waiting for a connection ({:?})", kind),
            transient: true,
        },
        PoolError::Closed => MetricsError::Database {
            message: "Connection pool is closed".to_string(),
            transient: true,
        },
        other => MetricsError::database(format!("Connection pool error: {}", other)),
    }
}
