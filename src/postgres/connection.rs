// ABOUTME: Opens the long-lived PostgreSQL connection used by the tailer
// ABOUTME: Chooses NoTls or native-tls from the configured sslmode

use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, NoTls};

use crate::config::ConnectionConfig;

/// A client plus the background task driving its socket.
///
/// The connection is opened once at startup and reused by every cycle.
/// [`SourceConnection::close`] releases it.
pub struct SourceConnection {
    client: Client,
    task: JoinHandle<()>,
}

impl SourceConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drop the client and wait for the connection task to finish.
    pub async fn close(self) {
        drop(self.client);
        if let Err(e) = self.task.await {
            tracing::warn!("PostgreSQL connection task ended abnormally: {}", e);
        }
        tracing::debug!("PostgreSQL connection closed");
    }
}

/// Connect to the source database.
///
/// `sslmode=disable` connects in plaintext. `prefer` and `require` go through
/// native-tls. `allow_self_signed_certs` disables certificate and hostname
/// verification and is meant for testing only.
pub async fn connect(
    config: &ConnectionConfig,
    allow_self_signed_certs: bool,
) -> Result<SourceConnection> {
    let target = config.describe();
    tracing::info!("Connecting to {} (sslmode={:?})", target, config.ssl_mode());

    let (client, task) = if config.ssl_mode() == SslMode::Disable {
        let (client, connection) = config
            .pg_config()
            .connect(NoTls)
            .await
            .with_context(|| format!("Failed to connect to {}", target))?;
        (client, spawn_connection(connection))
    } else {
        if allow_self_signed_certs {
            tracing::warn!("Accepting self-signed TLS certificates for {}", target);
        }
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(allow_self_signed_certs)
            .danger_accept_invalid_hostnames(allow_self_signed_certs)
            .build()
            .context("Failed to build TLS connector")?;
        let (client, connection) = config
            .pg_config()
            .connect(MakeTlsConnector::new(connector))
            .await
            .with_context(|| format!("Failed to connect to {}", target))?;
        (client, spawn_connection(connection))
    };

    tracing::info!("Connected to {}", target);
    Ok(SourceConnection { client, task })
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    })
}
