//! Startup and shutdown wiring: credentials, the single database connection, the HTTP
//! server and the ordered shutdown hooks that tear them down again.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use database::{
    ConnectionError, ConnectionManager, Connector, CredentialError, CredentialSource,
};
use lifecycle::{HookOptions, LifecycleError, ShutdownCoordinator, ShutdownReport};
use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{ConfigError, ServiceEnvironment};
use crate::SERVICE_NAME;

pub const HTTP_SERVER_HOOK: &str = "http-server";
pub const DATABASE_HOOK: &str = "database";

/// Anything that stops the service from starting. Each one ends the process after a
/// single log record.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load database credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("failed to connect to database: {0}")]
    Connection(#[from] ConnectionError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to register shutdown hook: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// The single record written for a startup failure, just before the process exits.
pub fn report_fatal(err: &BootstrapError) {
    error!("{err}");
}

/// Fetch credentials and make the one connection attempt. Nothing is retried, and no
/// connect is attempted when the credentials cannot be loaded.
pub async fn connect_database<C: Connector>(
    env: &ServiceEnvironment,
    source: &dyn CredentialSource,
    connector: C,
) -> Result<Arc<ConnectionManager<C>>, BootstrapError> {
    let credential = source.fetch().await?;
    let manager = Arc::new(ConnectionManager::new(connector));
    manager
        .connect(&credential, &env.connection_options())
        .await?;
    Ok(manager)
}

pub async fn bind(env: &ServiceEnvironment) -> Result<TcpListener, BootstrapError> {
    let addr = format!("{}:{}", env.bind_host, env.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| BootstrapError::Bind { addr, source })
}

/// Serve `app` until shutdown, then run the hooks and return their report.
///
/// Hooks are registered in teardown order: the server drain first, bounded by
/// `shutdown_drain`, then the database disconnect. In-flight requests therefore keep a
/// working connection while they drain.
pub async fn run_until_shutdown<C: Connector>(
    env: &ServiceEnvironment,
    listener: TcpListener,
    app: Router,
    db: Arc<ConnectionManager<C>>,
    coordinator: ShutdownCoordinator,
) -> Result<ShutdownReport, BootstrapError> {
    let local_addr = listener.local_addr().ok();

    let server = {
        let coordinator = coordinator.clone();
        let signal = coordinator.shutdown_signal();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await;
            if let Err(e) = &result {
                error!("http server failed: {e}");
            }
            if !coordinator.is_shutting_down() {
                coordinator.trigger("http-server-exited");
            }
            result
        })
    };

    coordinator.on_signal(
        HTTP_SERVER_HOOK,
        HookOptions::new().with_timeout(env.shutdown_drain),
        move || async move {
            server
                .await
                .context("http server task failed")?
                .context("http server returned an error")
        },
    )?;

    coordinator.on_signal(
        DATABASE_HOOK,
        HookOptions::new().with_timeout(env.db_disconnect_timeout.saturating_mul(2)),
        move || async move { db.disconnect().await },
    )?;

    log_started(env, local_addr);
    Ok(coordinator.monitor().await)
}

fn log_started(env: &ServiceEnvironment, addr: Option<SocketAddr>) {
    let started = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let addr = addr.map(|a| a.to_string()).unwrap_or_default();
    info!(
        name = SERVICE_NAME,
        environment = %env.environment,
        started = %started,
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        "service started"
    );
}
