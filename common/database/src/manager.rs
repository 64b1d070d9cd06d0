use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::credentials::DbCredential;
use crate::error::{ConnectionError, DisconnectError};
use crate::mongo::MongoConnector;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Logical database handed out by [`ConnectionManager::get_db`].
    pub database: String,
    /// Log every command sent to the server under the `database::query` target.
    pub print_queries: bool,
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub app_name: Option<String>,
}

impl ConnectionOptions {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            print_queries: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            app_name: None,
        }
    }

    pub fn with_print_queries(mut self, print_queries: bool) -> Self {
        self.print_queries = print_queries;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

/// Where a [`ConnectionManager`] is in its one-way life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Failed,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Driver seam used by [`ConnectionManager`]. Implementations make a single attempt
/// and leave timeouts to the manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;
    type Database: Clone + Send + Sync + 'static;

    /// Open a client and confirm the server answers.
    async fn connect(
        &self,
        credential: &DbCredential,
        options: &ConnectionOptions,
    ) -> Result<Self::Client, ConnectionError>;

    fn database(&self, client: &Self::Client, name: &str) -> Self::Database;

    async fn ping(&self, database: &Self::Database) -> Result<(), ConnectionError>;

    async fn close(&self, client: Self::Client) -> Result<(), DisconnectError>;
}

enum Slot<Cl, Db> {
    Uninitialized,
    Connecting,
    Connected {
        client: Cl,
        database: Db,
        disconnect_timeout: Duration,
    },
    Failed,
    Disconnecting,
    Disconnected,
}

impl<Cl, Db> Slot<Cl, Db> {
    fn state(&self) -> ConnectionState {
        match self {
            Slot::Uninitialized => ConnectionState::Uninitialized,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Connected { .. } => ConnectionState::Connected,
            Slot::Failed => ConnectionState::Failed,
            Slot::Disconnecting => ConnectionState::Disconnecting,
            Slot::Disconnected => ConnectionState::Disconnected,
        }
    }
}

/// Owns the single process-wide database connection.
///
/// The connection goes through `Uninitialized -> Connecting -> Connected | Failed`,
/// and from `Connected` through `Disconnecting -> Disconnected`. No state is ever
/// re-entered: a second [`connect`](Self::connect) is rejected and a failed attempt
/// is not retried.
pub struct ConnectionManager<C: Connector = MongoConnector> {
    connector: C,
    slot: Mutex<Slot<C::Client, C::Database>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slot: Mutex::new(Slot::Uninitialized),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state()
    }

    /// Make the one connection attempt, bounded by `options.connect_timeout`.
    pub async fn connect(
        &self,
        credential: &DbCredential,
        options: &ConnectionOptions,
    ) -> Result<C::Database, ConnectionError> {
        {
            let mut slot = self.lock();
            if !matches!(*slot, Slot::Uninitialized) {
                let state = slot.state();
                warn!(%state, "connect called more than once, ignoring");
                return Err(ConnectionError::AlreadyAttempted(state));
            }
            *slot = Slot::Connecting;
        }
        let mut attempt = AttemptGuard {
            slot: &self.slot,
            settled: false,
        };

        info!(
            database = %options.database,
            hosts = credential.hosts.len(),
            print_queries = options.print_queries,
            timeout_secs = options.connect_timeout.as_secs_f64(),
            "connecting to database"
        );

        // Failures are returned, not logged: the caller reports them once before exiting.
        let client = match tokio::time::timeout(
            options.connect_timeout,
            self.connector.connect(credential, options),
        )
        .await
        {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                debug!("connect attempt failed: {e}");
                return Err(e);
            }
            Err(_) => {
                debug!("connect attempt timed out");
                return Err(ConnectionError::Timeout(options.connect_timeout));
            }
        };

        let database = self.connector.database(&client, &options.database);
        attempt.settle(Slot::Connected {
            client,
            database: database.clone(),
            disconnect_timeout: options.disconnect_timeout,
        });
        info!(database = %options.database, "connected to database");
        Ok(database)
    }

    pub fn get_db(&self) -> Result<C::Database, ConnectionError> {
        match &*self.lock() {
            Slot::Connected { database, .. } => Ok(database.clone()),
            slot => Err(not_connected(slot.state())),
        }
    }

    pub fn get_client(&self) -> Result<C::Client, ConnectionError> {
        match &*self.lock() {
            Slot::Connected { client, .. } => Ok(client.clone()),
            slot => Err(not_connected(slot.state())),
        }
    }

    /// Round trip to the server, bounded by `timeout`.
    pub async fn ping(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let database = self.get_db()?;
        tokio::time::timeout(timeout, self.connector.ping(&database))
            .await
            .unwrap_or(Err(ConnectionError::Timeout(timeout)))
    }

    /// Close the connection if one is open. Safe to call any number of times; only the
    /// first call on a connected manager does anything. The manager ends up
    /// `Disconnected` even when closing fails or times out.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let (client, timeout) = {
            let mut slot = self.lock();
            match std::mem::replace(&mut *slot, Slot::Disconnecting) {
                Slot::Connected {
                    client,
                    disconnect_timeout,
                    ..
                } => (client, disconnect_timeout),
                other => {
                    debug!(state = %other.state(), "no open database connection to close");
                    *slot = other;
                    return Ok(());
                }
            }
        };

        info!(
            timeout_secs = timeout.as_secs_f64(),
            "disconnecting from database"
        );
        let result = tokio::time::timeout(timeout, self.connector.close(client))
            .await
            .unwrap_or(Err(DisconnectError::Timeout(timeout)));
        *self.lock() = Slot::Disconnected;

        match &result {
            Ok(()) => info!("disconnected from database"),
            Err(e) => warn!("database disconnect did not complete cleanly: {e}"),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Slot<C::Client, C::Database>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_connected(state: ConnectionState) -> ConnectionError {
    match state {
        ConnectionState::Disconnecting | ConnectionState::Disconnected => {
            ConnectionError::Closed
        }
        _ => ConnectionError::NotInitialized,
    }
}

/// Marks an attempt `Failed` unless it settles, so an error, a timeout or a dropped
/// `connect` future never leaves the manager stuck in `Connecting`.
struct AttemptGuard<'a, Cl, Db> {
    slot: &'a Mutex<Slot<Cl, Db>>,
    settled: bool,
}

impl<Cl, Db> AttemptGuard<'_, Cl, Db> {
    fn settle(&mut self, slot: Slot<Cl, Db>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = slot;
        self.settled = true;
    }
}

impl<Cl, Db> Drop for AttemptGuard<'_, Cl, Db> {
    fn drop(&mut self) {
        if !self.settled {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Failed;
        }
    }
}
