//! Document store access for services: credentials from a secret sidecar file and a
//! single managed connection with bounded connect and disconnect.
//!
//! ```no_run
//! use database::{ConnectionManager, ConnectionOptions, CredentialSource, MongoConnector, SidecarFile};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credential = SidecarFile::new("/vault/secrets/mongo.json").fetch().await?;
//! let manager = ConnectionManager::new(MongoConnector);
//! let orders = manager
//!     .connect(&credential, &ConnectionOptions::new("orders"))
//!     .await?;
//! # drop(orders);
//! manager.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod credentials;
mod error;
mod manager;
mod mongo;

pub use credentials::{CredentialSource, DbCredential, SidecarFile, StaticCredentials};
pub use error::{ConnectionError, CredentialError, DisconnectError};
pub use manager::{
    ConnectionManager, ConnectionOptions, ConnectionState, Connector, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DISCONNECT_TIMEOUT,
};
pub use mongo::{MongoConnector, QUERY_LOG_TARGET};
