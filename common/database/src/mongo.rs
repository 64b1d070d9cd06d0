use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::event::command::CommandEvent;
use mongodb::event::EventHandler;
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Database};
use tracing::{debug, info, warn};

use crate::credentials::DbCredential;
use crate::error::{ConnectionError, DisconnectError};
use crate::manager::{ConnectionOptions, Connector};

/// Tracing target for command logs emitted when query printing is on.
pub const QUERY_LOG_TARGET: &str = "database::query";

/// [`Connector`] backed by the official MongoDB driver.
#[derive(Clone, Debug, Default)]
pub struct MongoConnector;

impl MongoConnector {
    /// Build driver options field by field so the password never passes through a
    /// connection string.
    pub fn client_options(
        credential: &DbCredential,
        options: &ConnectionOptions,
    ) -> Result<ClientOptions, ConnectionError> {
        let hosts = credential
            .hosts
            .iter()
            .map(|host| {
                ServerAddress::parse(host).map_err(|_| {
                    ConnectionError::InvalidSettings(format!("invalid database host '{host}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut auth = Credential::default();
        auth.username = Some(credential.username.clone());
        auth.password = Some(credential.password.clone());
        auth.source = credential.auth_source.clone();

        let mut client_options = ClientOptions::default();
        client_options.hosts = hosts;
        client_options.credential = Some(auth);
        client_options.app_name = options.app_name.clone();
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.server_selection_timeout = Some(options.connect_timeout);
        client_options.repl_set_name = credential.replica_set.clone();
        if credential.tls {
            client_options.tls = Some(Tls::Enabled(TlsOptions::default()));
        }
        if options.print_queries {
            client_options.command_event_handler = Some(EventHandler::callback(log_command));
        }
        Ok(client_options)
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Client = Client;
    type Database = Database;

    async fn connect(
        &self,
        credential: &DbCredential,
        options: &ConnectionOptions,
    ) -> Result<Client, ConnectionError> {
        let client_options = Self::client_options(credential, options)?;
        let client = Client::with_options(client_options)
            .map_err(|e| ConnectionError::InvalidSettings(e.to_string()))?;

        // The driver connects lazily; a ping forces server selection and authentication.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConnectionError::Refused(e.to_string()))?;
        Ok(client)
    }

    fn database(&self, client: &Client, name: &str) -> Database {
        client.database(name)
    }

    async fn ping(&self, database: &Database) -> Result<(), ConnectionError> {
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| ConnectionError::Refused(e.to_string()))
    }

    async fn close(&self, client: Client) -> Result<(), DisconnectError> {
        client.shutdown().await;
        Ok(())
    }
}

fn log_command(event: CommandEvent) {
    match event {
        CommandEvent::Started(started) => info!(
            target: QUERY_LOG_TARGET,
            db = %started.db,
            command = %started.command_name,
            request_id = started.request_id,
            query = %started.command,
            "database command started"
        ),
        CommandEvent::Succeeded(succeeded) => debug!(
            target: QUERY_LOG_TARGET,
            command = %succeeded.command_name,
            request_id = succeeded.request_id,
            duration_secs = succeeded.duration.as_secs_f64(),
            "database command succeeded"
        ),
        CommandEvent::Failed(failed) => warn!(
            target: QUERY_LOG_TARGET,
            command = %failed.command_name,
            request_id = failed.request_id,
            duration_secs = failed.duration.as_secs_f64(),
            error = %failed.failure,
            "database command failed"
        ),
        _ => {}
    }
}
