use std::collections::HashMap;
use std::convert::Infallible;
use std::ops::Deref;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use database::ConnectionOptions;
use envconfig::Envconfig;
use thiserror::Error;

use crate::SERVICE_NAME;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ENVIRONMENT: &str = "local";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {0} has an invalid value")]
    Invalid(&'static str),
}

/// Boolean that reads anything it does not recognise as `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LenientBool(pub bool);

impl FromStr for LenientBool {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(LenientBool(matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "yes" | "on" | "t"
        )))
    }
}

impl Deref for LenientBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[derive(Envconfig)]
struct EnvVars {
    #[envconfig(from = "environment", default = "local")]
    environment: String,

    #[envconfig(from = "bindHost", default = "0.0.0.0")]
    bind_host: String,

    // Kept as a string so that an empty value falls back to the default port.
    #[envconfig(from = "port", default = "8080")]
    port: String,

    #[envconfig(from = "dbName")]
    db_name: NonEmptyString,

    #[envconfig(from = "printDBQueries", default = "false")]
    print_db_queries: LenientBool,

    #[envconfig(from = "MongoVaultSideCar")]
    mongo_vault_sidecar: NonEmptyString,

    #[envconfig(from = "disableAuth", default = "false")]
    disable_auth: LenientBool,

    #[envconfig(from = "logLevel", default = "info")]
    log_level: String,

    #[envconfig(from = "dbConnectTimeoutSecs", default = "10")]
    db_connect_timeout_secs: u64,

    #[envconfig(from = "dbDisconnectTimeoutSecs", default = "5")]
    db_disconnect_timeout_secs: u64,

    #[envconfig(from = "shutdownDrainSecs", default = "10")]
    shutdown_drain_secs: u64,

    #[envconfig(from = "shutdownTimeoutSecs", default = "30")]
    shutdown_timeout_secs: u64,

    #[envconfig(from = "exportPrometheus", default = "false")]
    export_prometheus: LenientBool,
}

/// Process configuration, read once at startup and shared by reference afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEnvironment {
    pub environment: String,
    pub bind_host: String,
    pub port: u16,
    pub db_name: String,
    pub print_db_queries: bool,
    /// Path of the credential secret written by the vault sidecar.
    pub secret_path: PathBuf,
    pub disable_auth: bool,
    pub log_level: String,
    pub db_connect_timeout: Duration,
    pub db_disconnect_timeout: Duration,
    /// How long in-flight requests get to finish once shutdown starts.
    pub shutdown_drain: Duration,
    /// Ceiling on the whole shutdown hook sequence.
    pub shutdown_timeout: Duration,
    pub export_prometheus: bool,
}

impl ServiceEnvironment {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(EnvVars::init_from_env())
    }

    pub fn from_hashmap(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_vars(EnvVars::init_from_hashmap(vars))
    }

    /// `local` and `dev` get human readable logs, everything else JSON.
    pub fn is_local(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "local" | "dev" | "development"
        )
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::new(self.db_name.clone())
            .with_print_queries(self.print_db_queries)
            .with_connect_timeout(self.db_connect_timeout)
            .with_disconnect_timeout(self.db_disconnect_timeout)
            .with_app_name(SERVICE_NAME)
    }

    fn from_vars(vars: Result<EnvVars, envconfig::Error>) -> Result<Self, ConfigError> {
        let vars = vars.map_err(|e| match e {
            envconfig::Error::EnvVarMissing { name } => ConfigError::Missing(name),
            // The only required fields fail to parse when they are empty.
            envconfig::Error::ParseError { name }
                if name == "dbName" || name == "MongoVaultSideCar" =>
            {
                ConfigError::Missing(name)
            }
            envconfig::Error::ParseError { name } => ConfigError::Invalid(name),
        })?;

        let port = match vars.port.trim() {
            "" => DEFAULT_PORT,
            port => port.parse().map_err(|_| ConfigError::Invalid("port"))?,
        };

        Ok(ServiceEnvironment {
            environment: or_default(vars.environment, DEFAULT_ENVIRONMENT),
            bind_host: vars.bind_host,
            port,
            db_name: vars.db_name.0,
            print_db_queries: *vars.print_db_queries,
            secret_path: PathBuf::from(vars.mongo_vault_sidecar.0),
            disable_auth: *vars.disable_auth,
            log_level: or_default(vars.log_level, DEFAULT_LOG_LEVEL),
            db_connect_timeout: Duration::from_secs(vars.db_connect_timeout_secs),
            db_disconnect_timeout: Duration::from_secs(vars.db_disconnect_timeout_secs),
            shutdown_drain: Duration::from_secs(vars.shutdown_drain_secs),
            shutdown_timeout: Duration::from_secs(vars.shutdown_timeout_secs),
            export_prometheus: *vars.export_prometheus,
        })
    }
}

// envconfig only applies `default` when a variable is absent, not when it is empty.
fn or_default(value: String, default: &str) -> String {
    match value.trim() {
        "" => default.to_string(),
        value => value.to_string(),
    }
}
