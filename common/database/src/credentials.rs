use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::CredentialError;

/// Credentials needed to reach the document store.
///
/// `Debug` never prints the username or password.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredential {
    /// One or more `host[:port]` entries.
    pub hosts: Vec<String>,
    pub username: String,
    pub password: String,
    pub auth_source: Option<String>,
    pub replica_set: Option<String>,
    pub tls: bool,
}

impl DbCredential {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hosts: vec![host.into()],
            username: username.into(),
            password: password.into(),
            auth_source: None,
            replica_set: None,
            tls: false,
        }
    }
}

impl fmt::Debug for DbCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredential")
            .field("hosts", &self.hosts)
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("auth_source", &self.auth_source)
            .field("replica_set", &self.replica_set)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Somewhere credentials can be fetched from before connecting.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<DbCredential, CredentialError>;
}

/// JSON secret file written by a vault sidecar.
///
/// The document is an object with `host` (or `hosts`, a string with comma separated
/// entries or an array of strings), `username` (or `user`) and `password`. `authSource`,
/// `replicaSet` and `tls` are optional.
#[derive(Clone, Debug)]
pub struct SidecarFile {
    path: PathBuf,
}

impl SidecarFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSource for SidecarFile {
    async fn fetch(&self) -> Result<DbCredential, CredentialError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => CredentialError::NotFound {
                    path: self.path.clone(),
                },
                kind => CredentialError::Unreadable {
                    path: self.path.clone(),
                    kind,
                },
            })?;

        let credential = parse_secret(&self.path, &raw)?;
        info!(
            path = %self.path.display(),
            hosts = credential.hosts.len(),
            "loaded database credentials from sidecar file"
        );
        Ok(credential)
    }
}

/// Credentials held in memory, for local runs and tests.
#[derive(Clone, Debug)]
pub struct StaticCredentials(pub DbCredential);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn fetch(&self) -> Result<DbCredential, CredentialError> {
        Ok(self.0.clone())
    }
}

enum FieldError {
    Missing(&'static str),
    Invalid(&'static str, &'static str),
}

fn parse_secret(path: &Path, raw: &str) -> Result<DbCredential, CredentialError> {
    // serde_json's data errors can quote the offending value, so only the
    // category and position are kept.
    let document: Value = serde_json::from_str(raw).map_err(|e| CredentialError::Malformed {
        path: path.to_path_buf(),
        reason: format!(
            "{:?} error at line {} column {}",
            e.classify(),
            e.line(),
            e.column()
        ),
    })?;

    let Value::Object(fields) = document else {
        return Err(CredentialError::Malformed {
            path: path.to_path_buf(),
            reason: "expected a JSON object".to_string(),
        });
    };

    read_fields(&fields).map_err(|e| match e {
        FieldError::Missing(field) => CredentialError::MissingField {
            path: path.to_path_buf(),
            field,
        },
        FieldError::Invalid(field, expected) => CredentialError::InvalidField {
            path: path.to_path_buf(),
            field,
            expected,
        },
    })
}

fn read_fields(fields: &Map<String, Value>) -> Result<DbCredential, FieldError> {
    Ok(DbCredential {
        hosts: hosts(fields)?,
        username: required_string(fields, "username", &["username", "user"])?,
        password: required_string(fields, "password", &["password"])?,
        auth_source: optional_string(fields, "authSource")?,
        replica_set: optional_string(fields, "replicaSet")?,
        tls: match fields.get("tls") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(tls)) => *tls,
            Some(_) => return Err(FieldError::Invalid("tls", "a boolean")),
        },
    })
}

fn lookup<'a>(fields: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .filter(|v| !v.is_null())
}

fn hosts(fields: &Map<String, Value>) -> Result<Vec<String>, FieldError> {
    const EXPECTED: &str = "a host string or an array of host strings";

    let hosts: Vec<String> = match lookup(fields, &["host", "hosts"]) {
        None => return Err(FieldError::Missing("host")),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(h) if !h.trim().is_empty() => Ok(h.trim().to_string()),
                _ => Err(FieldError::Invalid("host", EXPECTED)),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(FieldError::Invalid("host", EXPECTED)),
    };

    if hosts.is_empty() {
        return Err(FieldError::Invalid("host", EXPECTED));
    }
    Ok(hosts)
}

fn required_string(
    fields: &Map<String, Value>,
    field: &'static str,
    names: &[&str],
) -> Result<String, FieldError> {
    match lookup(fields, names) {
        None => Err(FieldError::Missing(field)),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(FieldError::Invalid(field, "a non-empty string")),
    }
}

fn optional_string(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, FieldError> {
    match lookup(fields, &[field]) {
        None => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(FieldError::Invalid(field, "a string")),
    }
}
