use std::fmt::Debug;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Declarative description of one backend instance.
///
/// The same record is read from the settings file at startup and from JSON
/// payloads delivered over the propagation channel at runtime.
///
/// Records written in the flat legacy layout (`db_name`, `coll`, `uri`,
/// `retry_times`, `timeout`, `user_name`, `password`, `auth_db`, no tag) are
/// accepted too; such a record is registered under its database name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "ConnectionRecord")]
pub struct ConnectionConfig {
    /// Caller-chosen key this connection is registered under
    pub tag: String,

    /// Network address or driver URI, e.g. `mongodb://host:27017` or `redis://host:6379`
    pub address: String,

    #[serde(default)]
    pub credentials: Credentials,

    /// Database the connection is scoped to (database name, or cache db index)
    #[serde(default)]
    pub database: Option<String>,

    /// Resource inside the database the connection targets (e.g. a collection)
    #[serde(default)]
    pub sub_resource: Option<String>,

    /// Connection attempts after the first one before giving up
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Bound on connecting and on every network round trip (unit: milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Database to authenticate against when the user is not defined in `admin`
    #[serde(default)]
    pub auth_source: Option<String>,
}

impl Debug for Credentials {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("auth_source", &self.auth_source)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(
        tag: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            address: address.into(),
            credentials: Credentials::default(),
            database: None,
            sub_resource: None,
            retry: default_retry(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_database(
        mut self,
        database: impl Into<String>,
    ) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_sub_resource(
        mut self,
        sub_resource: impl Into<String>,
    ) -> Self {
        self.sub_resource = Some(sub_resource.into());
        self
    }

    pub fn with_credentials(
        mut self,
        credentials: Credentials,
    ) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_retry(
        mut self,
        retry: u32,
    ) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Decodes a JSON list of records, the format used by live config payloads
    pub fn list_from_slice(payload: &[u8]) -> Result<Vec<Self>> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Validates a single record
    /// # Errors
    /// Returns `Error::InvalidConfig` when:
    /// - tag or address is blank
    /// - timeout is 0
    pub fn validate(&self) -> Result<()> {
        if self.tag.trim().is_empty() {
            return Err(Error::InvalidConfig("connection tag cannot be empty".into()));
        }

        if self.address.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "connection {} has an empty address",
                self.tag
            )));
        }

        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(format!(
                "connection {} timeout_ms must be greater than 0",
                self.tag
            )));
        }

        Ok(())
    }
}

/// Checks a list of records for validity and tag uniqueness
pub fn validate_connections(
    family: &str,
    configs: &[ConnectionConfig],
) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for config in configs {
        config.validate()?;
        if !seen.insert(config.tag.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "duplicate {} tag: {}",
                family, config.tag
            )));
        }
    }
    Ok(())
}

/// Wire shape of [`ConnectionConfig`], accepting both the nested and the
/// flat legacy layout
#[derive(Deserialize)]
struct ConnectionRecord {
    #[serde(default)]
    tag: String,
    #[serde(alias = "uri")]
    address: String,
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default, alias = "user_name")]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, alias = "auth_db")]
    auth_source: Option<String>,
    #[serde(default, alias = "db_name")]
    database: Option<String>,
    #[serde(default, alias = "coll")]
    sub_resource: Option<String>,
    #[serde(default = "default_retry", alias = "retry_times")]
    retry: u32,
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    timeout_ms: u64,
}

impl From<ConnectionRecord> for ConnectionConfig {
    fn from(record: ConnectionRecord) -> Self {
        let nested = record.credentials.unwrap_or_default();
        let credentials = Credentials {
            username: non_empty(record.username).or(non_empty(nested.username)),
            password: non_empty(record.password).or(non_empty(nested.password)),
            auth_source: non_empty(record.auth_source).or(non_empty(nested.auth_source)),
        };
        let database = non_empty(record.database);
        let tag = match record.tag.trim() {
            "" => database.clone().unwrap_or_default(),
            _ => record.tag,
        };

        Self {
            tag,
            address: record.address,
            credentials,
            database,
            sub_resource: non_empty(record.sub_resource),
            retry: record.retry,
            timeout_ms: record.timeout_ms,
        }
    }
}

/// Legacy writers send `""` for unset fields
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn default_retry() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    5000
}
