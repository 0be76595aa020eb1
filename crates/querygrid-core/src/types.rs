//! Shared types used across QueryGrid crates.

use serde::{Deserialize, Serialize};

/// Kind of store a connection targets.
///
/// Rendered in PascalCase, this is the connection-kind segment of a pool
/// name and the prefix of a store identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatabaseType {
    H2,
    Postgres,
    MySQL,
    Snowflake,
    BigQuery,
    Databricks,
    Redshift,
    SqlServer,
    Mongo,
    Elasticsearch,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DatabaseType::H2 => "H2",
            DatabaseType::Postgres => "Postgres",
            DatabaseType::MySQL => "MySQL",
            DatabaseType::Snowflake => "Snowflake",
            DatabaseType::BigQuery => "BigQuery",
            DatabaseType::Databricks => "Databricks",
            DatabaseType::Redshift => "Redshift",
            DatabaseType::SqlServer => "SqlServer",
            DatabaseType::Mongo => "Mongo",
            DatabaseType::Elasticsearch => "Elasticsearch",
        };
        f.write_str(label)
    }
}

/// Structural descriptor of a target database endpoint.
///
/// Two keys are equal exactly when they describe the same endpoint reached
/// with the same authentication strategy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub database_type: DatabaseType,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    /// Authentication strategy label, e.g. `UserPassword` or `OAuth`.
    pub auth_type: String,
}

impl ConnectionKey {
    pub fn new(
        database_type: DatabaseType,
        host: &str,
        port: u16,
        database_name: &str,
        auth_type: &str,
    ) -> Self {
        Self {
            database_type,
            host: host.to_string(),
            port,
            database_name: database_name.to_string(),
            auth_type: auth_type.to_string(),
        }
    }

    /// Compact, stable rendering of every field of the key.
    pub fn short_id(&self) -> String {
        format!("{}_type:{}", self.store_id(), self.auth_type)
    }

    /// Identifier of the store this key points at, ignoring authentication.
    ///
    /// Pools opened by different principals or auth strategies against the
    /// same database share a store identifier.
    pub fn store_id(&self) -> String {
        format!(
            "{}_host:{}_port:{}_db:{}",
            self.database_type, self.host, self.port, self.database_name
        )
    }
}

/// The caller on whose behalf a pool is opened.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Principal name (username, service account).
    pub name: String,
    /// Credential kind carried by the identity, if any (e.g. `Kerberos`).
    pub credential: Option<String>,
}

impl Identity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            credential: None,
        }
    }

    pub fn with_credential(name: &str, credential: &str) -> Self {
        Self {
            name: name.to_string(),
            credential: Some(credential.to_string()),
        }
    }

    /// Identity used when the caller could not be determined.
    pub fn unknown() -> Self {
        Self::new("unknown")
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::unknown()
    }
}
