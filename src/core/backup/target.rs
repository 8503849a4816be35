use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;
use url::Url;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DATABASE: &str = "postgres";

/// Directory name under the backup root that can never be a database.
pub const RESERVED_IDENTIFIER: &str = "metadata";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme '{0}', expected postgres or postgresql")]
    UnsupportedScheme(String),

    #[error("connection URL has no host")]
    MissingHost,

    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },
}

/// Parsed form of `postgres[ql]://user:password@host:port/database`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    url: String,
}

impl ConnectionDescriptor {
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        let parsed = Url::parse(raw.trim()).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "postgres" | "postgresql" => {}
            other => return Err(ConnectionError::UnsupportedScheme(other.to_string())),
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(ConnectionError::MissingHost)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let database = parsed.path().trim_start_matches('/');
        let database = if database.is_empty() {
            DEFAULT_DATABASE.to_string()
        } else {
            decode(database)
        };

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            user: decode(parsed.username()),
            password: parsed.password().map(decode).unwrap_or_default(),
            database,
            url: raw.trim().to_string(),
        })
    }

    /// The original URL, for direct client connections.
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// A database to back up, immutable once configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub identifier: String,
    pub connection: ConnectionDescriptor,
}

/// A configured entry that could not become a target. It still shows up as a
/// failed database in every run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTarget {
    pub identifier: String,
    pub reason: String,
}

pub fn validate_identifier(identifier: &str) -> Result<(), ConnectionError> {
    let reject = |reason: &str| ConnectionError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };
    if identifier.is_empty() {
        return Err(reject("must not be empty"));
    }
    if identifier == RESERVED_IDENTIFIER {
        return Err(reject("reserved for run metadata"));
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(reject("only a-z, 0-9, '_' and '-' are allowed"));
    }
    Ok(())
}

impl DatabaseTarget {
    pub fn new(identifier: &str, url: &str) -> Result<Self, ConnectionError> {
        validate_identifier(identifier)?;
        Ok(Self {
            identifier: identifier.to_string(),
            connection: ConnectionDescriptor::parse(url)?,
        })
    }
}

/// Split configured databases into usable targets and rejected entries,
/// both in identifier order.
pub fn resolve_targets(databases: &BTreeMap<String, String>) -> (Vec<DatabaseTarget>, Vec<RejectedTarget>) {
    let mut targets = Vec::new();
    let mut rejected = Vec::new();
    for (identifier, url) in databases {
        match DatabaseTarget::new(identifier, url) {
            Ok(target) => targets.push(target),
            Err(e) => {
                warn!("Rejecting database '{}': {}", identifier, e);
                rejected.push(RejectedTarget {
                    identifier: identifier.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (targets, rejected)
}
