//! Error types for multi-table mutation operations.

use std::fmt;

/// The primary error type for all multitable operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (acquire, release, unsupported provider)
    Connection(ConnectionError),
    /// Statement execution errors, carrying the offending SQL when known
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Id table / DDL errors
    Schema(SchemaError),
    /// Configuration errors (unknown strategy, empty mutation group, ...)
    Config(ConfigError),
    /// Entity mapping metadata is inconsistent
    Mapping(MappingError),
    /// A row-count expectation failed (optimistic lock / concurrent delete)
    StaleState(StaleStateError),
    /// A statement parameter could not be resolved
    Parameter(ParameterError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// The provider cannot hand out connections directly
    Unsupported,
    /// No connection available
    Exhausted,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub table: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// CREATE of an id table failed
    Create,
    /// DROP of an id table failed
    Drop,
    /// Row cleanup of an id table failed
    Cleanup,
    /// Invalid table definition
    Invalid,
}

#[derive(Debug)]
pub struct ConfigError {
    pub key: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct MappingError {
    pub entity: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct StaleStateError {
    pub table: String,
    pub expected: u64,
    pub actual: u64,
    pub sql: String,
}

#[derive(Debug)]
pub struct ParameterError {
    pub parameter: String,
    pub message: String,
}

impl Error {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            key: None,
            message: message.into(),
            source: None,
        })
    }

    /// Build a configuration error attributed to a property key.
    pub fn config_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            key: Some(key.into()),
            message: message.into(),
            source: None,
        })
    }

    /// Build a mapping error for an entity.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: Some(entity.into()),
            message: message.into(),
        })
    }

    /// Build a parameter resolution error.
    pub fn parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parameter(ParameterError {
            parameter: parameter.into(),
            message: message.into(),
        })
    }

    /// Convert a failure raised while executing `sql` into a query error that
    /// carries the statement text and a contextual message.
    ///
    /// This always produces an error value so call sites can write
    /// `return Outcome::Err(Error::from_sql(e, "...", &sql))`.
    pub fn from_sql(err: Error, message: &str, sql: &str) -> Self {
        match err {
            Error::Query(mut q) => {
                if q.sql.is_none() {
                    q.sql = Some(sql.to_string());
                }
                q.message = format!("{message}: {}", q.message);
                Error::Query(q)
            }
            Error::Cancelled => Error::Cancelled,
            other => {
                let msg = format!("{message}: {other}");
                Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(sql.to_string()),
                    sqlstate: None,
                    message: msg,
                    detail: None,
                    source: Some(Box::new(other)),
                })
            }
        }
    }

    /// Is this a retryable error (deadlock, serialization, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Connection(c) => matches!(c.kind, ConnectionErrorKind::Exhausted),
            _ => false,
        }
    }

    /// Does this error mean the provider cannot supply connections for DDL?
    pub fn is_unsupported_connection(&self) -> bool {
        matches!(self, Error::Connection(c) if c.kind == ConnectionErrorKind::Unsupported)
    }

    /// Is this a constraint violation reported by the database?
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.kind == QueryErrorKind::Constraint)
    }

    /// Get SQLSTATE if available (e.g., "23503" for foreign key violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::StaleState(s) => Some(&s.sql),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)?;
                } else {
                    write!(f, "Query error: {}", e.message)?;
                }
                if let Some(sql) = &e.sql {
                    write!(f, " [{}]", sql)?;
                }
                Ok(())
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::StaleState(e) => write!(f, "Stale state: {}", e),
            Error::Parameter(e) => write!(f, "Parameter error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Schema(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{} ({})", self.message, table),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}: {}", key, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{}: {}", entity, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for StaleStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected row count for table '{}': expected {}, actual {} [{}]",
            self.table, self.expected, self.actual, self.sql
        )
    }
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parameter, self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

/// Result type alias for multitable operations.
pub type Result<T> = std::result::Result<T, Error>;
