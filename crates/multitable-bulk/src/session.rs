//! The connection and session identity a bulk operation runs on.

use multitable_core::Connection;

/// A connection plus the uid that tags rows staged into shared id tables.
///
/// Two sessions never share a uid, so rows they stage into the same
/// persistent id table stay apart.
#[derive(Debug)]
pub struct BulkSession<C: Connection> {
    connection: C,
    session_uid: String,
}

impl<C: Connection> BulkSession<C> {
    /// Wrap a connection with a fresh random session uid.
    pub fn new(connection: C) -> Self {
        Self::with_session_uid(connection, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_session_uid(connection: C, session_uid: impl Into<String>) -> Self {
        Self {
            connection,
            session_uid: session_uid.into(),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn session_uid(&self) -> &str {
        &self.session_uid
    }

    pub fn into_connection(self) -> C {
        self.connection
    }
}
