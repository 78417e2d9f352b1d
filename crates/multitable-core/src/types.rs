//! SQL type definitions.

use serde::{Deserialize, Serialize};

/// SQL data types of mapped columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Double,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    // Boolean
    Boolean,

    // String types
    Char(u32),
    VarChar(u32),
    Text,
    Clob,

    // Binary types
    VarBinary(u32),
    Blob,

    // Date/time types
    Date,
    Timestamp,

    // UUID
    Uuid,

    // JSON
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Integer => "integer".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Double => "double precision".to_string(),
            SqlType::Decimal { precision, scale } => format!("decimal({},{})", precision, scale),
            SqlType::Boolean => "boolean".to_string(),
            SqlType::Char(len) => format!("char({})", len),
            SqlType::VarChar(len) => format!("varchar({})", len),
            SqlType::Text => "text".to_string(),
            SqlType::Clob => "clob".to_string(),
            SqlType::VarBinary(len) => format!("varbinary({})", len),
            SqlType::Blob => "blob".to_string(),
            SqlType::Date => "date".to_string(),
            SqlType::Timestamp => "timestamp".to_string(),
            SqlType::Uuid => "uuid".to_string(),
            SqlType::Json => "json".to_string(),
        }
    }

    /// Large-object types are bound after all other values on some dialects.
    pub const fn is_lob(&self) -> bool {
        matches!(self, SqlType::Blob | SqlType::Clob | SqlType::Text)
    }

    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(
            self,
            SqlType::Char(_) | SqlType::VarChar(_) | SqlType::Text | SqlType::Clob
        )
    }
}
