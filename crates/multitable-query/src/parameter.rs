//! Parameter specifications and their resolution to bound values.
//!
//! Compiled SQL carries plain `?` markers; each marker has a matching
//! [`ParameterSpec`] in textual order. Values are only resolved when a
//! statement is executed, from a [`BindingContext`].

use multitable_core::{Error, Result, Value};
use std::collections::HashMap;

/// Which value of a column a row-level parameter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterUsage {
    /// New value written by the statement.
    Set,
    /// Value used to identify / lock the row.
    Restrict,
}

/// Source of the value bound to one `?` marker.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSpec {
    /// 1-based positional query parameter.
    Ordinal(usize),
    /// Named query parameter.
    Named(String),
    /// A value the compiler chose to bind instead of inlining.
    Literal(Value),
    /// Identifier of the executing bulk session.
    SessionUid,
    /// Column value of the row being persisted.
    Column {
        column: String,
        usage: ParameterUsage,
    },
}

impl ParameterSpec {
    pub fn set(column: impl Into<String>) -> Self {
        ParameterSpec::Column {
            column: column.into(),
            usage: ParameterUsage::Set,
        }
    }

    pub fn restrict(column: impl Into<String>) -> Self {
        ParameterSpec::Column {
            column: column.into(),
            usage: ParameterUsage::Restrict,
        }
    }

    fn describe(&self) -> String {
        match self {
            ParameterSpec::Ordinal(i) => format!("?{i}"),
            ParameterSpec::Named(n) => format!(":{n}"),
            ParameterSpec::Literal(_) => "literal".to_string(),
            ParameterSpec::SessionUid => "session uid".to_string(),
            ParameterSpec::Column { column, .. } => column.clone(),
        }
    }
}

/// Values supplied by the caller for the query parameters of a bulk statement.
#[derive(Debug, Clone, Default)]
pub struct QueryParameterBindings {
    ordinal: Vec<Value>,
    named: HashMap<String, Value>,
}

impl QueryParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind positional parameters, `?1` first.
    pub fn positional(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            ordinal: values.into_iter().map(Into::into).collect(),
            named: HashMap::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn ordinal(&self, index: usize) -> Option<&Value> {
        index.checked_sub(1).and_then(|i| self.ordinal.get(i))
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.ordinal.is_empty() && self.named.is_empty()
    }
}

/// Column values of one entity row for row-level mutations.
#[derive(Debug, Clone, Default)]
pub struct RowValues {
    values: HashMap<String, Value>,
    restrictions: HashMap<String, Value>,
}

impl RowValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value written to (and, unless overridden, restricted by) a column.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Previous value used in restrictions (optimistic locking).
    pub fn with_restriction(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.restrictions.insert(column.into(), value.into());
        self
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn restriction(&self, column: &str) -> Option<&Value> {
        self.restrictions
            .get(column)
            .or_else(|| self.values.get(column))
    }
}

/// Everything needed to turn parameter specs into values.
#[derive(Debug, Clone, Copy)]
pub struct BindingContext<'a> {
    query: Option<&'a QueryParameterBindings>,
    row: Option<&'a RowValues>,
    session_uid: Option<&'a str>,
}

impl<'a> BindingContext<'a> {
    pub fn for_query(query: &'a QueryParameterBindings) -> Self {
        Self {
            query: Some(query),
            row: None,
            session_uid: None,
        }
    }

    pub fn for_row(row: &'a RowValues) -> Self {
        Self {
            query: None,
            row: Some(row),
            session_uid: None,
        }
    }

    pub fn with_session_uid(mut self, uid: &'a str) -> Self {
        self.session_uid = Some(uid);
        self
    }

    pub fn resolve(&self, spec: &ParameterSpec) -> Result<Value> {
        let missing = || Error::parameter(spec.describe(), "no value bound");
        match spec {
            ParameterSpec::Ordinal(i) => self
                .query
                .and_then(|q| q.ordinal(*i))
                .cloned()
                .ok_or_else(missing),
            ParameterSpec::Named(name) => self
                .query
                .and_then(|q| q.named(name))
                .cloned()
                .ok_or_else(missing),
            ParameterSpec::Literal(value) => Ok(value.clone()),
            ParameterSpec::SessionUid => self
                .session_uid
                .map(|uid| Value::Text(uid.to_string()))
                .ok_or_else(missing),
            ParameterSpec::Column { column, usage } => {
                let row = self.row.ok_or_else(missing)?;
                let value = match usage {
                    ParameterUsage::Set => row.value(column),
                    ParameterUsage::Restrict => row.restriction(column),
                };
                Ok(value.cloned().unwrap_or(Value::Null))
            }
        }
    }

    pub fn resolve_all(&self, specs: &[ParameterSpec]) -> Result<Vec<Value>> {
        specs.iter().map(|spec| self.resolve(spec)).collect()
    }
}

/// SQL text with `?` markers and the parameter spec of each marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub parameters: Vec<ParameterSpec>,
}

impl RenderedSql {
    pub fn new(sql: impl Into<String>, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// Statement without parameters.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}
