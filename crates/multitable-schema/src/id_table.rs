//! Definitions of the auxiliary tables that stage matching ids.

use multitable_core::{ColumnMapping, MutationTarget, SqlType, TemporaryTableKind};

/// Column holding the session uid in session-scoped id tables.
pub const SESSION_COLUMN: &str = "session_id";

/// Width of [`SESSION_COLUMN`]: a hyphenated UUID.
pub const SESSION_COLUMN_LENGTH: u32 = 36;

/// One column of an id table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTableColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl IdTableColumn {
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable,
        }
    }

    fn session() -> Self {
        Self::new(SESSION_COLUMN, SqlType::Char(SESSION_COLUMN_LENGTH), false)
    }
}

/// Where and how an id table is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTableOptions {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub include_session_column: bool,
    pub kind: TemporaryTableKind,
    /// Also stage non-identifier columns referenced by collection tables.
    pub include_auxiliary_columns: bool,
}

impl IdTableOptions {
    /// Defaults for a kind: only persistent tables carry a session column.
    pub fn new(kind: TemporaryTableKind) -> Self {
        Self {
            catalog: None,
            schema: None,
            include_session_column: kind == TemporaryTableKind::Persistent,
            kind,
            include_auxiliary_columns: true,
        }
    }

    pub fn catalog(mut self, catalog: Option<String>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    pub fn session_column(mut self, include: bool) -> Self {
        self.include_session_column = include;
        self
    }
}

/// A synthetic table holding identifier values (and auxiliary columns) of
/// the rows matched by a bulk statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTableMapping {
    qualified_name: String,
    name: String,
    catalog: Option<String>,
    schema: Option<String>,
    columns: Vec<IdTableColumn>,
    session_column: Option<IdTableColumn>,
    extra_columns: Vec<IdTableColumn>,
    primary_key: Vec<String>,
    kind: TemporaryTableKind,
}

impl IdTableMapping {
    fn new(
        name: &str,
        options: &IdTableOptions,
        columns: Vec<IdTableColumn>,
        extra_columns: Vec<IdTableColumn>,
        primary_key: bool,
    ) -> Self {
        let qualified_name = [options.catalog.as_deref(), options.schema.as_deref(), Some(name)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(".");
        let session_column = options.include_session_column.then(IdTableColumn::session);
        let primary_key = if primary_key {
            columns
                .iter()
                .chain(session_column.as_ref())
                .map(|c| c.name.clone())
                .collect()
        } else {
            Vec::new()
        };
        Self {
            qualified_name,
            name: name.to_string(),
            catalog: options.catalog.clone(),
            schema: options.schema.clone(),
            columns,
            session_column,
            extra_columns,
            primary_key,
            kind: options.kind,
        }
    }

    /// Name to use in DML, including catalog and schema.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Identifier columns, cloned from the root table's key.
    pub fn columns(&self) -> &[IdTableColumn] {
        &self.columns
    }

    pub fn extra_columns(&self) -> &[IdTableColumn] {
        &self.extra_columns
    }

    pub fn session_column(&self) -> Option<&IdTableColumn> {
        self.session_column.as_ref()
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn kind(&self) -> TemporaryTableKind {
        self.kind
    }

    /// Rows of this table are tagged with a session uid.
    pub fn is_session_scoped(&self) -> bool {
        self.session_column.is_some()
    }

    pub fn id_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn extra_column_names(&self) -> Vec<&str> {
        self.extra_columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Identifier and auxiliary columns, in staging order.
    pub fn staged_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .chain(&self.extra_columns)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Every physical column, session column last.
    pub fn all_columns(&self) -> impl Iterator<Item = &IdTableColumn> {
        self.columns
            .iter()
            .chain(&self.extra_columns)
            .chain(self.session_column.as_ref())
    }

    /// `session_id = ?` for session-scoped tables.
    pub fn session_predicate(&self) -> Option<String> {
        self.session_column
            .as_ref()
            .map(|c| format!("{} = ?", c.name))
    }
}

/// Does a bulk mutation of this entity need a staging table?
///
/// A flat single-table entity is mutated with one statement and never does.
pub fn needs_id_table(target: &MutationTarget) -> bool {
    target.is_multi_table()
}

/// Non-identifier owner columns referenced by collection tables, in
/// collection order without duplicates.
pub fn auxiliary_columns(target: &MutationTarget) -> Vec<&ColumnMapping> {
    let mut out: Vec<&ColumnMapping> = Vec::new();
    for collection in target.collections() {
        for name in &collection.target_columns {
            let is_id = target.identifier_columns().iter().any(|c| &c.name == name);
            if is_id || out.iter().any(|c| &c.name == name) {
                continue;
            }
            if let Some(mapping) = target.column(name) {
                out.push(mapping);
            }
        }
    }
    out
}

/// Derive the id table of an entity: its identifier columns, the
/// non-identifier columns referenced by collection tables when requested,
/// and the session column for session-scoped kinds.
pub fn generate_id_table_definition(
    target: &MutationTarget,
    options: IdTableOptions,
) -> IdTableMapping {
    let columns: Vec<IdTableColumn> = target
        .identifier_columns()
        .iter()
        .map(|c| IdTableColumn::new(&c.name, c.sql_type.clone(), false))
        .collect();

    let extra_columns: Vec<IdTableColumn> = if options.include_auxiliary_columns {
        auxiliary_columns(target)
            .into_iter()
            .map(|c| IdTableColumn::new(&c.name, c.sql_type.clone(), true))
            .collect()
    } else {
        Vec::new()
    };

    let primary_key = options.kind == TemporaryTableKind::Persistent;
    tracing::debug!(
        entity = target.entity_name(),
        table = target.id_table_name(),
        kind = ?options.kind,
        "generated id table definition"
    );
    IdTableMapping::new(
        target.id_table_name(),
        &options,
        columns,
        extra_columns,
        primary_key,
    )
}

/// Derive the entity-shaped staging table used by bulk INSERT: the
/// identifier plus every insertable column of every table.
pub fn generate_staging_table_definition(
    target: &MutationTarget,
    options: IdTableOptions,
) -> IdTableMapping {
    let columns: Vec<IdTableColumn> = target
        .identifier_columns()
        .iter()
        .map(|c| IdTableColumn::new(&c.name, c.sql_type.clone(), false))
        .collect();
    let mut values: Vec<IdTableColumn> = Vec::new();
    for table in target.tables() {
        for column in table.value_columns() {
            if column.formula || !column.insertable {
                continue;
            }
            let known = columns.iter().chain(&values).any(|c| c.name == column.name);
            if !known {
                values.push(IdTableColumn::new(&column.name, column.sql_type.clone(), true));
            }
        }
    }
    IdTableMapping::new(target.staging_table_name(), &options, columns, values, false)
}
