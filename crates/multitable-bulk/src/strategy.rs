//! Bulk id strategies.
//!
//! A strategy decides where matching ids are staged (a global temporary
//! table, a shared persistent table, a connection-local temporary table, a
//! CTE or memory), what happens to the staging table around each use, and
//! which handler runs a bulk statement. Table-based strategies differ only
//! in their [`StagingHooks`], so one handler type serves all of them.

use crate::cte::CteHandler;
use crate::direct::DirectHandler;
use crate::handler::BulkHandler;
use crate::inline::InlineHandler;
use crate::insert::TableBasedInsertHandler;
use crate::table_based::TableBasedHandler;
use multitable_core::{
    ConnectionProvider, Cx, Dialect, Error, MutationTarget, Outcome, Result, StrategyKind,
    TemporaryTableKind,
};
use multitable_query::{BulkDelete, BulkInsert, BulkUpdate, ParameterSpec, RenderedSql};
use multitable_schema::{
    DdlReport, IdTableDdl, IdTableMapping, IdTableOptions, cleanup_table_definitions,
    export_table_definitions, generate_id_table_definition, generate_staging_table_definition,
    needs_id_table,
};
use std::fmt;
use std::sync::Arc;

/// Settings shared by the table-based strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStrategyOptions {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// Create id tables at boot.
    pub create_tables: bool,
    /// Drop id tables at shutdown, or after each use for local tables.
    pub drop_tables: bool,
    /// Delete staged rows after each use.
    pub clean_rows: bool,
}

impl Default for TableStrategyOptions {
    fn default() -> Self {
        Self {
            catalog: None,
            schema: None,
            create_tables: true,
            drop_tables: false,
            clean_rows: false,
        }
    }
}

/// DDL issued on the operation's connection before staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforeUseAction {
    None,
    /// Create the id table; failure is ignored since it may already exist.
    Create,
}

/// Statement issued after the operation, whatever its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterUseAction {
    None,
    /// Delete the staged rows (of this session, for shared tables).
    Clean,
    Drop,
}

/// The points where table-based strategies customize staging.
///
/// Every function receives the id table being used and answers from its
/// shape, so one set of hooks serves all entities of a strategy.
#[derive(Clone, Copy)]
pub struct StagingHooks {
    /// `(column, value sql)` pairs selected after the matching ids.
    pub extra_id_select_values: fn(&IdTableMapping) -> Vec<(String, String)>,
    /// Parameters of the extra select values; bound before the restriction's.
    pub prepended_id_selection_params: fn(&IdTableMapping) -> Vec<ParameterSpec>,
    /// Predicate restricting reads of the id table to this operation's rows.
    pub id_table_predicate: fn(&IdTableMapping) -> Option<String>,
    /// Parameters of that predicate; bound after a mutation's own parameters.
    pub appended_mutation_params: fn(&IdTableMapping) -> Vec<ParameterSpec>,
    pub before_use: BeforeUseAction,
    pub after_use: AfterUseAction,
}

impl StagingHooks {
    /// Hooks for tables whose rows only this connection sees.
    pub fn private(before_use: BeforeUseAction, after_use: AfterUseAction) -> Self {
        Self {
            extra_id_select_values: |_| Vec::new(),
            prepended_id_selection_params: |_| Vec::new(),
            id_table_predicate: |_| None,
            appended_mutation_params: |_| Vec::new(),
            before_use,
            after_use,
        }
    }

    /// Hooks for a table shared by every session: rows are tagged with the
    /// session uid on the way in, filtered by it on the way out, and always
    /// deleted after use.
    pub fn session_scoped() -> Self {
        Self {
            extra_id_select_values: session_select_value,
            prepended_id_selection_params: session_parameter,
            id_table_predicate: IdTableMapping::session_predicate,
            appended_mutation_params: session_parameter,
            before_use: BeforeUseAction::None,
            after_use: AfterUseAction::Clean,
        }
    }
}

impl fmt::Debug for StagingHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingHooks")
            .field("before_use", &self.before_use)
            .field("after_use", &self.after_use)
            .finish_non_exhaustive()
    }
}

fn session_select_value(table: &IdTableMapping) -> Vec<(String, String)> {
    table
        .session_column()
        .map(|c| vec![(c.name.clone(), "?".to_string())])
        .unwrap_or_default()
}

fn session_parameter(table: &IdTableMapping) -> Vec<ParameterSpec> {
    if table.is_session_scoped() {
        vec![ParameterSpec::SessionUid]
    } else {
        Vec::new()
    }
}

/// Statement run after an operation on `table`, if any.
pub(crate) fn release_statement(
    table: &IdTableMapping,
    action: AfterUseAction,
    dialect: &dyn Dialect,
) -> Option<RenderedSql> {
    match action {
        AfterUseAction::None => None,
        AfterUseAction::Clean => Some(IdTableDdl::delete_rows_sql(table)),
        AfterUseAction::Drop => Some(RenderedSql::plain(IdTableDdl::drop_sql(table, dialect))),
    }
}

/// Statement run before an operation on `table`, if any.
pub(crate) fn before_use_statement(
    table: &IdTableMapping,
    action: BeforeUseAction,
    dialect: &dyn Dialect,
) -> Option<RenderedSql> {
    match action {
        BeforeUseAction::None => None,
        BeforeUseAction::Create => Some(RenderedSql::plain(IdTableDdl::create_sql(table, dialect))),
    }
}

/// A bulk id strategy with its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkIdStrategy {
    /// Id tables created once; the database keeps rows private per session.
    GlobalTemporary(TableStrategyOptions),
    /// Ordinary id tables shared by all sessions, rows tagged by session uid.
    Persistent(TableStrategyOptions),
    /// Id tables created per use on the operation's connection.
    LocalTemporary(TableStrategyOptions),
    /// One statement with data-modifying CTEs.
    CteBased,
    /// Matching ids read into memory and inlined into `in` lists.
    Inline,
}

impl BulkIdStrategy {
    /// The strategy of a kind with default settings.
    pub fn from_kind(kind: StrategyKind, options: TableStrategyOptions) -> Self {
        match kind {
            StrategyKind::GlobalTemporary => BulkIdStrategy::GlobalTemporary(options),
            StrategyKind::Persistent => BulkIdStrategy::Persistent(options),
            StrategyKind::LocalTemporary => BulkIdStrategy::LocalTemporary(options),
            StrategyKind::Cte => BulkIdStrategy::CteBased,
            StrategyKind::Inline => BulkIdStrategy::Inline,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            BulkIdStrategy::GlobalTemporary(_) => StrategyKind::GlobalTemporary,
            BulkIdStrategy::Persistent(_) => StrategyKind::Persistent,
            BulkIdStrategy::LocalTemporary(_) => StrategyKind::LocalTemporary,
            BulkIdStrategy::CteBased => StrategyKind::Cte,
            BulkIdStrategy::Inline => StrategyKind::Inline,
        }
    }

    pub fn options(&self) -> Option<&TableStrategyOptions> {
        match self {
            BulkIdStrategy::GlobalTemporary(o)
            | BulkIdStrategy::Persistent(o)
            | BulkIdStrategy::LocalTemporary(o) => Some(o),
            BulkIdStrategy::CteBased | BulkIdStrategy::Inline => None,
        }
    }

    pub fn temporary_table_kind(&self) -> Option<TemporaryTableKind> {
        self.kind().temporary_table_kind()
    }

    /// Can this strategy run on the dialect?
    pub fn validate(&self, dialect: &dyn Dialect) -> Result<()> {
        if let Some(kind) = self.temporary_table_kind() {
            if !dialect.supports_temporary_table(kind) {
                return Err(Error::config(format!(
                    "strategy '{}' needs {:?} id tables, which {} does not support",
                    self.kind(),
                    kind,
                    dialect.name()
                )));
            }
        }
        if matches!(self, BulkIdStrategy::CteBased) && !dialect.supports_data_modifying_cte() {
            return Err(Error::config(format!(
                "strategy 'cte' needs data-modifying CTEs, which {} does not support",
                dialect.name()
            )));
        }
        Ok(())
    }

    /// Staging hooks of the table-based strategies.
    pub fn hooks(&self) -> StagingHooks {
        match self {
            BulkIdStrategy::GlobalTemporary(o) => StagingHooks::private(
                BeforeUseAction::None,
                if o.clean_rows {
                    AfterUseAction::Clean
                } else {
                    AfterUseAction::None
                },
            ),
            BulkIdStrategy::Persistent(_) => StagingHooks::session_scoped(),
            BulkIdStrategy::LocalTemporary(o) => StagingHooks::private(
                BeforeUseAction::Create,
                if o.drop_tables {
                    AfterUseAction::Drop
                } else {
                    AfterUseAction::Clean
                },
            ),
            BulkIdStrategy::CteBased | BulkIdStrategy::Inline => {
                StagingHooks::private(BeforeUseAction::None, AfterUseAction::None)
            }
        }
    }

    fn table_options(&self) -> Option<IdTableOptions> {
        let kind = self.temporary_table_kind()?;
        let options = self.options()?;
        Some(
            IdTableOptions::new(kind)
                .catalog(options.catalog.clone())
                .schema(options.schema.clone()),
        )
    }

    /// The id table of an entity under this strategy, if it stages into one.
    pub fn id_table(&self, target: &MutationTarget) -> Option<IdTableMapping> {
        if !needs_id_table(target) {
            return None;
        }
        self.table_options()
            .map(|options| generate_id_table_definition(target, options))
    }

    /// The entity-shaped staging table used by bulk INSERT.
    pub fn staging_table(&self, target: &MutationTarget) -> Option<IdTableMapping> {
        if !needs_id_table(target) {
            return None;
        }
        self.table_options()
            .map(|options| generate_staging_table_definition(target, options))
    }

    /// Tables created at boot and dropped at shutdown belong to the
    /// strategies whose tables outlive a single connection.
    fn manages_boot_tables(&self) -> bool {
        matches!(
            self,
            BulkIdStrategy::GlobalTemporary(_) | BulkIdStrategy::Persistent(_)
        )
    }

    /// Boot-time hook: create the id tables when configured to.
    #[tracing::instrument(level = "debug", skip(self, cx, provider, tables, dialect), fields(strategy = %self.kind()))]
    pub async fn prepare<P: ConnectionProvider>(
        &self,
        cx: &Cx,
        provider: &P,
        tables: &[IdTableMapping],
        dialect: &dyn Dialect,
    ) -> Outcome<DdlReport, Error> {
        match self.options() {
            Some(options) if self.manages_boot_tables() && options.create_tables => {
                export_table_definitions(cx, provider, tables, dialect).await
            }
            _ => Outcome::Ok(DdlReport::default()),
        }
    }

    /// Shutdown hook: drop the id tables when configured to.
    #[tracing::instrument(level = "debug", skip(self, cx, provider, tables, dialect), fields(strategy = %self.kind()))]
    pub async fn release<P: ConnectionProvider>(
        &self,
        cx: &Cx,
        provider: &P,
        tables: &[IdTableMapping],
        dialect: &dyn Dialect,
    ) -> Outcome<DdlReport, Error> {
        match self.options() {
            Some(options) if self.manages_boot_tables() && options.drop_tables => {
                cleanup_table_definitions(cx, provider, tables, dialect).await
            }
            _ => Outcome::Ok(DdlReport::default()),
        }
    }

    pub fn build_update_handler(
        &self,
        target: &Arc<MutationTarget>,
        dialect: &Arc<dyn Dialect>,
        statement: &BulkUpdate,
        use_sql_comments: bool,
    ) -> Result<BulkHandler> {
        let target = Arc::clone(target);
        let dialect = Arc::clone(dialect);
        if !needs_id_table(&target) {
            return DirectHandler::update(target, dialect, statement, use_sql_comments)
                .map(BulkHandler::Direct);
        }
        match (self, self.id_table(&target)) {
            (BulkIdStrategy::CteBased, _) => {
                CteHandler::update(target, dialect, statement, use_sql_comments).map(BulkHandler::Cte)
            }
            (BulkIdStrategy::Inline, _) => {
                InlineHandler::update(target, dialect, statement, use_sql_comments)
                    .map(BulkHandler::Inline)
            }
            (_, Some(id_table)) => TableBasedHandler::update(
                target,
                dialect,
                statement,
                id_table,
                self.hooks(),
                use_sql_comments,
            )
            .map(BulkHandler::TableBased),
            (_, None) => Err(missing_table(self, &target)),
        }
    }

    pub fn build_delete_handler(
        &self,
        target: &Arc<MutationTarget>,
        dialect: &Arc<dyn Dialect>,
        statement: &BulkDelete,
        use_sql_comments: bool,
    ) -> Result<BulkHandler> {
        let target = Arc::clone(target);
        let dialect = Arc::clone(dialect);
        if !needs_id_table(&target) {
            return DirectHandler::delete(target, dialect, statement, use_sql_comments)
                .map(BulkHandler::Direct);
        }
        match (self, self.id_table(&target)) {
            (BulkIdStrategy::CteBased, _) => {
                CteHandler::delete(target, dialect, statement, use_sql_comments).map(BulkHandler::Cte)
            }
            (BulkIdStrategy::Inline, _) => {
                InlineHandler::delete(target, dialect, statement, use_sql_comments)
                    .map(BulkHandler::Inline)
            }
            (_, Some(id_table)) => TableBasedHandler::delete(
                target,
                dialect,
                statement,
                id_table,
                self.hooks(),
                use_sql_comments,
            )
            .map(BulkHandler::TableBased),
            (_, None) => Err(missing_table(self, &target)),
        }
    }

    /// Single-table entities and the inline strategy insert directly; the
    /// others stage full rows first.
    pub fn build_insert_handler(
        &self,
        target: &Arc<MutationTarget>,
        dialect: &Arc<dyn Dialect>,
        statement: &BulkInsert,
        use_sql_comments: bool,
    ) -> Result<BulkHandler> {
        let target = Arc::clone(target);
        let dialect = Arc::clone(dialect);
        if !needs_id_table(&target) || matches!(self, BulkIdStrategy::Inline) {
            return DirectHandler::insert(target, dialect, statement, use_sql_comments)
                .map(BulkHandler::Direct);
        }
        match (self, self.staging_table(&target)) {
            (BulkIdStrategy::CteBased, _) => {
                CteHandler::insert(target, dialect, statement, use_sql_comments).map(BulkHandler::Cte)
            }
            (_, Some(staging)) => TableBasedInsertHandler::new(
                target,
                dialect,
                statement,
                staging,
                self.hooks(),
                use_sql_comments,
            )
            .map(BulkHandler::TableBasedInsert),
            (_, None) => Err(missing_table(self, &target)),
        }
    }
}

fn missing_table(strategy: &BulkIdStrategy, target: &MutationTarget) -> Error {
    Error::config(format!(
        "strategy '{}' has no id table for '{}'",
        strategy.kind(),
        target.entity_name()
    ))
}
