//! Selection of the ids matched by a bulk statement.
//!
//! The user restriction is compiled once against the entity's tables and
//! then used either textually (`insert into ht_x select ... where ...`,
//! `with ids as (select ...)`) or as a [`QuerySpec`] that is executed to
//! read the ids into memory.

use crate::strategy::StagingHooks;
use multitable_core::{Dialect, DiscriminatorValue, MutationTarget};
use multitable_query::{
    Expr, JoinType, LockMode, MutationKind, ParameterSpec, ProcessedWhereClause, QuerySpec,
    RenderContext, RenderedSql, SelectItem, TableGroup, TableJoin,
};
use multitable_schema::{IdTableMapping, auxiliary_columns};

/// The restriction as SQL text: FROM fragment (root table plus joins) and
/// WHERE fragment (implicit predicates ahead of the user's), with the
/// parameters of the WHERE fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingIdRestriction {
    pub from_fragment: String,
    pub where_fragment: String,
    pub parameters: Vec<ParameterSpec>,
}

/// Compiles restrictions of bulk statements against one entity.
#[derive(Debug)]
pub struct MatchingIdSelector<'a> {
    target: &'a MutationTarget,
    dialect: &'a dyn Dialect,
    alias: String,
}

impl<'a> MatchingIdSelector<'a> {
    pub fn new(target: &'a MutationTarget, dialect: &'a dyn Dialect, alias: impl Into<String>) -> Self {
        Self {
            target,
            dialect,
            alias: alias.into(),
        }
    }

    pub fn target(&self) -> &MutationTarget {
        self.target
    }

    /// Alias of the table at a constraint-order position.
    pub fn table_alias(&self, position: usize) -> String {
        if position == 0 {
            self.alias.clone()
        } else {
            format!("{}_{}", self.alias, position)
        }
    }

    fn column_alias(&self, column: &str) -> Option<String> {
        self.target
            .table_for_column(column)
            .map(|t| self.table_alias(t.position()))
    }

    /// Compile the user restriction with columns qualified by table alias.
    /// No restriction yields [`ProcessedWhereClause::NO_WHERE_CLAUSE`].
    pub fn compile_restriction(&self, predicate: Option<&Expr>) -> ProcessedWhereClause {
        let qualifier = |column: &str| self.column_alias(column);
        ProcessedWhereClause::compile(predicate, RenderContext::qualified(&qualifier))
    }

    /// Root table joined to every other table of the entity. Optional
    /// tables are outer joined since their row may not exist.
    pub fn table_group(&self) -> TableGroup {
        let root = self.target.root_table();
        let mut group = TableGroup::new(root.name(), self.table_alias(0));
        for table in &self.target.tables()[1..] {
            let alias = self.table_alias(table.position());
            let predicate = self
                .target
                .identifier_columns()
                .iter()
                .zip(table.key_columns())
                .map(|(id, key)| format!("{}.{} = {alias}.{key}", self.alias, id.name))
                .collect::<Vec<_>>()
                .join(" and ");
            let join_type = if table.is_optional() {
                JoinType::LeftOuter
            } else {
                JoinType::Inner
            };
            group = group.join(TableJoin {
                join_type,
                table: table.name().to_string(),
                alias,
                predicate,
            });
        }
        group
    }

    /// Discriminator and entity-level restrictions that every selection of
    /// this entity carries. `{alias}` in a base restriction is replaced by
    /// the root alias.
    pub fn implicit_predicates(&self) -> Vec<String> {
        let mut predicates = Vec::new();
        if let Some(discriminator) = self.target.discriminator() {
            let column = format!("{}.{}", self.alias, discriminator.column);
            predicates.push(match &discriminator.value {
                DiscriminatorValue::Literal(value) => {
                    format!("{column} = '{}'", value.replace('\'', "''"))
                }
                DiscriminatorValue::Null => format!("{column} is null"),
                DiscriminatorValue::NotNull => format!("{column} is not null"),
            });
        }
        if let Some(restriction) = self.target.base_restriction() {
            predicates.push(restriction.replace("{alias}", &self.alias));
        }
        predicates
    }

    pub fn restriction_fragment(&self, where_clause: &ProcessedWhereClause) -> MatchingIdRestriction {
        MatchingIdRestriction {
            from_fragment: self.table_group().to_sql(),
            where_fragment: join_predicates(&self.implicit_predicates(), where_clause.fragment()),
            parameters: where_clause.parameters().to_vec(),
        }
    }

    /// Columns to select: the identifier, plus for DELETE the owner columns
    /// collection tables reference.
    pub fn selections(&self, kind: MutationKind) -> Vec<SelectItem> {
        let mut items: Vec<SelectItem> = self
            .target
            .identifier_columns()
            .iter()
            .map(|c| SelectItem::new(self.table_alias(0), &c.name))
            .collect();
        if kind == MutationKind::Delete {
            for column in auxiliary_columns(self.target) {
                let alias = self
                    .column_alias(&column.name)
                    .unwrap_or_else(|| self.table_alias(0));
                items.push(SelectItem::new(alias, &column.name));
            }
        }
        items
    }

    /// The matching-id query. Rows are write locked unless the query
    /// needs an outer join the dialect cannot lock.
    pub fn select_spec(&self, where_clause: &ProcessedWhereClause, kind: MutationKind) -> QuerySpec {
        let restriction = self.restriction_fragment(where_clause);
        let mut spec = QuerySpec {
            selections: self.selections(kind),
            from: self.table_group(),
            predicate: restriction.where_fragment,
            parameters: restriction.parameters,
            lock_mode: LockMode::Write,
        };
        if spec.has_outer_join() && !self.dialect.supports_outer_join_for_update() {
            tracing::debug!(
                entity = self.target.entity_name(),
                dialect = self.dialect.name(),
                "outer join cannot be combined with row locking, selecting ids without lock"
            );
            spec.lock_mode = LockMode::None;
        }
        spec
    }

    /// `insert into <id table> (<columns>) select <ids> from ... where ...`
    ///
    /// Strategy values (the session uid) are selected after the ids, so
    /// their parameters precede the restriction's.
    pub fn id_selection(
        &self,
        where_clause: &ProcessedWhereClause,
        kind: MutationKind,
        id_table: &IdTableMapping,
        hooks: &StagingHooks,
    ) -> RenderedSql {
        let spec = self.select_spec(where_clause, kind);
        let staged: Vec<String> = spec.selections.iter().map(|s| s.column.clone()).collect();
        let extras = (hooks.extra_id_select_values)(id_table);

        let mut columns = staged;
        let mut values = vec![spec.select_list()];
        for (column, value) in extras {
            columns.push(column);
            values.push(value);
        }

        let sql = format!(
            "insert into {} ({}) select {} {}",
            id_table.qualified_name(),
            columns.join(", "),
            values.join(", "),
            spec.from_and_where()
        );
        let mut parameters = (hooks.prepended_id_selection_params)(id_table);
        parameters.extend(spec.parameters);
        RenderedSql::new(sql, parameters)
    }
}

/// Remove a leading `where` keyword from a fragment.
pub fn strip_where(fragment: &str) -> &str {
    let trimmed = fragment.trim_start();
    match trimmed.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("where") => {
            let rest = &trimmed[5..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with('(') {
                rest.trim_start()
            } else {
                trimmed
            }
        }
        _ => trimmed,
    }
}

fn trim_leading_operator(fragment: &str) -> &str {
    let trimmed = fragment.trim();
    for op in ["and ", "or "] {
        if let Some(head) = trimmed.get(..op.len()) {
            if head.eq_ignore_ascii_case(op) {
                return trimmed[op.len()..].trim_start();
            }
        }
    }
    trimmed
}

/// Conjoin implicit predicates with the user's fragment. The user fragment
/// is parenthesized when it follows other predicates so its own `or`s
/// cannot escape.
pub fn join_predicates(implicit: &[String], user_fragment: &str) -> String {
    let mut parts: Vec<String> = implicit
        .iter()
        .map(|p| trim_leading_operator(strip_where(p)).to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let user = trim_leading_operator(strip_where(user_fragment));
    if !user.is_empty() {
        if parts.is_empty() {
            parts.push(user.to_string());
        } else {
            parts.push(format!("({user})"));
        }
    }
    parts.join(" and ")
}

/// `(<keys>) in (select <columns> <source>)`, with a bare key for a
/// single column.
pub fn key_in_subquery(key_columns: &[String], columns: &[&str], source: &str) -> String {
    let keys = if key_columns.len() == 1 {
        key_columns[0].clone()
    } else {
        format!("({})", key_columns.join(", "))
    };
    format!("{keys} in (select {} {source})", columns.join(", "))
}

/// `(<keys>) in (select <columns> from <id table> [where session_id = ?])`
/// restricting a table to the staged rows, with its parameters.
pub fn id_table_restriction(
    key_columns: &[String],
    id_table: &IdTableMapping,
    staged_columns: &[&str],
    hooks: &StagingHooks,
) -> (String, Vec<ParameterSpec>) {
    let mut source = format!("from {}", id_table.qualified_name());
    if let Some(predicate) = (hooks.id_table_predicate)(id_table) {
        source.push_str(" where ");
        source.push_str(&predicate);
    }
    (
        key_in_subquery(key_columns, staged_columns, &source),
        (hooks.appended_mutation_params)(id_table),
    )
}
