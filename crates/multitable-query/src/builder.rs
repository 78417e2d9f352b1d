//! Builders that accumulate column bindings for one physical table and
//! produce an immutable [`TableMutation`].
//!
//! The same builder serves row-level persistence (values bound from the
//! entity row) and bulk mutations (values are compiled assignment
//! fragments, rows restricted by an id-table subquery).

use crate::binding::{ColumnReference, ColumnValueBinding, Restriction};
use crate::mutation::{Expectation, MergeMutation, MutationKind, MutationStatement, TableMutation};
use crate::parameter::ParameterSpec;
use multitable_core::{ColumnMapping, Dialect, Result, SqlType, TableMapping};
use std::sync::Arc;

/// Accumulates bindings for a single-table INSERT, UPDATE, DELETE or MERGE.
#[derive(Debug, Clone)]
pub struct TableMutationBuilder {
    kind: MutationKind,
    table: Arc<TableMapping>,
    values: Vec<ColumnValueBinding>,
    keys: Vec<Restriction>,
    locks: Vec<Restriction>,
    where_fragments: Vec<Restriction>,
    comment: Option<String>,
    expectation: Option<Expectation>,
    generated_only: bool,
}

impl TableMutationBuilder {
    fn new(kind: MutationKind, table: Arc<TableMapping>) -> Self {
        Self {
            kind,
            table,
            values: Vec::new(),
            keys: Vec::new(),
            locks: Vec::new(),
            where_fragments: Vec::new(),
            comment: None,
            expectation: None,
            generated_only: false,
        }
    }

    pub fn insert(table: Arc<TableMapping>) -> Self {
        Self::new(MutationKind::Insert, table)
    }

    pub fn update(table: Arc<TableMapping>) -> Self {
        Self::new(MutationKind::Update, table)
    }

    pub fn delete(table: Arc<TableMapping>) -> Self {
        Self::new(MutationKind::Delete, table)
    }

    pub fn merge(table: Arc<TableMapping>) -> Self {
        Self::new(MutationKind::Merge, table)
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn table(&self) -> &Arc<TableMapping> {
        &self.table
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    fn column_ref(&self, name: &str, sql_type: SqlType) -> ColumnReference {
        ColumnReference::new(self.table.name(), name, sql_type)
    }

    /// Bind `column = ?` with the column's new value.
    pub fn add_value_column(&mut self, column: &ColumnMapping) {
        let binding = ColumnValueBinding::parameter(
            self.column_ref(&column.name, column.sql_type.clone()),
            ParameterSpec::set(&column.name),
        );
        self.values.push(binding);
    }

    /// Like [`add_value_column`](Self::add_value_column) but skips formula
    /// columns and columns not writable by this kind of mutation.
    pub fn add_value_column_leniently(&mut self, column: &ColumnMapping) -> bool {
        let writable = match self.kind {
            MutationKind::Insert => column.insertable,
            MutationKind::Update | MutationKind::Merge => column.updatable,
            MutationKind::Delete => false,
        };
        if column.formula || !writable {
            return false;
        }
        self.add_value_column(column);
        true
    }

    /// Bind a value column to a single explicit parameter.
    pub fn add_value_column_bound(&mut self, name: &str, sql_type: SqlType, spec: ParameterSpec) {
        let binding = ColumnValueBinding::parameter(self.column_ref(name, sql_type), spec);
        self.values.push(binding);
    }

    /// Bind a value column to an SQL fragment (literal, expression or custom
    /// write expression). Markers inside quoted literals are not parameters.
    pub fn add_value_fragment(
        &mut self,
        name: &str,
        sql_type: SqlType,
        fragment: &str,
        parameters: Vec<ParameterSpec>,
    ) -> Result<()> {
        let binding =
            ColumnValueBinding::from_fragment(self.column_ref(name, sql_type), fragment, parameters)?;
        self.values.push(binding);
        Ok(())
    }

    /// Restrict on `column = ?` using the row's identifying value.
    pub fn add_key_restriction(&mut self, column: &ColumnMapping) {
        self.add_key_restriction_bound(
            &column.name,
            column.sql_type.clone(),
            ParameterSpec::restrict(&column.name),
        );
    }

    /// Restrict a key column with an explicit parameter (e.g. a secondary
    /// table's key bound from the identifier value).
    pub fn add_key_restriction_bound(&mut self, name: &str, sql_type: SqlType, spec: ParameterSpec) {
        let binding = ColumnValueBinding::parameter(self.column_ref(name, sql_type), spec);
        self.keys.push(Restriction::Equal(binding));
    }

    /// Key restriction that skips formula columns.
    pub fn add_key_restriction_leniently(&mut self, column: &ColumnMapping) -> bool {
        if column.formula {
            return false;
        }
        self.add_key_restriction(column);
        true
    }

    /// Restriction that skips nullable columns, since `column = null`
    /// never matches.
    pub fn add_restriction_leniently(&mut self, column: &ColumnMapping) -> bool {
        if column.formula || column.nullable {
            return false;
        }
        self.add_key_restriction(column);
        true
    }

    /// Restrict on the column's previous value to detect concurrent changes.
    pub fn add_optimistic_lock_restriction(&mut self, column: &ColumnMapping) {
        let binding = ColumnValueBinding::parameter(
            self.column_ref(&column.name, column.sql_type.clone()),
            ParameterSpec::restrict(&column.name),
        );
        self.locks.push(Restriction::Equal(binding));
    }

    /// Optimistic-lock restriction for a column whose previous value was null.
    pub fn add_null_optimistic_lock_restriction(&mut self, column: &ColumnMapping) {
        let reference = self.column_ref(&column.name, column.sql_type.clone());
        self.locks.push(Restriction::IsNull(reference));
    }

    /// Append a free WHERE predicate with its own parameters.
    pub fn add_where_fragment(&mut self, sql: impl Into<String>, parameters: Vec<ParameterSpec>) {
        self.where_fragments.push(Restriction::Fragment {
            sql: sql.into(),
            parameters,
        });
    }

    pub fn set_sql_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    pub fn set_expectation(&mut self, expectation: Expectation) {
        self.expectation = Some(expectation);
    }

    /// Always render the generated statement: no merge for optional tables
    /// and no custom SQL, whose parameters are row values.
    pub fn set_generated_only(&mut self) {
        self.generated_only = true;
    }

    /// Resolve to exactly one mutation descriptor.
    pub fn build_mutation(self, dialect: &dyn Dialect) -> TableMutation {
        let values = order_values(self.values.clone(), dialect);
        match self.kind {
            MutationKind::Insert | MutationKind::Update | MutationKind::Merge
                if values.is_empty() =>
            {
                TableMutation::NoSet {
                    kind: self.kind,
                    table: self.table,
                }
            }
            MutationKind::Update | MutationKind::Merge
                if !self.generated_only
                    && self.table.is_optional()
                    && self.table.update_details().custom_sql.is_none() =>
            {
                TableMutation::Merge(Box::new(self.build_merge(values)))
            }
            kind => {
                let details = match kind {
                    MutationKind::Insert => self.table.insert_details(),
                    MutationKind::Delete => self.table.delete_details(),
                    MutationKind::Update | MutationKind::Merge => self.table.update_details(),
                };
                let custom_sql = if self.generated_only {
                    None
                } else {
                    details.custom_sql.clone()
                };
                let expectation = self
                    .expectation
                    .unwrap_or_else(|| Expectation::from(details.expectation));
                let restrictions = self.restrictions();
                let statement = match kind {
                    MutationKind::Insert => self.render_insert(values, Vec::new(), expectation),
                    MutationKind::Delete => self.render_delete(restrictions, expectation),
                    MutationKind::Update | MutationKind::Merge => {
                        self.render_update(values, restrictions, expectation)
                    }
                };
                match custom_sql {
                    Some(sql) => TableMutation::Custom {
                        kind,
                        statement: MutationStatement {
                            sql: sql.clone(),
                            custom_sql: Some(sql),
                            ..statement
                        },
                    },
                    None => match kind {
                        MutationKind::Insert => TableMutation::Insert(statement),
                        MutationKind::Delete => TableMutation::Delete(statement),
                        MutationKind::Update | MutationKind::Merge => {
                            TableMutation::Update(statement)
                        }
                    },
                }
            }
        }
    }

    fn restrictions(&self) -> Vec<Restriction> {
        self.keys
            .iter()
            .chain(&self.locks)
            .chain(&self.where_fragments)
            .cloned()
            .collect()
    }

    fn comment_prefix(&self) -> String {
        match &self.comment {
            Some(c) => format!("/* {} */ ", c.replace("*/", "")),
            None => String::new(),
        }
    }

    fn render_update(
        &self,
        values: Vec<ColumnValueBinding>,
        restrictions: Vec<Restriction>,
        expectation: Expectation,
    ) -> MutationStatement {
        let mut sql = format!("{}update {} set ", self.comment_prefix(), self.table.name());
        let assignments: Vec<String> = values.iter().map(ColumnValueBinding::assignment_sql).collect();
        sql.push_str(&assignments.join(", "));
        push_where(&mut sql, &restrictions);
        let parameters = collect_parameters(&values, &restrictions);
        MutationStatement {
            table: Arc::clone(&self.table),
            values,
            restrictions,
            custom_sql: None,
            sql,
            parameters,
            expectation,
        }
    }

    fn render_delete(&self, restrictions: Vec<Restriction>, expectation: Expectation) -> MutationStatement {
        let mut sql = format!("{}delete from {}", self.comment_prefix(), self.table.name());
        push_where(&mut sql, &restrictions);
        let parameters = collect_parameters(&[], &restrictions);
        MutationStatement {
            table: Arc::clone(&self.table),
            values: Vec::new(),
            restrictions,
            custom_sql: None,
            sql,
            parameters,
            expectation,
        }
    }

    /// `leading` bindings (keys of a merge insert) precede the values.
    fn render_insert(
        &self,
        values: Vec<ColumnValueBinding>,
        leading: Vec<ColumnValueBinding>,
        expectation: Expectation,
    ) -> MutationStatement {
        let all: Vec<ColumnValueBinding> = leading.into_iter().chain(values).collect();
        let columns: Vec<&str> = all.iter().map(ColumnValueBinding::column_name).collect();
        let fragments: Vec<&str> = all.iter().map(|b| b.write_fragment().sql()).collect();
        let sql = format!(
            "{}insert into {} ({}) values ({})",
            self.comment_prefix(),
            self.table.name(),
            columns.join(", "),
            fragments.join(", ")
        );
        let parameters = collect_parameters(&all, &[]);
        MutationStatement {
            table: Arc::clone(&self.table),
            values: all,
            restrictions: Vec::new(),
            custom_sql: None,
            sql,
            parameters,
            expectation,
        }
    }

    fn build_merge(&self, values: Vec<ColumnValueBinding>) -> MergeMutation {
        let key_bindings: Vec<ColumnValueBinding> = self
            .keys
            .iter()
            .filter_map(|r| match r {
                Restriction::Equal(binding) => Some(binding.clone()),
                Restriction::IsNull(_) | Restriction::Fragment { .. } => None,
            })
            .collect();
        let update = self.render_update(values.clone(), self.restrictions(), Expectation::None);
        let insert = self.render_insert(values, key_bindings, Expectation::None);
        let delete = self.render_delete(self.keys.clone(), Expectation::None);
        MergeMutation {
            update,
            insert,
            delete,
        }
    }
}

fn order_values(values: Vec<ColumnValueBinding>, dialect: &dyn Dialect) -> Vec<ColumnValueBinding> {
    if !dialect.forces_lob_bindings_last() {
        return values;
    }
    let (lobs, mut regular): (Vec<_>, Vec<_>) = values.into_iter().partition(|v| v.is_lob());
    regular.extend(lobs);
    regular
}

fn push_where(sql: &mut String, restrictions: &[Restriction]) {
    if restrictions.is_empty() {
        return;
    }
    let predicates: Vec<String> = restrictions.iter().map(Restriction::sql).collect();
    sql.push_str(" where ");
    sql.push_str(&predicates.join(" and "));
}

fn collect_parameters(values: &[ColumnValueBinding], restrictions: &[Restriction]) -> Vec<ParameterSpec> {
    values
        .iter()
        .flat_map(|v| v.parameters().iter().cloned())
        .chain(restrictions.iter().flat_map(|r| r.parameters().iter().cloned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use multitable_core::StandardDialect;

    fn invoice() -> Arc<TableMapping> {
        Arc::new(
            TableMapping::new("invoice", ["id"])
                .column(ColumnMapping::new("status", SqlType::VarChar(20)))
                .column(ColumnMapping::new("body", SqlType::Clob))
                .column(ColumnMapping::new("amount", SqlType::BigInt)),
        )
    }

    fn id() -> ColumnMapping {
        ColumnMapping::new("id", SqlType::BigInt).not_null()
    }

    fn col(table: &TableMapping, name: &str) -> ColumnMapping {
        table.value_column(name).cloned().expect("mapped column")
    }

    #[test]
    fn update_renders_values_then_restrictions() {
        let table = invoice();
        let mut builder = TableMutationBuilder::update(Arc::clone(&table));
        builder.add_value_column(&col(&table, "status"));
        builder.add_key_restriction(&id());
        builder.add_optimistic_lock_restriction(&col(&table, "amount"));
        let mutation = builder.build_mutation(&StandardDialect::Generic);
        assert_eq!(
            mutation.sql(),
            Some("update invoice set status = ? where id = ? and amount = ?")
        );
        assert_eq!(
            mutation.parameters(),
            &[
                ParameterSpec::set("status"),
                ParameterSpec::restrict("id"),
                ParameterSpec::restrict("amount"),
            ]
        );
        assert!(matches!(mutation, TableMutation::Update(_)));
    }

    #[test]
    fn update_without_values_is_no_set() {
        let mut builder = TableMutationBuilder::update(invoice());
        builder.add_key_restriction(&id());
        let mutation = builder.build_mutation(&StandardDialect::Generic);
        assert!(mutation.is_no_op());
        assert!(mutation.sql().is_none());
    }

    #[test]
    fn lob_values_bound_last_when_required() {
        let table = invoice();
        let mut builder = TableMutationBuilder::update(Arc::clone(&table));
        builder.add_value_column(&col(&table, "body"));
        builder.add_value_column(&col(&table, "status"));
        builder.add_key_restriction(&id());
        let oracle = builder.clone().build_mutation(&StandardDialect::Oracle);
        assert_eq!(
            oracle.sql(),
            Some("update invoice set status = ?, body = ? where id = ?")
        );
        let generic = builder.build_mutation(&StandardDialect::Generic);
        assert_eq!(
            generic.sql(),
            Some("update invoice set body = ?, status = ? where id = ?")
        );
    }

    #[test]
    fn null_lock_restriction_uses_is_null() {
        let table = invoice();
        let mut builder = TableMutationBuilder::delete(Arc::clone(&table));
        builder.add_key_restriction(&id());
        builder.add_null_optimistic_lock_restriction(&col(&table, "status"));
        let mutation = builder.build_mutation(&StandardDialect::Generic);
        assert_eq!(
            mutation.sql(),
            Some("delete from invoice where id = ? and status is null")
        );
        assert_eq!(mutation.parameters(), &[ParameterSpec::restrict("id")]);
    }

    #[test]
    fn lenient_variants_skip_unwritable_and_nullable() {
        let table = invoice();
        let mut builder = TableMutationBuilder::update(Arc::clone(&table));
        let computed = ColumnMapping::new("total", SqlType::BigInt).formula();
        let frozen = ColumnMapping::new("created", SqlType::Timestamp).updatable(false);
        assert!(!builder.add_value_column_leniently(&computed));
        assert!(!builder.add_value_column_leniently(&frozen));
        assert!(builder.add_value_column_leniently(&col(&table, "status")));
        assert!(!builder.add_restriction_leniently(&col(&table, "amount")));
        assert!(builder.add_restriction_leniently(&id()));
        assert!(!builder.add_key_restriction_leniently(&computed));
        let mutation = builder.build_mutation(&StandardDialect::Generic);
        assert_eq!(
            mutation.sql(),
            Some("update invoice set status = ? where id = ?")
        );
    }

    #[test]
    fn insert_lists_columns_in_bind_order() {
        let table = invoice();
        let mut builder = TableMutationBuilder::insert(Arc::clone(&table));
        builder.add_value_column(&id());
        builder.add_value_column(&col(&table, "status"));
        builder.set_sql_comment("insert Invoice");
        let mutation = builder.build_mutation(&StandardDialect::Generic);
        assert_eq!(
            mutation.sql(),
            Some("/* insert Invoice */ insert into invoice (id, status) values (?, ?)")
        );
        assert_eq!(
            mutation.statement().map(MutationStatement::expectation),
            Some(Expectation::RowCount(1))
        );
    }

    #[test]
    fn custom_sql_overrides_generated_text() {
        let table = Arc::new(
            TableMapping::new("invoice", ["id"])
                .column(ColumnMapping::new("status", SqlType::VarChar(20)))
                .custom_update("{call update_invoice(?, ?)}"),
        );
        let mut builder = TableMutationBuilder::update(Arc::clone(&table));
        builder.add_value_column(&col(&table, "status"));
        builder.add_key_restriction(&id());
        match builder.build_mutation(&StandardDialect::Generic) {
            TableMutation::Custom { kind, statement } => {
                assert_eq!(kind, MutationKind::Update);
                assert_eq!(statement.sql(), "{call update_invoice(?, ?)}");
                assert_eq!(
                    statement.parameters(),
                    &[ParameterSpec::set("status"), ParameterSpec::restrict("id")]
                );
            }
            other => std::panic::panic_any(format!("unexpected: {other:?}")),
        }
    }

    #[test]
    fn optional_table_update_becomes_merge() {
        let table = Arc::new(
            TableMapping::new("invoice_note", ["invoice_id"])
                .column(ColumnMapping::new("note", SqlType::VarChar(200)))
                .optional(),
        );
        let mut builder = TableMutationBuilder::update(Arc::clone(&table));
        builder.add_value_column(&col(&table, "note"));
        builder.add_key_restriction_bound("invoice_id", SqlType::BigInt, ParameterSpec::restrict("id"));
        match builder.build_mutation(&StandardDialect::Generic) {
            TableMutation::Merge(merge) => {
                assert_eq!(
                    merge.update.sql(),
                    "update invoice_note set note = ? where invoice_id = ?"
                );
                assert_eq!(
                    merge.insert.sql(),
                    "insert into invoice_note (invoice_id, note) values (?, ?)"
                );
                assert_eq!(
                    merge.insert.parameters(),
                    &[ParameterSpec::restrict("id"), ParameterSpec::set("note")]
                );
                assert_eq!(merge.delete.sql(), "delete from invoice_note where invoice_id = ?");
            }
            other => std::panic::panic_any(format!("unexpected: {other:?}")),
        }
    }

    #[test]
    fn generated_only_ignores_merge_and_custom_sql() {
        let table = Arc::new(
            TableMapping::new("invoice_detail", ["invoice_id"])
                .column(ColumnMapping::new("note", SqlType::Text))
                .optional()
                .custom_delete("delete from invoice_detail where invoice_id = ? and archived = 0"),
        );
        let mut update = TableMutationBuilder::update(Arc::clone(&table));
        update.add_value_column(&col(&table, "note"));
        update.add_where_fragment("invoice_id in (select id from ht_invoice)", Vec::new());
        update.set_generated_only();
        assert_eq!(
            update.build_mutation(&StandardDialect::Generic).sql(),
            Some("update invoice_detail set note = ? where invoice_id in (select id from ht_invoice)")
        );

        let mut delete = TableMutationBuilder::delete(Arc::clone(&table));
        delete.add_where_fragment("invoice_id in (select id from ht_invoice)", Vec::new());
        delete.set_generated_only();
        let mutation = delete.build_mutation(&StandardDialect::Generic);
        assert!(matches!(mutation, TableMutation::Delete(_)));
        assert_eq!(
            mutation.sql(),
            Some("delete from invoice_detail where invoice_id in (select id from ht_invoice)")
        );
    }

    #[test]
    fn value_fragments_follow_quote_rules() {
        let table = invoice();
        let mut builder = TableMutationBuilder::update(Arc::clone(&table));
        builder
            .add_value_fragment("status", SqlType::VarChar(20), "'a?b'", Vec::new())
            .expect("literal");
        builder
            .add_value_fragment(
                "amount",
                SqlType::BigInt,
                "? + 1",
                vec![ParameterSpec::Ordinal(1)],
            )
            .expect("one parameter");
        builder.add_where_fragment("id in (select id from ht_invoice)", Vec::new());
        let mutation = builder.build_mutation(&StandardDialect::Generic);
        assert_eq!(
            mutation.sql(),
            Some("update invoice set status = 'a?b', amount = ? + 1 where id in (select id from ht_invoice)")
        );
        assert_eq!(mutation.parameters(), &[ParameterSpec::Ordinal(1)]);
    }
}
