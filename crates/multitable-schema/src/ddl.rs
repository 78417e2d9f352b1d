//! DDL and row cleanup statements for id tables.

use crate::id_table::IdTableMapping;
use multitable_core::Dialect;
use multitable_query::{ParameterSpec, RenderedSql};

/// Renders the statements that manage one id table.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdTableDdl;

impl IdTableDdl {
    /// `create ... table <name> (<columns> [, primary key (...)]) [options]`
    pub fn create_sql(table: &IdTableMapping, dialect: &dyn Dialect) -> String {
        let mut parts: Vec<String> = table
            .all_columns()
            .map(|c| {
                let mut def = format!("{} {}", c.name, dialect.type_name(&c.sql_type));
                if !c.nullable {
                    def.push_str(" not null");
                }
                def
            })
            .collect();
        if !table.primary_key().is_empty() {
            parts.push(format!("primary key ({})", table.primary_key().join(", ")));
        }
        let mut sql = format!(
            "{} {} ({})",
            dialect.create_table_command(table.kind()),
            table.qualified_name(),
            parts.join(", ")
        );
        if let Some(options) = dialect.create_table_options(table.kind()) {
            sql.push(' ');
            sql.push_str(options);
        }
        tracing::trace!(sql = %sql, dialect = dialect.name(), "generated id table DDL");
        sql
    }

    pub fn drop_sql(table: &IdTableMapping, dialect: &dyn Dialect) -> String {
        format!(
            "{} {}",
            dialect.drop_table_command(table.kind()),
            table.qualified_name()
        )
    }

    /// Delete the rows staged by one operation. Session-scoped tables only
    /// lose the rows of the bound session.
    pub fn delete_rows_sql(table: &IdTableMapping) -> RenderedSql {
        match table.session_predicate() {
            Some(predicate) => RenderedSql::new(
                format!("delete from {} where {predicate}", table.qualified_name()),
                vec![ParameterSpec::SessionUid],
            ),
            None => RenderedSql::plain(format!("delete from {}", table.qualified_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_table::{IdTableOptions, generate_id_table_definition};
    use multitable_core::{
        ColumnMapping, InheritanceType, MutationTarget, SqlType, StandardDialect, TableMapping,
        TemporaryTableKind,
    };

    fn target() -> MutationTarget {
        MutationTarget::builder("Invoice")
            .inheritance(InheritanceType::Joined)
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("invoice", ["id"]))
            .table(TableMapping::new("invoice_detail", ["invoice_id"]))
            .build()
            .expect("valid mapping")
    }

    fn table(kind: TemporaryTableKind) -> IdTableMapping {
        generate_id_table_definition(&target(), IdTableOptions::new(kind))
    }

    #[test]
    fn global_temporary_create() {
        let sql = IdTableDdl::create_sql(&table(TemporaryTableKind::Global), &StandardDialect::Oracle);
        assert_eq!(
            sql,
            "create global temporary table ht_invoice (id number(19,0) not null) on commit delete rows"
        );
    }

    #[test]
    fn persistent_create_declares_session_key() {
        let sql = IdTableDdl::create_sql(
            &table(TemporaryTableKind::Persistent),
            &StandardDialect::Generic,
        );
        assert_eq!(
            sql,
            "create table ht_invoice (id bigint not null, session_id char(36) not null, primary key (id, session_id))"
        );
    }

    #[test]
    fn local_temporary_create_and_drop() {
        let local = table(TemporaryTableKind::Local);
        assert_eq!(
            IdTableDdl::create_sql(&local, &StandardDialect::Mysql),
            "create temporary table if not exists ht_invoice (id bigint not null)"
        );
        assert_eq!(
            IdTableDdl::drop_sql(&local, &StandardDialect::Mysql),
            "drop temporary table ht_invoice"
        );
        assert_eq!(
            IdTableDdl::create_sql(&local, &StandardDialect::H2),
            "create local temporary table ht_invoice (id bigint not null)"
        );
    }

    #[test]
    fn delete_rows_is_session_scoped_when_shared() {
        let shared = IdTableDdl::delete_rows_sql(&table(TemporaryTableKind::Persistent));
        assert_eq!(shared.sql, "delete from ht_invoice where session_id = ?");
        assert_eq!(shared.parameters, vec![ParameterSpec::SessionUid]);

        let private = IdTableDdl::delete_rows_sql(&table(TemporaryTableKind::Global));
        assert_eq!(private.sql, "delete from ht_invoice");
        assert!(private.parameters.is_empty());
    }
}
