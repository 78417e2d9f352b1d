//! Physical mapping metadata of mutation targets.
//!
//! A [`MutationTarget`] describes one entity as the set of physical tables
//! that hold its state, in constraint order (root table first). It is built
//! once at boot and is read-only afterwards.

use crate::error::{Error, Result};
use crate::types::SqlType;
use std::sync::Arc;

/// A mapped column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Computed column; never written.
    pub formula: bool,
    pub insertable: bool,
    pub updatable: bool,
}

impl ColumnMapping {
    /// A nullable, writable column.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            formula: false,
            insertable: true,
            updatable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn formula(mut self) -> Self {
        self.formula = true;
        self.insertable = false;
        self.updatable = false;
        self
    }

    pub fn insertable(mut self, insertable: bool) -> Self {
        self.insertable = insertable;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn is_lob(&self) -> bool {
        self.sql_type.is_lob()
    }
}

/// Row-count check applied after a row-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectationKind {
    /// No check.
    None,
    /// Exactly one row must be affected.
    #[default]
    RowCount,
}

/// Per-operation details of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDetails {
    /// User supplied SQL replacing the generated statement.
    pub custom_sql: Option<String>,
    pub expectation: ExpectationKind,
}

/// One physical table of a mutation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    name: String,
    position: usize,
    key_columns: Vec<String>,
    value_columns: Vec<ColumnMapping>,
    optional: bool,
    cascade_delete: bool,
    insert_details: TableDetails,
    update_details: TableDetails,
    delete_details: TableDetails,
}

impl TableMapping {
    pub fn new<I, S>(name: impl Into<String>, key_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            position: 0,
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            value_columns: Vec::new(),
            optional: false,
            cascade_delete: false,
            insert_details: TableDetails::default(),
            update_details: TableDetails::default(),
            delete_details: TableDetails::default(),
        }
    }

    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.value_columns.push(column);
        self
    }

    /// Mark as optional: a row may not exist for every entity.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Rows are removed by an `on delete cascade` foreign key.
    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    pub fn custom_insert(mut self, sql: impl Into<String>) -> Self {
        self.insert_details.custom_sql = Some(sql.into());
        self
    }

    pub fn custom_update(mut self, sql: impl Into<String>) -> Self {
        self.update_details.custom_sql = Some(sql.into());
        self
    }

    pub fn custom_delete(mut self, sql: impl Into<String>) -> Self {
        self.delete_details.custom_sql = Some(sql.into());
        self
    }

    /// Row-count expectation for all three operations.
    pub fn expectation(mut self, expectation: ExpectationKind) -> Self {
        self.insert_details.expectation = expectation;
        self.update_details.expectation = expectation;
        self.delete_details.expectation = expectation;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constraint-order index; 0 is the root table.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_identifier_table(&self) -> bool {
        self.position == 0
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn value_columns(&self) -> &[ColumnMapping] {
        &self.value_columns
    }

    pub fn value_column(&self, name: &str) -> Option<&ColumnMapping> {
        self.value_columns.iter().find(|c| c.name == name)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.value_column(name).is_some() || self.key_columns.iter().any(|k| k == name)
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_cascade_delete(&self) -> bool {
        self.cascade_delete
    }

    pub fn insert_details(&self) -> &TableDetails {
        &self.insert_details
    }

    pub fn update_details(&self) -> &TableDetails {
        &self.update_details
    }

    pub fn delete_details(&self) -> &TableDetails {
        &self.delete_details
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritanceType {
    #[default]
    None,
    SingleTable,
    Joined,
    Union,
}

/// Value a discriminator column must hold for rows of a subclass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscriminatorValue {
    /// SQL literal text, e.g. `'CREDIT'` or `2`.
    Literal(String),
    Null,
    NotNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    pub column: String,
    pub value: DiscriminatorValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Many-to-many link table: rows are deleted.
    JoinTable,
    /// Element collection table: rows are deleted.
    ElementCollection,
    /// One-to-many foreign key on the child table: set to null.
    OneToManyForeignKey,
}

/// A plural attribute whose rows reference the owning entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTable {
    pub role: String,
    pub table: String,
    pub kind: CollectionKind,
    /// Foreign key columns in `table`.
    pub key_columns: Vec<String>,
    /// Owner columns referenced by the key; empty means the identifier.
    pub target_columns: Vec<String>,
}

impl CollectionTable {
    pub fn new<I, S>(
        role: impl Into<String>,
        table: impl Into<String>,
        kind: CollectionKind,
        key_columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            table: table.into(),
            kind,
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            target_columns: Vec::new(),
        }
    }

    /// Reference owner columns other than the identifier (property-ref).
    pub fn referencing<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn references_identifier(&self) -> bool {
        self.target_columns.is_empty()
    }
}

/// An entity as seen by the mutation engine.
#[derive(Debug, Clone)]
pub struct MutationTarget {
    entity_name: String,
    root_entity_name: String,
    inheritance: InheritanceType,
    tables: Vec<Arc<TableMapping>>,
    identifier: Vec<ColumnMapping>,
    discriminator: Option<Discriminator>,
    base_restriction: Option<String>,
    collections: Vec<CollectionTable>,
    version: Option<ColumnMapping>,
    id_table_name: String,
    staging_table_name: String,
}

impl MutationTarget {
    pub fn builder(entity_name: impl Into<String>) -> MutationTargetBuilder {
        MutationTargetBuilder::new(entity_name)
    }

    /// Role path of the entity.
    pub fn role(&self) -> &str {
        &self.entity_name
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn root_entity_name(&self) -> &str {
        &self.root_entity_name
    }

    pub fn inheritance(&self) -> InheritanceType {
        self.inheritance
    }

    /// Tables in constraint order, root first.
    pub fn tables(&self) -> &[Arc<TableMapping>] {
        &self.tables
    }

    pub fn root_table(&self) -> &Arc<TableMapping> {
        &self.tables[0]
    }

    pub fn identifier_columns(&self) -> &[ColumnMapping] {
        &self.identifier
    }

    pub fn identifier_column_names(&self) -> Vec<&str> {
        self.identifier.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn discriminator(&self) -> Option<&Discriminator> {
        self.discriminator.as_ref()
    }

    /// Entity-level restriction applied to every query (soft delete, tenancy).
    pub fn base_restriction(&self) -> Option<&str> {
        self.base_restriction.as_deref()
    }

    pub fn collections(&self) -> &[CollectionTable] {
        &self.collections
    }

    pub fn version(&self) -> Option<&ColumnMapping> {
        self.version.as_ref()
    }

    pub fn id_table_name(&self) -> &str {
        &self.id_table_name
    }

    pub fn staging_table_name(&self) -> &str {
        &self.staging_table_name
    }

    /// Table holding the given column, searching value columns in
    /// constraint order, then the identifier.
    pub fn table_for_column(&self, column: &str) -> Option<&Arc<TableMapping>> {
        self.tables
            .iter()
            .find(|t| t.value_column(column).is_some())
            .or_else(|| {
                self.identifier
                    .iter()
                    .any(|c| c.name == column)
                    .then(|| self.root_table())
            })
    }

    /// Column mapping by name across all tables, identifier and version.
    pub fn column(&self, column: &str) -> Option<&ColumnMapping> {
        self.tables
            .iter()
            .find_map(|t| t.value_column(column))
            .or_else(|| self.identifier.iter().find(|c| c.name == column))
            .or_else(|| self.version.as_ref().filter(|v| v.name == column))
    }

    /// Does a bulk mutation of this entity touch more than one table?
    pub fn is_multi_table(&self) -> bool {
        self.tables.len() > 1
            || matches!(
                self.inheritance,
                InheritanceType::Joined | InheritanceType::Union
            )
    }
}

/// Builder for [`MutationTarget`].
#[derive(Debug)]
pub struct MutationTargetBuilder {
    entity_name: String,
    root_entity_name: Option<String>,
    inheritance: InheritanceType,
    tables: Vec<TableMapping>,
    identifier: Vec<ColumnMapping>,
    discriminator: Option<Discriminator>,
    base_restriction: Option<String>,
    collections: Vec<CollectionTable>,
    version: Option<ColumnMapping>,
    id_table_name: Option<String>,
}

impl MutationTargetBuilder {
    fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            root_entity_name: None,
            inheritance: InheritanceType::None,
            tables: Vec::new(),
            identifier: Vec::new(),
            discriminator: None,
            base_restriction: None,
            collections: Vec::new(),
            version: None,
            id_table_name: None,
        }
    }

    pub fn root_entity(mut self, name: impl Into<String>) -> Self {
        self.root_entity_name = Some(name.into());
        self
    }

    pub fn inheritance(mut self, inheritance: InheritanceType) -> Self {
        self.inheritance = inheritance;
        self
    }

    /// Add an identifier column; call repeatedly for composite keys.
    pub fn identifier(mut self, column: ColumnMapping) -> Self {
        self.identifier.push(column.not_null());
        self
    }

    /// Add the next table in constraint order.
    pub fn table(mut self, table: TableMapping) -> Self {
        self.tables.push(table);
        self
    }

    pub fn discriminator(mut self, column: impl Into<String>, value: DiscriminatorValue) -> Self {
        self.discriminator = Some(Discriminator {
            column: column.into(),
            value,
        });
        self
    }

    pub fn base_restriction(mut self, sql: impl Into<String>) -> Self {
        self.base_restriction = Some(sql.into());
        self
    }

    pub fn collection(mut self, collection: CollectionTable) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn version(mut self, column: ColumnMapping) -> Self {
        self.version = Some(column.not_null());
        self
    }

    pub fn id_table_name(mut self, name: impl Into<String>) -> Self {
        self.id_table_name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<MutationTarget> {
        let entity = self.entity_name;
        if self.tables.is_empty() {
            return Err(Error::mapping(&entity, "no tables mapped"));
        }
        if self.identifier.is_empty() {
            return Err(Error::mapping(&entity, "no identifier columns mapped"));
        }
        let id_names: Vec<&str> = self.identifier.iter().map(|c| c.name.as_str()).collect();
        let root_keys: Vec<&str> = self.tables[0].key_columns.iter().map(String::as_str).collect();
        if root_keys != id_names {
            return Err(Error::mapping(
                &entity,
                format!(
                    "root table '{}' key columns {:?} do not match identifier {:?}",
                    self.tables[0].name, root_keys, id_names
                ),
            ));
        }
        for table in &self.tables[1..] {
            if table.key_columns.len() != id_names.len() {
                return Err(Error::mapping(
                    &entity,
                    format!(
                        "table '{}' has {} key columns, identifier has {}",
                        table.name,
                        table.key_columns.len(),
                        id_names.len()
                    ),
                ));
            }
        }
        for collection in &self.collections {
            let expected = if collection.references_identifier() {
                id_names.len()
            } else {
                collection.target_columns.len()
            };
            if collection.key_columns.len() != expected {
                return Err(Error::mapping(
                    &entity,
                    format!(
                        "collection '{}' key columns do not match referenced columns",
                        collection.role
                    ),
                ));
            }
        }

        let tables = self
            .tables
            .into_iter()
            .enumerate()
            .map(|(position, mut table)| {
                table.position = position;
                Arc::new(table)
            })
            .collect();

        Ok(MutationTarget {
            root_entity_name: self.root_entity_name.unwrap_or_else(|| entity.clone()),
            id_table_name: self
                .id_table_name
                .unwrap_or_else(|| format!("ht_{}", snake_case(&entity))),
            staging_table_name: format!("hte_{}", snake_case(&entity)),
            entity_name: entity,
            inheritance: self.inheritance,
            tables,
            identifier: self.identifier,
            discriminator: self.discriminator,
            base_restriction: self.base_restriction,
            collections: self.collections,
            version: self.version,
        })
    }
}

/// `CreditNote` -> `credit_note`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice() -> MutationTarget {
        MutationTarget::builder("Invoice")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(
                TableMapping::new("invoice", ["id"])
                    .column(ColumnMapping::new("status", SqlType::VarChar(20))),
            )
            .table(
                TableMapping::new("invoice_detail", ["invoice_id"])
                    .column(ColumnMapping::new("note", SqlType::Text)),
            )
            .build()
            .expect("valid mapping")
    }

    #[test]
    fn builder_assigns_positions_and_names() {
        let target = invoice();
        assert_eq!(target.root_entity_name(), "Invoice");
        assert_eq!(target.id_table_name(), "ht_invoice");
        assert_eq!(target.staging_table_name(), "hte_invoice");
        assert_eq!(target.tables()[1].position(), 1);
        assert!(target.root_table().is_identifier_table());
        assert!(target.is_multi_table());
        assert!(!target.identifier_columns()[0].nullable);
    }

    #[test]
    fn column_lookup() {
        let target = invoice();
        assert_eq!(
            target.table_for_column("note").map(|t| t.name()),
            Some("invoice_detail")
        );
        assert_eq!(
            target.table_for_column("id").map(|t| t.name()),
            Some("invoice")
        );
        assert!(target.table_for_column("missing").is_none());
        assert!(target.column("status").is_some());
    }

    #[test]
    fn id_and_staging_tables_are_named_after_the_entity() {
        let target = MutationTarget::builder("CreditNote")
            .root_entity("Invoice")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("invoice", ["id"]))
            .table(TableMapping::new("credit_note", ["invoice_id"]))
            .build()
            .expect("valid mapping");
        assert_eq!(target.staging_table_name(), "hte_credit_note");
        assert_eq!(target.id_table_name(), "ht_credit_note");
    }

    #[test]
    fn root_keys_must_match_identifier() {
        let err = MutationTarget::builder("Broken")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("broken", ["pk"]))
            .build();
        assert!(matches!(err, Err(Error::Mapping(_))));
    }

    #[test]
    fn secondary_key_arity_is_checked() {
        let err = MutationTarget::builder("Broken")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("broken", ["id"]))
            .table(TableMapping::new("broken_ext", ["a", "b"]))
            .build();
        assert!(matches!(err, Err(Error::Mapping(_))));
    }

    #[test]
    fn collection_key_arity_is_checked() {
        let err = MutationTarget::builder("Owner")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("owner", ["id"]))
            .collection(CollectionTable::new(
                "Owner.tags",
                "owner_tags",
                CollectionKind::ElementCollection,
                ["owner_id", "extra"],
            ))
            .build();
        assert!(matches!(err, Err(Error::Mapping(_))));
    }

    #[test]
    fn single_table_entity_is_not_multi_table() {
        let target = MutationTarget::builder("Flat")
            .identifier(ColumnMapping::new("id", SqlType::BigInt))
            .table(TableMapping::new("flat", ["id"]))
            .build()
            .expect("valid mapping");
        assert!(!target.is_multi_table());
    }
}
