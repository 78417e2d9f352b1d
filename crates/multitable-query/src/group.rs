//! Ordered groups of table mutations for one logical entity operation.

use crate::builder::TableMutationBuilder;
use crate::mutation::{MutationKind, TableMutation};
use multitable_core::{Dialect, Error, Result};

/// The table mutations of one entity-level operation, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationGroup {
    /// Every table resolved to "nothing to write".
    NoOp { kind: MutationKind, role: String },
    Mutations {
        kind: MutationKind,
        role: String,
        mutations: Vec<TableMutation>,
    },
}

impl MutationGroup {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationGroup::NoOp { kind, .. } | MutationGroup::Mutations { kind, .. } => *kind,
        }
    }

    pub fn role(&self) -> &str {
        match self {
            MutationGroup::NoOp { role, .. } | MutationGroup::Mutations { role, .. } => role,
        }
    }

    pub fn mutations(&self) -> &[TableMutation] {
        match self {
            MutationGroup::NoOp { .. } => &[],
            MutationGroup::Mutations { mutations, .. } => mutations,
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, MutationGroup::NoOp { .. })
    }

    pub fn mutation_for(&self, table: &str) -> Option<&TableMutation> {
        self.mutations().iter().find(|m| m.table_name() == table)
    }
}

/// Collects one table builder per participating table.
#[derive(Debug)]
pub struct MutationGroupBuilder {
    kind: MutationKind,
    role: String,
    builders: Vec<TableMutationBuilder>,
}

impl MutationGroupBuilder {
    pub fn new(kind: MutationKind, role: impl Into<String>) -> Self {
        Self {
            kind,
            role: role.into(),
            builders: Vec::new(),
        }
    }

    pub fn add_table_builder(&mut self, builder: TableMutationBuilder) {
        self.builders.push(builder);
    }

    pub fn table_builder_mut(&mut self, table: &str) -> Option<&mut TableMutationBuilder> {
        self.builders.iter_mut().find(|b| b.table().name() == table)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Build all table mutations. A group without table builders is a
    /// mapping mistake and fails; one whose tables all have nothing to
    /// write degrades to [`MutationGroup::NoOp`].
    pub fn build_mutation_group(self, dialect: &dyn Dialect) -> Result<MutationGroup> {
        if self.builders.is_empty() {
            return Err(Error::config(format!(
                "{} of '{}' produced no table mutations",
                self.kind, self.role
            )));
        }
        let mutations: Vec<TableMutation> = self
            .builders
            .into_iter()
            .map(|b| b.build_mutation(dialect))
            .filter(|m| !m.is_no_op())
            .collect();
        if mutations.is_empty() {
            tracing::trace!(role = %self.role, kind = %self.kind, "mutation group is a no-op");
            return Ok(MutationGroup::NoOp {
                kind: self.kind,
                role: self.role,
            });
        }
        Ok(MutationGroup::Mutations {
            kind: self.kind,
            role: self.role,
            mutations,
        })
    }
}
