//! Per-entity choice of bulk id strategy.
//!
//! A strategy registered for a root entity wins over the configured one,
//! which wins over the dialect's fallback. Choices are made once, at
//! factory construction, and never change afterwards.

use crate::config::BulkIdSettings;
use multitable_bulk::BulkIdStrategy;
use multitable_core::{Dialect, Result};
use std::collections::HashMap;

/// Strategies chosen for one root entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedStrategies {
    pub mutation: BulkIdStrategy,
    pub insert: BulkIdStrategy,
}

/// Resolves the strategy of every root entity.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    mutation: BulkIdStrategy,
    insert: BulkIdStrategy,
    registered: HashMap<String, BulkIdStrategy>,
}

impl StrategySelector {
    /// Configured strategies, or the dialect's fallback where unset. Both
    /// must be supported by the dialect.
    pub fn new(settings: &BulkIdSettings, dialect: &dyn Dialect) -> Result<Self> {
        let mutation_kind = settings
            .mutation_strategy
            .unwrap_or_else(|| dialect.fallback_mutation_strategy());
        let insert_kind = settings
            .insert_strategy
            .unwrap_or_else(|| dialect.fallback_insert_strategy());
        let mutation = settings.strategy(mutation_kind);
        let insert = settings.strategy(insert_kind);
        mutation.validate(dialect)?;
        insert.validate(dialect)?;
        tracing::debug!(
            dialect = dialect.name(),
            mutation = %mutation.kind(),
            insert = %insert.kind(),
            "default bulk id strategies"
        );
        Ok(Self {
            mutation,
            insert,
            registered: HashMap::new(),
        })
    }

    /// Use `strategy` for every bulk statement against `root_entity` and
    /// its subclasses.
    pub fn register(&mut self, root_entity: impl Into<String>, strategy: BulkIdStrategy) {
        self.registered.insert(root_entity.into(), strategy);
    }

    pub fn select_mutation_strategy(&self, root_entity: &str) -> &BulkIdStrategy {
        self.registered.get(root_entity).unwrap_or(&self.mutation)
    }

    pub fn select_insert_strategy(&self, root_entity: &str) -> &BulkIdStrategy {
        self.registered.get(root_entity).unwrap_or(&self.insert)
    }

    /// Both choices for a root entity, checked against the dialect.
    pub fn select(&self, root_entity: &str, dialect: &dyn Dialect) -> Result<SelectedStrategies> {
        let selected = SelectedStrategies {
            mutation: self.select_mutation_strategy(root_entity).clone(),
            insert: self.select_insert_strategy(root_entity).clone(),
        };
        selected.mutation.validate(dialect)?;
        selected.insert.validate(dialect)?;
        Ok(selected)
    }
}
