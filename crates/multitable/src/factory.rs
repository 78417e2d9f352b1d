//! The bulk mutation factory: strategy choice, id table lifecycle and
//! handler construction for a fixed set of entities.

use crate::config::BulkIdSettings;
use crate::selector::{SelectedStrategies, StrategySelector};
use multitable_bulk::{BulkHandler, BulkIdStrategy, EntityMutationPlanner};
use multitable_core::{ConnectionProvider, Cx, Dialect, Error, MutationTarget, Outcome, Result};
use multitable_query::{BulkDelete, BulkInsert, BulkUpdate};
use multitable_schema::{DdlReport, IdTableMapping};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Id tables handled by one strategy at boot and shutdown.
#[derive(Debug, Clone)]
pub struct TableBatch {
    pub strategy: BulkIdStrategy,
    pub tables: Vec<IdTableMapping>,
}

/// Builder for [`BulkMutationFactory`].
#[derive(Debug)]
pub struct BulkMutationFactoryBuilder {
    dialect: Arc<dyn Dialect>,
    settings: BulkIdSettings,
    targets: Vec<Arc<MutationTarget>>,
    registered: Vec<(String, BulkIdStrategy)>,
}

impl BulkMutationFactoryBuilder {
    pub fn settings(mut self, settings: BulkIdSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn entity(mut self, target: impl Into<Arc<MutationTarget>>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Use a specific strategy for one root entity hierarchy.
    pub fn register_strategy(mut self, root_entity: impl Into<String>, strategy: BulkIdStrategy) -> Self {
        self.registered.push((root_entity.into(), strategy));
        self
    }

    /// Resolve the strategy of every root entity.
    pub fn build(self) -> Result<BulkMutationFactory> {
        let mut selector = StrategySelector::new(&self.settings, self.dialect.as_ref())?;
        for (root, strategy) in self.registered {
            selector.register(root, strategy);
        }

        let mut targets = BTreeMap::new();
        let mut strategies = BTreeMap::new();
        for target in self.targets {
            let root = target.root_entity_name().to_string();
            if !strategies.contains_key(&root) {
                let selected = selector.select(&root, self.dialect.as_ref())?;
                tracing::debug!(
                    root = %root,
                    mutation = %selected.mutation.kind(),
                    insert = %selected.insert.kind(),
                    "selected bulk id strategies"
                );
                strategies.insert(root, selected);
            }
            let entity = target.entity_name().to_string();
            if targets.insert(entity.clone(), target).is_some() {
                return Err(Error::mapping(entity, "entity registered twice"));
            }
        }

        let factory = BulkMutationFactory {
            dialect: self.dialect,
            settings: self.settings,
            targets,
            strategies,
        };
        factory.check_shared_tables()?;
        Ok(factory)
    }
}

/// Creates bulk mutation handlers for the registered entities.
///
/// Strategies are chosen when the factory is built and never change.
/// The factory is immutable and can be shared across tasks with `Arc`.
#[derive(Debug)]
pub struct BulkMutationFactory {
    dialect: Arc<dyn Dialect>,
    settings: BulkIdSettings,
    targets: BTreeMap<String, Arc<MutationTarget>>,
    strategies: BTreeMap<String, SelectedStrategies>,
}

impl BulkMutationFactory {
    pub fn builder(dialect: Arc<dyn Dialect>) -> BulkMutationFactoryBuilder {
        BulkMutationFactoryBuilder {
            dialect,
            settings: BulkIdSettings::default(),
            targets: Vec::new(),
            registered: Vec::new(),
        }
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn settings(&self) -> &BulkIdSettings {
        &self.settings
    }

    pub fn target(&self, entity: &str) -> Result<&Arc<MutationTarget>> {
        self.targets
            .get(entity)
            .ok_or_else(|| Error::mapping(entity, "entity is not registered for bulk mutations"))
    }

    /// Strategies of the hierarchy `entity` belongs to.
    pub fn strategies(&self, entity: &str) -> Result<&SelectedStrategies> {
        let target = self.target(entity)?;
        self.strategies
            .get(target.root_entity_name())
            .ok_or_else(|| Error::mapping(entity, "no bulk id strategy selected"))
    }

    /// Id and staging tables grouped by the strategy that manages them.
    /// Entities of one hierarchy share their tables, which appear once.
    pub fn table_batches(&self) -> Vec<TableBatch> {
        let mut batches: Vec<TableBatch> = Vec::new();
        let mut add = |strategy: &BulkIdStrategy, table: Option<IdTableMapping>| {
            let Some(table) = table else {
                return;
            };
            let index = match batches.iter().position(|b| &b.strategy == strategy) {
                Some(index) => index,
                None => {
                    batches.push(TableBatch {
                        strategy: strategy.clone(),
                        tables: Vec::new(),
                    });
                    batches.len() - 1
                }
            };
            let tables = &mut batches[index].tables;
            if !tables.iter().any(|t| t.qualified_name() == table.qualified_name()) {
                tables.push(table);
            }
        };
        for target in self.targets.values() {
            let Some(selected) = self.strategies.get(target.root_entity_name()) else {
                continue;
            };
            add(&selected.mutation, selected.mutation.id_table(target));
            add(&selected.insert, selected.insert.staging_table(target));
        }
        batches
    }

    /// Entities may only share an id or staging table (through an explicit
    /// table name) when they stage exactly the same columns into it.
    fn check_shared_tables(&self) -> Result<()> {
        let mut seen: BTreeMap<String, (&str, IdTableMapping)> = BTreeMap::new();
        for target in self.targets.values() {
            let Some(selected) = self.strategies.get(target.root_entity_name()) else {
                continue;
            };
            let tables = [
                selected.mutation.id_table(target),
                selected.insert.staging_table(target),
            ];
            for table in tables.into_iter().flatten() {
                let name = table.qualified_name().to_string();
                match seen.get(&name) {
                    Some((other, existing)) if existing != &table => {
                        return Err(Error::mapping(
                            target.entity_name(),
                            format!("table {name} is shared with {other} but has different columns"),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(name, (target.entity_name(), table));
                    }
                }
            }
        }
        Ok(())
    }

    /// Create the id tables of strategies configured to do so.
    ///
    /// DDL failures are recorded in the returned reports, never raised.
    #[tracing::instrument(level = "debug", skip(self, cx, provider))]
    pub async fn boot<P: ConnectionProvider>(&self, cx: &Cx, provider: &P) -> Outcome<Vec<DdlReport>, Error> {
        let mut reports = Vec::new();
        for batch in self.table_batches() {
            let report = match batch
                .strategy
                .prepare(cx, provider, &batch.tables, self.dialect.as_ref())
                .await
            {
                Outcome::Ok(report) => report,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            for (table, error) in report.failures() {
                tracing::warn!(table, error = %error, "id table not created");
            }
            reports.push(report);
        }
        tracing::info!(
            dialect = self.dialect.name(),
            entities = self.targets.len(),
            created = reports.iter().map(DdlReport::succeeded).sum::<usize>(),
            "bulk mutation factory booted"
        );
        Outcome::Ok(reports)
    }

    /// Drop the id tables of strategies configured to do so.
    #[tracing::instrument(level = "debug", skip(self, cx, provider))]
    pub async fn shutdown<P: ConnectionProvider>(&self, cx: &Cx, provider: &P) -> Outcome<Vec<DdlReport>, Error> {
        let mut reports = Vec::new();
        for batch in self.table_batches() {
            match batch
                .strategy
                .release(cx, provider, &batch.tables, self.dialect.as_ref())
                .await
            {
                Outcome::Ok(report) => reports.push(report),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        tracing::info!(
            dropped = reports.iter().map(DdlReport::succeeded).sum::<usize>(),
            "bulk mutation factory shut down"
        );
        Outcome::Ok(reports)
    }

    pub fn update_handler(&self, statement: &BulkUpdate) -> Result<BulkHandler> {
        let target = self.target(&statement.entity)?;
        let strategies = self.strategies(&statement.entity)?;
        strategies
            .mutation
            .build_update_handler(target, &self.dialect, statement, self.settings.use_sql_comments)
    }

    pub fn delete_handler(&self, statement: &BulkDelete) -> Result<BulkHandler> {
        let target = self.target(&statement.entity)?;
        let strategies = self.strategies(&statement.entity)?;
        strategies
            .mutation
            .build_delete_handler(target, &self.dialect, statement, self.settings.use_sql_comments)
    }

    pub fn insert_handler(&self, statement: &BulkInsert) -> Result<BulkHandler> {
        let target = self.target(&statement.entity)?;
        let strategies = self.strategies(&statement.entity)?;
        strategies
            .insert
            .build_insert_handler(target, &self.dialect, statement, self.settings.use_sql_comments)
    }

    /// Row-level mutation planner for one entity.
    pub fn planner(&self, entity: &str) -> Result<EntityMutationPlanner> {
        let target = self.target(entity)?;
        Ok(EntityMutationPlanner::new(Arc::clone(target), Arc::clone(&self.dialect))
            .with_sql_comments(self.settings.use_sql_comments))
    }
}
