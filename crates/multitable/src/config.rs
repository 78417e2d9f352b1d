//! Bulk id strategy configuration.
//!
//! Settings are read once at boot, from `multitable.*` properties, from
//! the environment (`MULTITABLE_*`), or deserialized with serde.

use multitable_bulk::{BulkIdStrategy, TableStrategyOptions};
use multitable_core::{Error, Result, StrategyKind};
use serde::{Deserialize, Serialize};

/// Prefix of every property key.
pub const PROPERTY_PREFIX: &str = "multitable.";

const TABLE_STRATEGIES: [&str; 3] = ["global_temporary", "persistent", "local_temporary"];
const TABLE_SETTINGS: [&str; 5] = ["catalog", "schema", "create_tables", "drop_tables", "clean_rows"];

/// Settings of one table-based strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStrategySettings {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub create_tables: bool,
    pub drop_tables: bool,
    pub clean_rows: bool,
}

impl Default for TableStrategySettings {
    fn default() -> Self {
        let defaults = TableStrategyOptions::default();
        Self {
            catalog: defaults.catalog,
            schema: defaults.schema,
            create_tables: defaults.create_tables,
            drop_tables: defaults.drop_tables,
            clean_rows: defaults.clean_rows,
        }
    }
}

impl TableStrategySettings {
    pub fn options(&self) -> TableStrategyOptions {
        TableStrategyOptions {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            create_tables: self.create_tables,
            drop_tables: self.drop_tables,
            clean_rows: self.clean_rows,
        }
    }

    fn apply(&mut self, key: &str, setting: &str, value: &str) -> Result<()> {
        match setting {
            "catalog" => self.catalog = non_empty(value),
            "schema" => self.schema = non_empty(value),
            "create_tables" => self.create_tables = parse_bool(key, value)?,
            "drop_tables" => self.drop_tables = parse_bool(key, value)?,
            "clean_rows" => self.clean_rows = parse_bool(key, value)?,
            _ => return Err(Error::config_key(key, "unknown setting")),
        }
        Ok(())
    }
}

/// Bulk mutation configuration of a factory.
///
/// # Example
///
/// ```ignore
/// let settings = BulkIdSettings::from_properties([
///     ("multitable.mutation_strategy", "local_temporary"),
///     ("multitable.local_temporary.drop_tables", "true"),
/// ])?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkIdSettings {
    /// Strategy for bulk UPDATE and DELETE; the dialect's fallback if unset.
    pub mutation_strategy: Option<StrategyKind>,
    /// Strategy for bulk INSERT; the dialect's fallback if unset.
    pub insert_strategy: Option<StrategyKind>,
    pub global_temporary: TableStrategySettings,
    pub persistent: TableStrategySettings,
    pub local_temporary: TableStrategySettings,
    /// Prefix generated statements with `/* ... */` comments.
    pub use_sql_comments: bool,
}

impl BulkIdSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `multitable.*` properties. Keys outside the prefix are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in properties {
            let key = key.as_ref();
            if let Some(name) = key.strip_prefix(PROPERTY_PREFIX) {
                settings.apply(key, name, value.as_ref())?;
            }
        }
        Ok(settings)
    }

    /// Read the environment form of every key: upper-cased with `.`
    /// replaced by `_`, e.g. `MULTITABLE_MUTATION_STRATEGY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        for key in property_keys() {
            if let Some(value) = lookup(&env_name(&key)) {
                let name = &key[PROPERTY_PREFIX.len()..];
                settings.apply(&key, name, &value)?;
            }
        }
        Ok(settings)
    }

    pub fn mutation_strategy(mut self, kind: StrategyKind) -> Self {
        self.mutation_strategy = Some(kind);
        self
    }

    pub fn insert_strategy(mut self, kind: StrategyKind) -> Self {
        self.insert_strategy = Some(kind);
        self
    }

    pub fn use_sql_comments(mut self, enabled: bool) -> Self {
        self.use_sql_comments = enabled;
        self
    }

    /// Settings of a table-based strategy.
    pub fn table_settings(&self, kind: StrategyKind) -> Option<&TableStrategySettings> {
        match kind {
            StrategyKind::GlobalTemporary => Some(&self.global_temporary),
            StrategyKind::Persistent => Some(&self.persistent),
            StrategyKind::LocalTemporary => Some(&self.local_temporary),
            StrategyKind::Cte | StrategyKind::Inline => None,
        }
    }

    /// The configured strategy of a kind.
    pub fn strategy(&self, kind: StrategyKind) -> BulkIdStrategy {
        let options = self
            .table_settings(kind)
            .map(TableStrategySettings::options)
            .unwrap_or_default();
        BulkIdStrategy::from_kind(kind, options)
    }

    fn apply(&mut self, key: &str, name: &str, value: &str) -> Result<()> {
        match name {
            "mutation_strategy" => self.mutation_strategy = parse_strategy(key, value)?,
            "insert_strategy" => self.insert_strategy = parse_strategy(key, value)?,
            "use_sql_comments" => self.use_sql_comments = parse_bool(key, value)?,
            _ => {
                let Some((strategy, setting)) = name.split_once('.') else {
                    return Err(Error::config_key(key, "unknown setting"));
                };
                let target = match strategy {
                    "global_temporary" => &mut self.global_temporary,
                    "persistent" => &mut self.persistent,
                    "local_temporary" => &mut self.local_temporary,
                    _ => return Err(Error::config_key(key, "unknown strategy section")),
                };
                target.apply(key, setting, value)?;
            }
        }
        tracing::debug!(key, value, "bulk id setting");
        Ok(())
    }
}

/// Every recognized property key, prefix included.
pub fn property_keys() -> Vec<String> {
    let mut keys: Vec<String> = ["mutation_strategy", "insert_strategy", "use_sql_comments"]
        .iter()
        .map(|k| format!("{PROPERTY_PREFIX}{k}"))
        .collect();
    for strategy in TABLE_STRATEGIES {
        for setting in TABLE_SETTINGS {
            keys.push(format!("{PROPERTY_PREFIX}{strategy}.{setting}"));
        }
    }
    keys
}

/// Environment variable name of a property key.
pub fn env_name(key: &str) -> String {
    key.to_ascii_uppercase().replace('.', "_")
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_strategy(key: &str, value: &str) -> Result<Option<StrategyKind>> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    value.parse::<StrategyKind>().map(Some).map_err(|e| match e {
        Error::Config(mut c) => {
            c.key = Some(key.to_string());
            Error::Config(c)
        }
        other => other,
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::config_key(key, format!("expected a boolean, got '{other}'"))),
    }
}
