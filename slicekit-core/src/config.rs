//! Store configuration.
//!
//! [`StoreOptions`] is everything [`Store::new`] needs.
//! [`StoreConfig`] is its serializable subset, loadable from JSON.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::debug::{DebugCallback, DebugEvent};
use crate::error::Result;
use crate::ids::IdGenerator;
use crate::reactive::Scheduler;
use crate::state::{Slice, StateOverride, Transaction};
use crate::store::{DispatchHook, Store};

/// Serializable store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Store name, recorded in transaction metadata.
    pub name: Option<String>,

    /// Whether effects start when the store is created.
    pub auto_start_effects: bool,

    /// Free-form configuration handed to effects and operations.
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: None,
            auto_start_effects: true,
            config: serde_json::Map::new(),
        }
    }
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Options for creating a store.
pub struct StoreOptions {
    pub(crate) slices: Vec<Slice>,
    pub(crate) config: StoreConfig,
    pub(crate) debug: Option<DebugCallback>,
    pub(crate) state_override: StateOverride,
    pub(crate) scheduler: Option<Rc<dyn Scheduler>>,
    pub(crate) dispatch_hook: Option<DispatchHook>,
    pub(crate) ids: IdGenerator,
}

impl StoreOptions {
    /// Options for a store over `slices`, in dependency order.
    pub fn new(slices: Vec<Slice>) -> Self {
        Self {
            slices,
            config: StoreConfig::default(),
            debug: None,
            state_override: StateOverride::default(),
            scheduler: None,
            dispatch_hook: None,
            ids: IdGenerator::global(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.config.name = Some(name.to_string());
        self
    }

    /// Receive a [`DebugEvent`] for every transaction and effect run.
    pub fn debug<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DebugEvent) + 'static,
    {
        self.debug = Some(Rc::new(callback));
        self
    }

    /// Whether effects start with the store (default `true`). Otherwise
    /// they wait for [`Store::start_effects`].
    pub fn auto_start_effects(mut self, enabled: bool) -> Self {
        self.config.auto_start_effects = enabled;
        self
    }

    /// Set one configuration entry.
    pub fn config_value(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.config.insert(key.to_string(), value);
        self
    }

    /// Take name, auto-start flag and configuration from `config`.
    ///
    /// Entries already set with `config_value` are kept unless `config`
    /// sets the same key.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        if config.name.is_some() {
            self.config.name = config.name;
        }
        self.config.auto_start_effects = config.auto_start_effects;
        self.config.config.extend(config.config);
        self
    }

    /// Replace initial field values.
    pub fn state_override(mut self, overrides: StateOverride) -> Self {
        self.state_override = overrides;
        self
    }

    /// Run effects through `scheduler`.
    ///
    /// Without one, runs wait in a queue drained by
    /// [`Store::flush_effects`].
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Intercept every dispatched transaction.
    ///
    /// The hook receives the store, the function that applies a
    /// transaction locally, and the transaction. It decides whether,
    /// when and how often to apply it.
    pub fn dispatch_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Store, &dyn Fn(Transaction) -> Result<()>, Transaction) -> Result<()> + 'static,
    {
        self.dispatch_hook = Some(Rc::new(hook));
        self
    }

    /// Generate effect ids from `ids` instead of the process-wide counters.
    pub fn ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("slices", &self.slices)
            .field("config", &self.config)
            .field("debug", &self.debug.is_some())
            .field("state_override", &self.state_override)
            .field("scheduler", &self.scheduler.is_some())
            .field("dispatch_hook", &self.dispatch_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults_when_fields_are_missing() {
        let config = StoreConfig::from_json("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert!(config.auto_start_effects);
    }

    #[test]
    fn config_loads_from_json() {
        let config = StoreConfig::from_json(
            r#"{"name":"main","autoStartEffects":false,"config":{"apiUrl":"http://localhost"}}"#,
        )
        .unwrap();
        assert_eq!(config.name.as_deref(), Some("main"));
        assert!(!config.auto_start_effects);
        assert_eq!(config.config["apiUrl"], json!("http://localhost"));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let err = StoreConfig::from_json(r#"{"autoStartEffects":"yes"}"#).unwrap_err();
        assert!(err.to_string().starts_with("invalid store config"));
    }

    #[test]
    fn with_config_merges_entries() {
        let options = StoreOptions::new(Vec::new())
            .name("local")
            .config_value("retries", json!(3))
            .config_value("mode", json!("dev"))
            .with_config(StoreConfig {
                name: None,
                auto_start_effects: false,
                config: [("mode".to_string(), json!("prod"))].into_iter().collect(),
            });

        assert_eq!(options.config.name.as_deref(), Some("local"));
        assert!(!options.config.auto_start_effects);
        assert_eq!(options.config.config["retries"], json!(3));
        assert_eq!(options.config.config["mode"], json!("prod"));
    }
}
