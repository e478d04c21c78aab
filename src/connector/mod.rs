//! Connectors attached to a pod's data sources.
//!
//! A connector reacts to the actions an agent takes. The only built-in one is
//! the `stateful` connector, which applies per-action effect statements
//! (e.g. `usd -= price`) to the simulated row during training.

use crate::error::Result;
use crate::reward::{apply_effect, check_effect, Statement};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

pub const STATEFUL_CONNECTOR: &str = "stateful";

/// Connector selection and its free-form parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// A data source declared at `Init`: its connector and the effect each action
/// has on the pod's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

pub trait Connector: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Apply the effect of `action` to `row`. `prev` is the row before the
    /// transition.
    fn apply_action(&self, action: &str, prev: &[f64], row: &mut [f64]) -> Result<()>;
}

/// Applies effect statements to the simulated state.
#[derive(Debug)]
pub struct StatefulConnector {
    fields: Vec<String>,
    effects: HashMap<String, Statement>,
}

impl StatefulConnector {
    /// Effects that fail to parse or target an undeclared field are skipped.
    pub fn new(fields: &[String], action_effects: &BTreeMap<String, String>) -> Self {
        let mut effects = HashMap::new();
        for (action, source) in action_effects {
            match check_effect(source, fields) {
                Ok(stmt) => {
                    effects.insert(action.clone(), stmt);
                }
                Err(e) => warn!(action = %action, error = %e, "Skipping invalid effect"),
            }
        }
        Self {
            fields: fields.to_vec(),
            effects,
        }
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }
}

impl Connector for StatefulConnector {
    fn name(&self) -> &str {
        STATEFUL_CONNECTOR
    }

    fn apply_action(&self, action: &str, prev: &[f64], row: &mut [f64]) -> Result<()> {
        match self.effects.get(action) {
            Some(stmt) => apply_effect(stmt, &self.fields, prev, row),
            None => Ok(()),
        }
    }
}

/// The connectors of one pod.
#[derive(Debug, Default)]
pub struct ConnectorManager {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the connectors for `datasources`. Unknown connector names are
    /// logged and skipped.
    pub fn from_datasources(datasources: &[DataSource], fields: &[String]) -> Self {
        let mut manager = Self::new();
        for source in datasources {
            match source.connector.name.as_str() {
                STATEFUL_CONNECTOR => {
                    let connector = StatefulConnector::new(fields, &source.actions);
                    debug!(effects = connector.effect_count(), "Added stateful connector");
                    manager.add_connector(Box::new(connector));
                }
                other => warn!(connector = %other, "Unknown connector, skipping"),
            }
        }
        manager
    }

    pub fn add_connector(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Run `action` through every connector in registration order
    pub fn apply_action(&self, action: &str, prev: &[f64], row: &mut [f64]) -> Result<()> {
        for connector in &self.connectors {
            connector.apply_action(action, prev, row)?;
        }
        Ok(())
    }
}
