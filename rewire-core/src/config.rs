//! Configuration
//!
//! Configs are delivered as JSON payloads keyed by [`ConfigKey`]: a config
//! definition name plus the config id of the consumer. Two payloads make up
//! the bootstrap phase, both under the container's own config id:
//!
//! ```text
//! modules:    { "modules": ["core", "web"] }
//! components: { "components": [
//!                 { "id": "db", "module": "core", "class": "Database",
//!                   "config_id": "db", "inject": [] },
//!                 { "id": "api", "module": "web", "class": "Api",
//!                   "config_id": "api", "inject": [{ "id": "db" }] } ] }
//! ```
//!
//! Everything else is per-component configuration, looked up with the config
//! names a class declares and the node's config id.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ReconfigError;
use crate::graph::ComponentId;
use crate::module::{ClassSpec, ModuleRef};

/// Config definition holding the module set.
pub const MODULES_CONFIG: &str = "modules";

/// Config definition holding the component topology.
pub const COMPONENTS_CONFIG: &str = "components";

/// Identifies one config payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey {
    name: String,
    config_id: String,
}

impl ConfigKey {
    pub fn new(name: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_id: config_id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.config_id)
    }
}

/// A set of config payloads.
pub type ConfigSet = BTreeMap<ConfigKey, serde_json::Value>;

/// Look up and deserialize a config.
pub fn get_config<T: DeserializeOwned>(configs: &ConfigSet, key: &ConfigKey) -> Result<T, ReconfigError> {
    let value = configs
        .get(key)
        .ok_or_else(|| ReconfigError::MissingConfig { key: key.clone() })?;
    serde_json::from_value(value.clone()).map_err(|source| ReconfigError::InvalidConfig {
        key: key.clone(),
        source,
    })
}

/// The `modules` bootstrap config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
}

impl ModulesConfig {
    pub fn new<I, M>(modules: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<ModuleRef>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }
}

/// The `components` bootstrap config: the declared topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentsConfig {
    #[serde(default)]
    pub components: Vec<ComponentDecl>,
}

impl ComponentsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(mut self, decl: ComponentDecl) -> Self {
        self.components.push(decl);
        self
    }
}

/// One declared component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub id: ComponentId,
    pub module: ModuleRef,
    pub class: String,
    #[serde(default)]
    pub config_id: String,
    #[serde(default)]
    pub inject: Vec<InjectDecl>,
}

impl ComponentDecl {
    pub fn new(id: impl Into<ComponentId>, module: impl Into<ModuleRef>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            class: class.into(),
            config_id: String::new(),
            inject: Vec::new(),
        }
    }

    pub fn config_id(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = config_id.into();
        self
    }

    pub fn inject(mut self, id: impl Into<ComponentId>) -> Self {
        self.inject.push(InjectDecl {
            id: id.into(),
            name: None,
        });
        self
    }

    pub fn class_spec(&self) -> ClassSpec {
        ClassSpec::new(self.module.clone(), self.class.clone())
    }
}

/// A declared injection edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectDecl {
    pub id: ComponentId,
    /// Parameter name hint. Injection is matched by type; the name is
    /// informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_config_id() -> String {
    "container".to_string()
}

/// Settings of one container instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Config id the bootstrap configs are delivered under.
    #[serde(default = "default_config_id")]
    pub config_id: String,

    /// Stop pulling configs after the first complete graph; the host is
    /// expected to restart to pick up a redeploy.
    #[serde(default)]
    pub restart_on_redeploy: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            config_id: default_config_id(),
            restart_on_redeploy: false,
        }
    }
}

impl ContainerSettings {
    pub fn new(config_id: impl Into<String>) -> Self {
        Self {
            config_id: config_id.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn modules_key(&self) -> ConfigKey {
        ConfigKey::new(MODULES_CONFIG, self.config_id.clone())
    }

    pub fn components_key(&self) -> ConfigKey {
        ConfigKey::new(COMPONENTS_CONFIG, self.config_id.clone())
    }
}
