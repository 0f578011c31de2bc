//! The contract between a node and the build steps ("techs") it runs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::Node;
use crate::error::OptionsError;

/// Option key reserved for the evaluation context of
/// [`Node::run_tech_and_require`].
pub const CONTEXT_KEY: &str = "context";

/// Configuration handed to a tech when it is instantiated.
///
/// Keys are tech specific and opaque to the node, with the exception of
/// [`CONTEXT_KEY`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechOptions(Map<String, Value>);

impl TechOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn context(&self) -> Option<&Value> {
        self.get(CONTEXT_KEY)
    }

    /// Deserializes the options into a tech-specific structure.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, OptionsError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }
}

impl From<Map<String, Value>> for TechOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for TechOptions {
    type Error = OptionsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(Self(serde_json::from_value(value)?))
    }
}

/// A pluggable build step producing one or more named targets for a node.
///
/// The runner creates a fresh instance per invocation, calls [`Tech::init`]
/// once and then awaits [`Tech::build`]. While building, the tech reports
/// results back through the node, usually with
/// [`Node::resolve_target`] or [`Node::reject_target`]. A tech that never
/// does either leaves the node's completion signal pending.
#[async_trait]
pub trait Tech: Send {
    fn new(options: TechOptions) -> Self
    where
        Self: Sized;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn init(&mut self, node: Arc<Node>);

    async fn build(&mut self) -> anyhow::Result<()>;

    /// Target names this tech produces, in declaration order. Names are
    /// relative to the node directory.
    fn targets(&self) -> Vec<String>;
}
