use async_trait::async_trait;
use camino::Utf8Path;
use serde_json::Value;

use crate::core::TargetValue;

/// Loads a built target as a module and evaluates it.
#[async_trait]
pub trait ModuleEvaluator: Send + Sync {
    async fn evaluate(&self, path: &Utf8Path, context: Option<&Value>)
    -> anyhow::Result<TargetValue>;
}

/// Evaluates targets as JSON documents. The context is not used.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonModuleEvaluator;

#[async_trait]
impl ModuleEvaluator for JsonModuleEvaluator {
    async fn evaluate(&self, path: &Utf8Path, _: Option<&Value>) -> anyhow::Result<TargetValue> {
        let text = tokio::fs::read_to_string(path).await?;
        let data: Value = serde_json::from_str(&text)?;
        Ok(TargetValue::Data(data))
    }
}
