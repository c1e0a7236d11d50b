//! Packing list tool: items to bring, each with the reason it is needed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tripmate_core::error::ToolError;
use tripmate_core::tool::Tool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingItem {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingList {
    pub items: Vec<PackingItem>,
}

pub struct PackingListTool;

#[async_trait]
impl Tool for PackingListTool {
    fn name(&self) -> &str {
        "create_packing_list"
    }

    fn description(&self) -> &str {
        "Create a packing list for a trip. Each item carries a short reason, e.g. an umbrella because rain is forecast."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "item": { "type": "string" },
                            "reason": { "type": "string" }
                        },
                        "required": ["item", "reason"]
                    }
                }
            },
            "required": ["items"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let list: PackingList = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        tracing::debug!(items = list.items.len(), "Packing list created");
        serde_json::to_value(list).map_err(|e| ToolError::InvalidOutput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_validated_items() {
        let out = PackingListTool
            .execute(serde_json::json!({
                "items": [
                    { "item": "umbrella", "reason": "rain on Tuesday" },
                    { "item": "sunscreen", "reason": "UV index is high" }
                ]
            }))
            .await
            .unwrap();
        assert_eq!(out["items"].as_array().unwrap().len(), 2);
        assert_eq!(out["items"][0]["item"], "umbrella");
    }

    #[tokio::test]
    async fn item_without_reason_is_rejected() {
        let err = PackingListTool
            .execute(serde_json::json!({ "items": [{ "item": "hat" }] }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
