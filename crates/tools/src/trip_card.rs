//! Trip card tool: a structured destination summary the client can render.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tripmate_core::error::ToolError;
use tripmate_core::tool::Tool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripCard {
    pub city: String,
    pub summary: String,
    pub packing_advice: Vec<String>,
    #[serde(default)]
    pub cautions: Vec<String>,
}

pub struct TripCardTool;

#[async_trait]
impl Tool for TripCardTool {
    fn name(&self) -> &str {
        "create_trip_card"
    }

    fn description(&self) -> &str {
        "Create a trip card for a destination: a short summary, packing advice and any cautions travellers should know."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "Destination city" },
                "summary": { "type": "string", "description": "Two or three sentences about the trip" },
                "packingAdvice": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Things to bring"
                },
                "cautions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Safety or weather warnings"
                }
            },
            "required": ["city", "summary", "packingAdvice"]
        })
    }

    fn output_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "required": ["city", "summary", "packingAdvice", "cautions"]
        }))
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let card: TripCard = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        tracing::debug!(city = %card.city, "Trip card created");
        serde_json::to_value(card).map_err(|e| ToolError::InvalidOutput(e.to_string()))
    }
}
