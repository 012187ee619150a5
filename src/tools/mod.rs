//! Tools module - functions offered to the completion model
//!
//! The bot exposes a single function, `generate_image`. The model decides when
//! to call it; the completion handler runs it and reports back with one of the
//! fixed result messages below.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::images::AspectRatio;
use crate::Result;

pub const GENERATE_IMAGE: &str = "generate_image";

/// Function result reported when every image of a batch was produced.
pub const IMAGES_SUCCEEDED: &str = "Successfully generated all images.";

/// Function result reported when at least one image is missing.
pub const IMAGES_FAILED: &str = "Failed to generate at least one image, sorry for that.";

/// Tool definition for LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The `generate_image` function schema.
pub fn generate_image_definition() -> ToolDefinition {
    let ratios: Vec<&str> = AspectRatio::ALL.iter().map(|r| r.as_str()).collect();

    ToolDefinition {
        name: GENERATE_IMAGE.to_string(),
        description: "Generates images using Adobe Firefly".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "descriptions": {
                    "type": "array",
                    "description": "The descriptions of the images to be generated",
                    "items": {"type": "string"}
                },
                "aspect_ratio": {
                    "type": "string",
                    "description": "The aspect ratios of the images to be generated",
                    "default": AspectRatio::default().as_str(),
                    "enum": ratios
                }
            },
            "required": ["descriptions", "aspect_ratio"]
        }),
    }
}

/// Arguments of a `generate_image` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageToolArgs {
    pub descriptions: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

impl ImageToolArgs {
    pub fn parse(arguments: &Value) -> Result<Self> {
        serde_json::from_value(arguments.clone())
            .map_err(|e| Error::Llm(format!("Invalid {} arguments: {}", GENERATE_IMAGE, e)))
    }
}

/// Function result message for a finished batch.
pub fn image_result_message(all_succeeded: bool) -> &'static str {
    if all_succeeded {
        IMAGES_SUCCEEDED
    } else {
        IMAGES_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_schema() {
        let def = generate_image_definition();
        assert_eq!(def.name, "generate_image");
        let props = &def.parameters["properties"];
        assert_eq!(props["descriptions"]["items"]["type"], "string");
        assert_eq!(props["aspect_ratio"]["default"], "square");
        assert_eq!(props["aspect_ratio"]["enum"].as_array().unwrap().len(), 4);
        assert_eq!(def.parameters["required"][1], "aspect_ratio");
    }

    #[test]
    fn test_parse_args() {
        let args = ImageToolArgs::parse(&json!({
            "descriptions": ["a red fox", "a blue whale"],
            "aspect_ratio": "portrait"
        }))
        .unwrap();
        assert_eq!(args.descriptions.len(), 2);
        assert_eq!(args.aspect_ratio, AspectRatio::Portrait);

        let defaulted = ImageToolArgs::parse(&json!({"descriptions": ["x"]})).unwrap();
        assert_eq!(defaulted.aspect_ratio, AspectRatio::Square);
    }

    #[test]
    fn test_parse_rejects_bad_args() {
        assert!(ImageToolArgs::parse(&json!({"aspect_ratio": "square"})).is_err());
        let tall = json!({"descriptions": ["x"], "aspect_ratio": "tall"});
        assert!(ImageToolArgs::parse(&tall).is_err());
    }

    #[test]
    fn test_result_messages() {
        assert_eq!(image_result_message(true), "Successfully generated all images.");
        assert_eq!(
            image_result_message(false),
            "Failed to generate at least one image, sorry for that."
        );
    }
}
