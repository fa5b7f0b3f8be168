//! Function declarations sent to the agent at session setup.

use serde_json::{json, Value};

use super::handlers::{Preset, Shape};
use super::ToolName;

fn describe(tool: ToolName) -> &'static str {
    match tool {
        ToolName::ChangeColor => "Change the color of the particles. Use hex codes or color names.",
        ToolName::ChangeShape => "Change the 3D shape.",
        ToolName::SetPreset => "Apply a visual preset.",
        ToolName::ControlMusic => "Control music playback. Volume is 0-100.",
        ToolName::ControlParticles => "Configure particles.",
        ToolName::ControlPhysics => "Control physics.",
        ToolName::ControlView => "Control view.",
        ToolName::ControlEffects => "Toggle effects.",
        ToolName::WriteText => "Write text.",
        ToolName::GetSystemInfo => {
            "Get current date, time, location and weather conditions. \
             USE THIS if user asks for time or date."
        }
    }
}

fn parameters(tool: ToolName) -> Value {
    match tool {
        ToolName::ChangeColor => json!({
            "type": "OBJECT",
            "properties": {
                "color": {
                    "type": "STRING",
                    "description": "The color to set (e.g., #ff0000, blue, gold)"
                }
            },
            "required": ["color"]
        }),
        ToolName::ChangeShape => json!({
            "type": "OBJECT",
            "properties": { "shape": { "type": "STRING", "enum": Shape::NAMES } },
            "required": ["shape"]
        }),
        ToolName::SetPreset => json!({
            "type": "OBJECT",
            "properties": { "preset": { "type": "STRING", "enum": Preset::NAMES } },
            "required": ["preset"]
        }),
        ToolName::ControlMusic => json!({
            "type": "OBJECT",
            "properties": {
                "playing": { "type": "BOOLEAN" },
                "volume": { "type": "NUMBER" }
            }
        }),
        ToolName::ControlParticles => json!({
            "type": "OBJECT",
            "properties": {
                "count": { "type": "NUMBER" },
                "size": { "type": "NUMBER" },
                "density": { "type": "NUMBER" }
            }
        }),
        ToolName::ControlPhysics => json!({
            "type": "OBJECT",
            "properties": {
                "strength": { "type": "NUMBER" },
                "radius": { "type": "NUMBER" }
            }
        }),
        ToolName::ControlView => json!({
            "type": "OBJECT",
            "properties": {
                "bgMode": { "type": "STRING" },
                "uiHidden": { "type": "BOOLEAN" },
                "autoRotate": { "type": "BOOLEAN" },
                "screensaver": { "type": "BOOLEAN" }
            }
        }),
        ToolName::ControlEffects => json!({
            "type": "OBJECT",
            "properties": {
                "bloom": { "type": "BOOLEAN" },
                "trails": { "type": "BOOLEAN" },
                "depth": { "type": "NUMBER" },
                "lyrics3D": { "type": "BOOLEAN" }
            }
        }),
        ToolName::WriteText => json!({
            "type": "OBJECT",
            "properties": { "text": { "type": "STRING" } },
            "required": ["text"]
        }),
        ToolName::GetSystemInfo => json!({ "type": "OBJECT", "properties": {} }),
    }
}

/// The `functionDeclarations` array for every tool in [`ToolName::ALL`].
pub fn tool_declarations() -> Value {
    Value::Array(
        ToolName::ALL
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.as_str(),
                    "description": describe(tool),
                    "parameters": parameters(tool),
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_declaration_per_tool() {
        let decls = tool_declarations();
        let decls = decls.as_array().unwrap();
        assert_eq!(decls.len(), ToolName::ALL.len());
        for (decl, tool) in decls.iter().zip(ToolName::ALL) {
            assert_eq!(decl["name"], tool.as_str());
            assert_eq!(decl["parameters"]["type"], "OBJECT");
        }
    }

    #[test]
    fn test_enums_match_handlers() {
        let decls = tool_declarations();
        let shape = &decls[1]["parameters"]["properties"]["shape"]["enum"];
        assert_eq!(shape.as_array().unwrap().len(), Shape::NAMES.len());
        let preset = &decls[2]["parameters"]["properties"]["preset"]["enum"];
        assert_eq!(preset[5], "disco");
    }
}
