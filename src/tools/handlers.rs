//! Tool argument validation and the application actions each tool produces.
//!
//! Arguments are validated and clamped here, not by the transport. A call
//! either yields its full list of actions or an error and no actions.

use serde::Serialize;
use serde_json::{Map, Value};

use super::ToolName;

/// One setter on the host application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppAction {
    SetParticleColor { color: String },
    SetUseImageColors { enabled: bool },
    SetShape { shape: Shape },
    SetText { text: String },
    SetSceneVisible { visible: bool },
    SetPreset { preset: Preset },
    SetPlaying { playing: bool },
    /// 0.0 ..= 1.0
    SetVolume { volume: f64 },
    SetParticleCount { count: u32 },
    SetParticleSize { size: f64 },
    SetModelDensity { density: f64 },
    SetRepulsionStrength { strength: f64 },
    SetRepulsionRadius { radius: f64 },
    SetBackgroundMode { mode: String },
    SetUiHidden { hidden: bool },
    SetAutoRotate { enabled: bool },
    StartScreensaver,
    SetBloom { enabled: bool },
    SetTrails { enabled: bool },
    SetLyricParticles { enabled: bool },
    SetDepthIntensity { depth: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Sphere,
    Cube,
    Prism,
    Star,
    Spiky,
}

impl Shape {
    pub const NAMES: [&'static str; 5] = ["sphere", "cube", "prism", "star", "spiky"];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sphere" => Some(Self::Sphere),
            "cube" => Some(Self::Cube),
            "prism" => Some(Self::Prism),
            "star" => Some(Self::Star),
            "spiky" => Some(Self::Spiky),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    None,
    Fire,
    Water,
    Electric,
    Mercury,
    Disco,
}

impl Preset {
    pub const NAMES: [&'static str; 6] = ["none", "fire", "water", "electric", "mercury", "disco"];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "fire" => Some(Self::Fire),
            "water" => Some(Self::Water),
            "electric" => Some(Self::Electric),
            "mercury" => Some(Self::Mercury),
            "disco" => Some(Self::Disco),
            _ => None,
        }
    }
}

pub const PARTICLE_COUNT_RANGE: (f64, f64) = (20_000.0, 60_000.0);
pub const PARTICLE_SIZE_RANGE: (f64, f64) = (1.0, 50.0);
pub const PERCENT_RANGE: (f64, f64) = (0.0, 100.0);

/// Why a call's arguments were rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("missing required argument '{0}'")]
    Missing(&'static str),
    #[error("argument '{key}' must be {expected}")]
    WrongType { key: &'static str, expected: &'static str },
    #[error("'{value}' is not a valid {key}; expected one of {allowed}")]
    NotAllowed {
        key: &'static str,
        value: String,
        allowed: String,
    },
}

/// Turn one call into the actions it stands for. Nothing is applied here.
pub fn plan(tool: ToolName, args: &Map<String, Value>) -> Result<Vec<AppAction>, ArgError> {
    let mut actions = Vec::new();
    match tool {
        ToolName::ChangeColor => {
            let color = required_str(args, "color")?;
            actions.push(AppAction::SetParticleColor { color });
            actions.push(AppAction::SetUseImageColors { enabled: false });
        }
        ToolName::ChangeShape => {
            let raw = required_str(args, "shape")?;
            let shape = Shape::parse(&raw.to_lowercase())
                .ok_or_else(|| not_allowed("shape", raw, &Shape::NAMES))?;
            actions.push(AppAction::SetShape { shape });
            actions.push(AppAction::SetText { text: String::new() });
            actions.push(AppAction::SetSceneVisible { visible: true });
        }
        ToolName::SetPreset => {
            let raw = required_str(args, "preset")?;
            let preset = Preset::parse(&raw.to_lowercase())
                .ok_or_else(|| not_allowed("preset", raw, &Preset::NAMES))?;
            actions.push(AppAction::SetPreset { preset });
        }
        ToolName::ControlMusic => {
            if let Some(playing) = optional_bool(args, "playing")? {
                actions.push(AppAction::SetPlaying { playing });
            }
            if let Some(volume) = optional_number(args, "volume")? {
                actions.push(AppAction::SetVolume {
                    volume: clamp(volume, PERCENT_RANGE) / 100.0,
                });
            }
        }
        ToolName::ControlParticles => {
            if let Some(count) = optional_number(args, "count")? {
                let count = clamp(count, PARTICLE_COUNT_RANGE).round() as u32;
                actions.push(AppAction::SetParticleCount { count });
            }
            if let Some(size) = optional_number(args, "size")? {
                actions.push(AppAction::SetParticleSize {
                    size: clamp(size, PARTICLE_SIZE_RANGE),
                });
            }
            if let Some(density) = optional_number(args, "density")? {
                actions.push(AppAction::SetModelDensity {
                    density: clamp(density, PERCENT_RANGE),
                });
            }
        }
        ToolName::ControlPhysics => {
            if let Some(strength) = optional_number(args, "strength")? {
                actions.push(AppAction::SetRepulsionStrength {
                    strength: clamp(strength, PERCENT_RANGE),
                });
            }
            if let Some(radius) = optional_number(args, "radius")? {
                actions.push(AppAction::SetRepulsionRadius {
                    radius: clamp(radius, PERCENT_RANGE),
                });
            }
        }
        ToolName::ControlView => {
            if let Some(mode) = optional_str(args, "bgMode")? {
                actions.push(AppAction::SetBackgroundMode { mode });
            }
            if let Some(hidden) = optional_bool(args, "uiHidden")? {
                actions.push(AppAction::SetUiHidden { hidden });
            }
            if let Some(enabled) = optional_bool(args, "autoRotate")? {
                actions.push(AppAction::SetAutoRotate { enabled });
            }
            // Only switching the screensaver on is a tool action.
            if optional_bool(args, "screensaver")? == Some(true) {
                actions.push(AppAction::StartScreensaver);
            }
        }
        ToolName::ControlEffects => {
            if let Some(enabled) = optional_bool(args, "bloom")? {
                actions.push(AppAction::SetBloom { enabled });
            }
            if let Some(enabled) = optional_bool(args, "trails")? {
                actions.push(AppAction::SetTrails { enabled });
            }
            if let Some(enabled) = optional_bool(args, "lyrics3D")? {
                actions.push(AppAction::SetLyricParticles { enabled });
            }
            if let Some(depth) = optional_number(args, "depth")? {
                actions.push(AppAction::SetDepthIntensity {
                    depth: clamp(depth, PERCENT_RANGE),
                });
            }
        }
        ToolName::WriteText => {
            let text = required_str(args, "text")?;
            actions.push(AppAction::SetText { text });
            actions.push(AppAction::SetSceneVisible { visible: true });
        }
        // Answered by the dispatcher itself; it has no application effect.
        ToolName::GetSystemInfo => {}
    }
    Ok(actions)
}

fn clamp(value: f64, (lo, hi): (f64, f64)) -> f64 {
    value.clamp(lo, hi)
}

fn not_allowed(key: &'static str, value: String, allowed: &[&str]) -> ArgError {
    ArgError::NotAllowed {
        key,
        value,
        allowed: allowed.join(", "),
    }
}

fn present<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    args.get(key).filter(|v| !v.is_null())
}

fn required_str(args: &Map<String, Value>, key: &'static str) -> Result<String, ArgError> {
    let value = optional_str(args, key)?.ok_or(ArgError::Missing(key))?;
    if value.trim().is_empty() {
        return Err(ArgError::Missing(key));
    }
    Ok(value)
}

fn optional_str(args: &Map<String, Value>, key: &'static str) -> Result<Option<String>, ArgError> {
    match present(args, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ArgError::WrongType {
            key,
            expected: "a string",
        }),
    }
}

fn optional_bool(args: &Map<String, Value>, key: &'static str) -> Result<Option<bool>, ArgError> {
    match present(args, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ArgError::WrongType {
            key,
            expected: "a boolean",
        }),
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn optional_number(args: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, ArgError> {
    let wrong = ArgError::WrongType {
        key,
        expected: "a finite number",
    };
    let number = match present(args, key) {
        None => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(wrong),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_particle_clamps() {
        let actions = plan(
            ToolName::ControlParticles,
            &args(json!({"count": 5, "size": 400, "density": -3})),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![
                AppAction::SetParticleCount { count: 20_000 },
                AppAction::SetParticleSize { size: 50.0 },
                AppAction::SetModelDensity { density: 0.0 },
            ]
        );

        let actions = plan(ToolName::ControlParticles, &args(json!({"count": 99_999}))).unwrap();
        assert_eq!(actions, vec![AppAction::SetParticleCount { count: 60_000 }]);
    }

    #[test]
    fn test_volume_scaled_after_clamp() {
        let actions = plan(
            ToolName::ControlMusic,
            &args(json!({"playing": false, "volume": 150})),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![
                AppAction::SetPlaying { playing: false },
                AppAction::SetVolume { volume: 1.0 },
            ]
        );
        let actions = plan(ToolName::ControlMusic, &args(json!({"volume": "40"}))).unwrap();
        assert_eq!(actions, vec![AppAction::SetVolume { volume: 0.4 }]);
    }

    #[test]
    fn test_physics_strength_clamped() {
        let actions = plan(
            ToolName::ControlPhysics,
            &args(json!({"strength": 250, "radius": 30})),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![
                AppAction::SetRepulsionStrength { strength: 100.0 },
                AppAction::SetRepulsionRadius { radius: 30.0 },
            ]
        );
    }

    #[test]
    fn test_shape_resets_text_and_shows_scene() {
        let actions = plan(ToolName::ChangeShape, &args(json!({"shape": "Star"}))).unwrap();
        assert_eq!(
            actions,
            vec![
                AppAction::SetShape { shape: Shape::Star },
                AppAction::SetText { text: String::new() },
                AppAction::SetSceneVisible { visible: true },
            ]
        );
    }

    #[test]
    fn test_rejects_unknown_enum_value() {
        let err = plan(ToolName::SetPreset, &args(json!({"preset": "lava"}))).unwrap_err();
        assert!(matches!(err, ArgError::NotAllowed { key: "preset", .. }));
        assert!(err.to_string().contains("disco"));
    }

    #[test]
    fn test_required_arguments() {
        assert_eq!(
            plan(ToolName::WriteText, &args(json!({}))),
            Err(ArgError::Missing("text"))
        );
        assert_eq!(
            plan(ToolName::ChangeColor, &args(json!({"color": "  "}))),
            Err(ArgError::Missing("color"))
        );
        assert!(matches!(
            plan(ToolName::ChangeColor, &args(json!({"color": 12}))),
            Err(ArgError::WrongType { key: "color", .. })
        ));
    }

    #[test]
    fn test_view_screensaver_only_turns_on() {
        let actions = plan(
            ToolName::ControlView,
            &args(json!({"bgMode": "image", "uiHidden": true, "screensaver": false})),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![
                AppAction::SetBackgroundMode { mode: "image".into() },
                AppAction::SetUiHidden { hidden: true },
            ]
        );
        let actions = plan(ToolName::ControlView, &args(json!({"screensaver": true}))).unwrap();
        assert_eq!(actions, vec![AppAction::StartScreensaver]);
    }

    #[test]
    fn test_effects_null_fields_ignored() {
        let actions = plan(
            ToolName::ControlEffects,
            &args(json!({"bloom": true, "trails": null, "lyrics3D": false, "depth": 120})),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![
                AppAction::SetBloom { enabled: true },
                AppAction::SetLyricParticles { enabled: false },
                AppAction::SetDepthIntensity { depth: 100.0 },
            ]
        );
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_value(AppAction::SetShape { shape: Shape::Cube }).unwrap();
        assert_eq!(json, json!({"type": "set_shape", "shape": "cube"}));
        let json = serde_json::to_value(AppAction::StartScreensaver).unwrap();
        assert_eq!(json, json!({"type": "start_screensaver"}));
    }
}
