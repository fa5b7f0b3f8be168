//! Tool calls from the agent and the dispatcher that answers them.
//!
//! The agent can only call the closed set in [`ToolName`]. Visual and music
//! tools turn into [`AppAction`]s for the host application; `getSystemInfo`
//! is the one tool that does further I/O. Every call gets exactly one
//! [`ToolResult`], whatever happens inside its handler.

pub mod declarations;
pub mod handlers;
pub mod system_info;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use system_info::SystemInfo;

pub use handlers::AppAction;

/// One invocation requested by the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The answer to one [`ToolCall`], tagged with its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ToolResult {
    fn new(call_id: String, name: String, result: impl Into<String>) -> Self {
        Self {
            id: call_id,
            name,
            response: json!({ "result": result.into() }),
        }
    }

    /// The human-readable `result` field of the payload.
    #[cfg(test)]
    pub fn result_text(&self) -> Option<&str> {
        self.response.get("result").and_then(Value::as_str)
    }
}

/// The closed set of tools the agent is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ChangeColor,
    ChangeShape,
    SetPreset,
    ControlMusic,
    ControlParticles,
    ControlPhysics,
    ControlView,
    ControlEffects,
    WriteText,
    GetSystemInfo,
}

impl ToolName {
    pub const ALL: [ToolName; 10] = [
        Self::ChangeColor,
        Self::ChangeShape,
        Self::SetPreset,
        Self::ControlMusic,
        Self::ControlParticles,
        Self::ControlPhysics,
        Self::ControlView,
        Self::ControlEffects,
        Self::WriteText,
        Self::GetSystemInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChangeColor => "changeColor",
            Self::ChangeShape => "changeShape",
            Self::SetPreset => "setPreset",
            Self::ControlMusic => "controlMusic",
            Self::ControlParticles => "controlParticles",
            Self::ControlPhysics => "controlPhysics",
            Self::ControlView => "controlView",
            Self::ControlEffects => "controlEffects",
            Self::WriteText => "writeText",
            Self::GetSystemInfo => "getSystemInfo",
        }
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Setters on the host application, applied one action at a time.
pub trait AppStateSink: Send + Sync {
    fn apply(&self, action: AppAction);
}

const SUCCESS: &str = "Action executed successfully";

/// Applies tool batches to application state and collects one result per call.
pub struct ToolDispatcher {
    app: Arc<dyn AppStateSink>,
    system_info: Arc<dyn SystemInfo>,
    lookup_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(
        app: Arc<dyn AppStateSink>,
        system_info: Arc<dyn SystemInfo>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            app,
            system_info,
            lookup_timeout,
        }
    }

    /// Run a batch. Calls proceed concurrently; results come back in batch order.
    pub async fn dispatch(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        info!(count = calls.len(), "Dispatching tool calls");
        join_all(calls.into_iter().map(|call| self.dispatch_one(call))).await
    }

    async fn dispatch_one(&self, call: ToolCall) -> ToolResult {
        let ToolCall { id, name, args } = call;
        let tool = match name.parse::<ToolName>() {
            Ok(tool) => tool,
            Err(_) => {
                warn!(tool = %name, "Unrecognized tool call");
                let message = format!("Unrecognized tool: {name}");
                return ToolResult::new(id, name, message);
            }
        };

        if tool == ToolName::GetSystemInfo {
            let report = system_info::describe_now(self.system_info.as_ref(), self.lookup_timeout).await;
            return ToolResult::new(id, name, report);
        }

        // Plan every action before applying any, so a bad argument leaves
        // the application untouched.
        match handlers::plan(tool, &args) {
            Ok(actions) => {
                debug!(tool = %tool, actions = actions.len(), "Applying tool call");
                for action in actions {
                    self.app.apply(action);
                }
                ToolResult::new(id, name, SUCCESS)
            }
            Err(e) => {
                warn!(tool = %tool, error = %e, "Tool call rejected");
                ToolResult::new(id, name, format!("Error: {e}"))
            }
        }
    }
}

/// Error payload for calls whose handler never reported back.
pub fn failed_result(call: &ToolCall, reason: &str) -> ToolResult {
    ToolResult::new(call.id.clone(), call.name.clone(), format!("Error: {reason}"))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::system_info::{LookupFailure, WeatherReport};
    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingApp {
        pub actions: Mutex<Vec<AppAction>>,
    }

    impl AppStateSink for RecordingApp {
        fn apply(&self, action: AppAction) {
            self.actions.lock().unwrap().push(action);
        }
    }

    pub(crate) struct StaticWeather(pub Result<WeatherReport, LookupFailure>);

    impl SystemInfo for StaticWeather {
        fn lookup(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<WeatherReport, LookupFailure>> + Send + '_>> {
            let result = self.0.clone();
            Box::pin(async move { result })
        }
    }

    /// Lookup that stays pending until released, and records when it is dropped.
    #[derive(Clone, Default)]
    pub(crate) struct HeldWeather {
        pub release: Arc<tokio::sync::Notify>,
        pub dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl SystemInfo for HeldWeather {
        fn lookup(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<WeatherReport, LookupFailure>> + Send + '_>> {
            let flag = DropFlag(Arc::clone(&self.dropped));
            Box::pin(async move {
                let _flag = flag;
                self.release.notified().await;
                Err(LookupFailure::Unavailable)
            })
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    fn dispatcher(app: Arc<RecordingApp>) -> ToolDispatcher {
        ToolDispatcher::new(
            app,
            Arc::new(StaticWeather(Err(LookupFailure::Unavailable))),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_tool_name_roundtrip() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>(), Ok(tool));
        }
        assert!("ChangeColor".parse::<ToolName>().is_err());
    }

    #[tokio::test]
    async fn test_known_and_unknown_tools_both_answered() {
        let app = Arc::new(RecordingApp::default());
        let results = dispatcher(Arc::clone(&app))
            .dispatch(vec![
                call("1", "changeColor", json!({"color": "#ff0000"})),
                call("2", "unknownTool", json!({})),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "1");
        assert_eq!(results[0].result_text(), Some(SUCCESS));
        assert_eq!(results[1].id, "2");
        assert_eq!(results[1].result_text(), Some("Unrecognized tool: unknownTool"));

        let actions = app.actions.lock().unwrap().clone();
        assert_eq!(
            actions,
            vec![
                AppAction::SetParticleColor { color: "#ff0000".into() },
                AppAction::SetUseImageColors { enabled: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_arguments_apply_nothing() {
        let app = Arc::new(RecordingApp::default());
        let results = dispatcher(Arc::clone(&app))
            .dispatch(vec![call(
                "7",
                "controlMusic",
                json!({"playing": true, "volume": "loud"}),
            )])
            .await;

        assert_eq!(results.len(), 1);
        let text = results[0].result_text().unwrap();
        assert!(text.starts_with("Error:"), "{text}");
        assert!(app.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_id_answered_in_mixed_batch() {
        let app = Arc::new(RecordingApp::default());
        let batch = vec![
            call("a", "setPreset", json!({"preset": "fire"})),
            call("b", "setPreset", json!({"preset": "lava"})),
            call("c", "getSystemInfo", json!({})),
            call("d", "writeText", json!({"text": "hello"})),
            call("e", "nope", json!({})),
        ];
        let results = dispatcher(app).dispatch(batch).await;

        let mut ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert!(results.iter().all(|r| r.result_text().is_some()));
    }

    #[tokio::test]
    async fn test_system_info_reports_failure_kind() {
        let app = Arc::new(RecordingApp::default());
        let results = dispatcher(app)
            .dispatch(vec![call("s", "getSystemInfo", json!({}))])
            .await;

        let payload: Value = serde_json::from_str(results[0].result_text().unwrap()).unwrap();
        assert!(payload["time"].is_string());
        assert!(payload["date"].is_string());
        assert_eq!(
            payload["weatherStatus"],
            LookupFailure::Unavailable.to_string()
        );
    }

    #[test]
    fn test_failed_result_keeps_id() {
        let c = call("9", "writeText", json!({}));
        let r = failed_result(&c, "handler crashed");
        assert_eq!(r.id, "9");
        assert_eq!(r.name, "writeText");
        assert_eq!(r.result_text(), Some("Error: handler crashed"));
    }
}
