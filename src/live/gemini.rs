//! Gemini Live over WebSocket.
//!
//! The socket is split after the setup handshake: a writer task drains the
//! session's outbound queue in order and sends a close frame when the
//! session is closed, and a reader task turns server frames into
//! [`InboundMessage`]s. Frames that do not parse are logged and dropped.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::transport::{InboundMessage, OutboundMessage, Transport, TransportSession};
use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::tools::declarations::tool_declarations;
use crate::tools::ToolCall;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const INBOUND_CAPACITY: usize = 64;

/// Opens sessions against the Gemini Live bidirectional endpoint.
#[derive(Debug, Default)]
pub struct GeminiLiveTransport;

impl Transport for GeminiLiveTransport {
    fn connect<'a>(
        &'a self,
        config: &'a LiveConfig,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<TransportSession, LiveError>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, open_socket(config)).await {
                Ok(socket) => Ok(start_session(socket?, config.output_sample_rate, outbound)),
                Err(_) => Err(LiveError::Transport("timed out waiting for session setup".into())),
            }
        })
    }
}

fn transport_err(context: &str, e: impl std::fmt::Display) -> LiveError {
    LiveError::Transport(format!("{context}: {e}"))
}

/// Connect, send `setup`, and wait for `setupComplete`.
async fn open_socket(config: &LiveConfig) -> Result<Socket, LiveError> {
    let key = config.api_key().ok_or(LiveError::MissingApiKey)?;

    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| transport_err("invalid endpoint", e))?;
    let key = HeaderValue::from_str(key).map_err(|e| transport_err("invalid API key", e))?;
    request.headers_mut().insert("x-goog-api-key", key);

    info!(model = %config.model, "Connecting to Gemini Live");
    let (mut socket, _response) = connect_async(request)
        .await
        .map_err(|e| transport_err("connection failed", e))?;

    socket
        .send(Message::Text(setup_message(config).to_string()))
        .await
        .map_err(|e| transport_err("failed to send setup", e))?;

    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|e| transport_err("handshake failed", e))?;
        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(close) => {
                let reason = close.map(|c| c.reason.to_string()).unwrap_or_default();
                return Err(LiveError::Transport(format!("server closed during setup: {reason}")));
            }
            _ => continue,
        };
        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(message) if message.setup_complete.is_some() => {
                info!("Gemini Live setup complete");
                return Ok(socket);
            }
            Ok(_) => debug!("Ignoring frame before setupComplete"),
            Err(e) => warn!(error = %e, "Unparseable frame during setup"),
        }
    }
    Err(LiveError::Transport("connection ended during setup".into()))
}

fn start_session(
    socket: Socket,
    default_rate: u32,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
) -> TransportSession {
    let (sink, stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (close_tx, close_rx) = oneshot::channel::<()>();

    // The writer is left to finish on its own so it can send the close frame.
    tokio::spawn(write_loop(sink, outbound, close_rx));
    let reader = tokio::spawn(read_loop(stream, inbound_tx, default_rate));

    TransportSession::new(
        inbound_rx,
        move || {
            let _ = close_tx.send(());
        },
        vec![reader],
    )
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    mut close: oneshot::Receiver<()>,
) {
    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut close => break,
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let frame = Message::Text(encode_outbound(&message).to_string());
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "Outbound send failed, writer stopping");
                    return;
                }
                sent += 1;
            }
        }
    }
    debug!(sent, "Writer closing socket");
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    inbound: mpsc::Sender<InboundMessage>,
    default_rate: u32,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(close)) => {
                let reason = close
                    .map(|c| c.reason.to_string())
                    .filter(|r| !r.is_empty());
                let _ = inbound.send(InboundMessage::Closed { reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = inbound.send(InboundMessage::Error(e.to_string())).await;
                return;
            }
        };

        let messages = match parse_server_message(&text, default_rate) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable server frame");
                continue;
            }
        };
        for message in messages {
            if inbound.send(message).await.is_err() {
                return;
            }
        }
    }
    let _ = inbound.send(InboundMessage::Closed { reason: None }).await;
}

/// The first frame of every session.
fn setup_message(config: &LiveConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                }
            },
            "systemInstruction": { "parts": [{ "text": config.system_instruction }] },
            "tools": [{ "functionDeclarations": tool_declarations() }]
        }
    })
}

fn encode_outbound(message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::RealtimeAudio { mime_type, data } => json!({
            "realtimeInput": {
                "mediaChunks": [{ "mimeType": mime_type, "data": data }]
            }
        }),
        OutboundMessage::ToolResponse(result) => json!({
            "toolResponse": { "functionResponses": [result] }
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallBatch>,
    tool_call_cancellation: Option<ToolCallCancellation>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    interrupted: bool,
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ToolCallBatch {
    function_calls: Vec<ToolCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ToolCallCancellation {
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoAway {
    time_left: Option<Value>,
}

/// Turn one server frame into zero or more inbound messages.
///
/// An interruption is reported before any audio carried in the same frame.
fn parse_server_message(text: &str, default_rate: u32) -> Result<Vec<InboundMessage>, serde_json::Error> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut out = Vec::new();

    if let Some(content) = message.server_content {
        if content.interrupted {
            out.push(InboundMessage::Interrupted);
        }
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for inline in parts.into_iter().filter_map(|p| p.inline_data) {
            if !inline.mime_type.starts_with("audio/") {
                debug!(mime = %inline.mime_type, "Skipping non-audio part");
                continue;
            }
            out.push(InboundMessage::Audio {
                sample_rate: sample_rate_of(&inline.mime_type).unwrap_or(default_rate),
                channels: 1,
                data: inline.data,
            });
        }
        if content.turn_complete {
            out.push(InboundMessage::TurnComplete);
        }
    }
    if let Some(batch) = message.tool_call {
        if !batch.function_calls.is_empty() {
            out.push(InboundMessage::ToolCalls(batch.function_calls));
        }
    }
    if let Some(cancel) = message.tool_call_cancellation {
        out.push(InboundMessage::ToolCallCancellation(cancel.ids));
    }
    if let Some(go_away) = message.go_away {
        out.push(InboundMessage::GoAway {
            time_left: go_away.time_left,
        });
    }
    Ok(out)
}

/// `rate=` parameter of a PCM mime type such as `audio/pcm;rate=24000`.
fn sample_rate_of(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|rate| *rate > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    #[test]
    fn test_sample_rate_from_mime() {
        assert_eq!(sample_rate_of("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(sample_rate_of("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(sample_rate_of("audio/pcm"), None);
        assert_eq!(sample_rate_of("audio/pcm;rate=fast"), None);
        assert_eq!(sample_rate_of("audio/pcm;rate=0"), None);
    }

    #[test]
    fn test_parse_audio_and_turn_complete() {
        let frame = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
            {"text":"hi"},
            {"inlineData":{"mimeType":"audio/pcm","data":"AQA="}}
        ]},"turnComplete":true}}"#;
        let messages = parse_server_message(frame, 22_050).unwrap();
        assert_eq!(
            messages,
            vec![
                InboundMessage::Audio {
                    data: "AAA=".into(),
                    sample_rate: 24_000,
                    channels: 1
                },
                InboundMessage::Audio {
                    data: "AQA=".into(),
                    sample_rate: 22_050,
                    channels: 1
                },
                InboundMessage::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_interrupted_first() {
        let frame = r#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#;
        let messages = parse_server_message(frame, 24_000).unwrap();
        assert_eq!(messages[0], InboundMessage::Interrupted);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_parse_tool_call() {
        let frame = r#"{"toolCall":{"functionCalls":[
            {"id":"fc-1","name":"changeColor","args":{"color":"gold"}},
            {"id":"fc-2","name":"getSystemInfo"}
        ]}}"#;
        let messages = parse_server_message(frame, 24_000).unwrap();
        match &messages[..] {
            [InboundMessage::ToolCalls(calls)] => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "fc-1");
                assert_eq!(calls[0].args["color"], "gold");
                assert!(calls[1].args.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_cancellation_and_go_away() {
        let messages =
            parse_server_message(r#"{"toolCallCancellation":{"ids":["a","b"]}}"#, 24_000).unwrap();
        assert_eq!(
            messages,
            vec![InboundMessage::ToolCallCancellation(vec!["a".into(), "b".into()])]
        );
        let messages = parse_server_message(r#"{"goAway":{"timeLeft":"10s"}}"#, 24_000).unwrap();
        assert_eq!(
            messages,
            vec![InboundMessage::GoAway {
                time_left: Some(json!("10s"))
            }]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_server_message("not json", 24_000).is_err());
        assert!(parse_server_message(r#"{"setupComplete":{}}"#, 24_000)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_setup_message_shape() {
        let config = LiveConfig {
            model: "gemini-live-test".into(),
            voice_name: "Puck".into(),
            ..LiveConfig::default()
        };
        let setup = setup_message(&config);
        assert_eq!(setup["setup"]["model"], "models/gemini-live-test");
        assert_eq!(setup["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert!(setup["setup"]["systemInstruction"]["parts"][0]["text"].is_string());
        assert_eq!(setup["setup"]["tools"][0]["functionDeclarations"], tool_declarations());
    }

    #[test]
    fn test_outbound_encoding() {
        let audio = encode_outbound(&OutboundMessage::RealtimeAudio {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAA=".into(),
        });
        assert_eq!(
            audio,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAA="}]}})
        );

        let result = ToolResult {
            id: "fc-1".into(),
            name: "writeText".into(),
            response: json!({"result": "ok"}),
        };
        let response = encode_outbound(&OutboundMessage::ToolResponse(result));
        assert_eq!(
            response,
            json!({"toolResponse": {"functionResponses": [{"id": "fc-1", "name": "writeText", "response": {"result": "ok"}}]}})
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let config = LiveConfig::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let result = GeminiLiveTransport.connect(&config, rx).await;
        assert!(matches!(result, Err(LiveError::MissingApiKey)));
    }
}
