//! WebSocket backend speaking the JSON realtime protocol
//!
//! Outbound audio goes through an unbounded queue drained by a writer
//! task, so `send` never blocks and frames leave in the order sent. A
//! reader task turns server messages into [`TransportEvent`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::codec::{from_base64, to_base64, EncodedPayload};
use crate::config::TransportConfig;
use crate::constants::PLAYBACK_SAMPLE_RATE;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, MediaChunk, RealtimeInput, ServerMessage, SetupMessage};
use crate::transport::{EventSender, TransportBackend, TransportChannel, TransportEvent};

enum Outbound {
    Audio(EncodedPayload),
    Close,
}

/// Realtime backend over a WebSocket
pub struct WebSocketBackend {
    config: TransportConfig,
}

impl WebSocketBackend {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Endpoint with the API key appended, if any
    fn url(&self) -> String {
        match &self.config.api_key {
            Some(key) => {
                let separator = if self.config.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.config.endpoint, separator, key)
            }
            None => self.config.endpoint.clone(),
        }
    }

    fn setup_message(&self) -> ClientMessage {
        ClientMessage::Setup(SetupMessage {
            model: self.config.model.clone(),
            response_modalities: vec!["AUDIO".to_string()],
            system_instruction: self.config.system_instruction.clone(),
        })
    }
}

#[async_trait]
impl TransportBackend for WebSocketBackend {
    async fn open(&self, events: EventSender) -> Result<Box<dyn TransportChannel>, TransportError> {
        tracing::info!("Connecting to {}", self.config.endpoint);
        let (ws, _response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let setup = serde_json::to_string(&self.setup_message())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    Outbound::Audio(payload) => {
                        let text = match audio_message(&payload) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!("Dropping outbound frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::warn!("WebSocket write failed: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = write.close().await;
            tracing::debug!("WebSocket writer finished");
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        for event in server_events(&text) {
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        // Raw PCM frames carry no mime; assume the playback rate
                        let payload = EncodedPayload::pcm(bytes.into(), PLAYBACK_SAMPLE_RATE);
                        if events.send(TransportEvent::Payload(payload)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = events.send(TransportEvent::Closed);
        });

        Ok(Box::new(WebSocketChannel {
            outbound: Some(out_tx),
        }))
    }
}

struct WebSocketChannel {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl TransportChannel for WebSocketChannel {
    fn send(&mut self, payload: EncodedPayload) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotOpen)?;
        outbound
            .send(Outbound::Audio(payload))
            .map_err(|_| TransportError::Backend("writer task has exited".to_string()))
    }

    fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close);
        }
    }
}

/// JSON text for one outbound audio frame
fn audio_message(payload: &EncodedPayload) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![MediaChunk {
            mime_type: payload.mime_type.clone(),
            data: to_base64(payload),
        }],
    }))
}

/// Translate one server text message into transport events.
///
/// An interrupt is emitted before any audio in the same message. Audio parts
/// that fail to decode are dropped.
pub fn server_events(text: &str) -> Vec<TransportEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Ignoring malformed server message: {}", e);
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(TransportEvent::Ready);
    }

    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(TransportEvent::Interrupted);
        }
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for chunk in parts.into_iter().filter_map(|part| part.inline_data) {
            if !chunk.mime_type.starts_with("audio/") {
                continue;
            }
            match from_base64(&chunk.data, &chunk.mime_type) {
                Ok(payload) => events.push(TransportEvent::Payload(payload)),
                Err(e) => tracing::warn!("Dropping inbound audio: {}", e),
            }
        }
        if content.turn_complete {
            tracing::debug!("Model turn complete");
        }
    }

    if let Some(error) = message.error {
        events.push(TransportEvent::Error(error.message));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_setup_complete_is_ready() {
        assert_eq!(server_events(r#"{"setupComplete": {}}"#), vec![TransportEvent::Ready]);
    }

    #[test]
    fn test_audio_parts_become_payloads() {
        let events = server_events(
            r#"{"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAD/fw=="}},
                {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "%%%"}}
            ]}}}"#,
        );

        assert_eq!(
            events,
            vec![TransportEvent::Payload(EncodedPayload::new(
                Bytes::from_static(&[0x00, 0x00, 0xFF, 0x7F]),
                "audio/pcm;rate=24000"
            ))]
        );
    }

    #[test]
    fn test_interrupt_precedes_audio() {
        let events = server_events(
            r#"{"serverContent": {"interrupted": true, "modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm", "data": "AAA="}}
            ]}}}"#,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TransportEvent::Interrupted);
        assert!(matches!(events[1], TransportEvent::Payload(_)));
    }

    #[test]
    fn test_error_and_garbage() {
        assert_eq!(
            server_events(r#"{"error": {"code": 429, "message": "quota exceeded"}}"#),
            vec![TransportEvent::Error("quota exceeded".to_string())]
        );
        assert!(server_events("not json").is_empty());
        assert!(server_events(r#"{"usageMetadata": {}}"#).is_empty());
    }

    #[test]
    fn test_audio_message_framing() {
        let payload = EncodedPayload::pcm(Bytes::from_static(&[0x00, 0x00, 0xFF, 0x7F]), 16_000);
        let value: serde_json::Value = serde_json::from_str(&audio_message(&payload).unwrap()).unwrap();
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["data"], "AAD/fw==");
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn test_url_carries_key() {
        let mut config = TransportConfig::default();
        config.endpoint = "wss://example.invalid/live?v=1".to_string();
        config.api_key = Some("secret".to_string());
        assert_eq!(WebSocketBackend::new(config).url(), "wss://example.invalid/live?v=1&key=secret");
    }

    #[test]
    fn test_channel_close_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = WebSocketChannel { outbound: Some(tx) };
        channel.close();
        channel.close();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());
        assert!(channel
            .send(EncodedPayload::pcm(Bytes::new(), 16_000))
            .is_err());
    }
}
