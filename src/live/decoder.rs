use tracing::{debug, warn};

use super::events::ServerEvent;
use super::messages::ServerMessage;
use crate::audio::codec;
use crate::error::{VoiceError, VoiceResult};

/// Decode one inbound frame into zero or more events, in delivery order
///
/// Within a `serverContent` message: an interruption is reported alone;
/// otherwise every inline PCM part becomes an `AudioChunk` (in part order),
/// the remaining parts become one `ContentChunk` (omitted when empty) and
/// `TurnComplete` comes last.
pub fn decode(payload: &[u8]) -> VoiceResult<Vec<ServerEvent>> {
    let message: ServerMessage = serde_json::from_slice(payload)
        .map_err(|e| VoiceError::ProtocolAnomaly(format!("malformed message: {}", e)))?;

    if message.setup_complete.is_some() {
        return Ok(vec![ServerEvent::SetupComplete]);
    }

    if let Some(tool_call) = message.tool_call {
        return Ok(vec![ServerEvent::ToolCall(tool_call)]);
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        return Ok(vec![ServerEvent::ToolCallCancellation(cancellation.ids)]);
    }

    if let Some(content) = message.server_content {
        if content.interrupted.unwrap_or(false) {
            return Ok(vec![ServerEvent::Interrupted]);
        }

        let mut events = Vec::new();

        if let Some(turn) = content.model_turn {
            let mut rest = Vec::new();

            for part in turn.parts {
                if !part.is_pcm_audio() {
                    rest.push(part);
                    continue;
                }

                let data = part.inline_data.map(|blob| blob.data).unwrap_or_default();
                match codec::decode_base64(&data) {
                    Ok(pcm) => events.push(ServerEvent::AudioChunk(pcm)),
                    Err(e) => warn!("Skipping undecodable audio part: {:#}", e),
                }
            }

            if !rest.is_empty() {
                events.push(ServerEvent::ContentChunk(rest));
            }
        }

        if content.turn_complete.unwrap_or(false) {
            events.push(ServerEvent::TurnComplete);
        }

        if events.is_empty() && content.generation_complete.is_none() {
            return Err(VoiceError::ProtocolAnomaly(
                "serverContent without turn, completion or interruption".to_string(),
            ));
        }

        return Ok(events);
    }

    // Known messages that carry nothing for subscribers
    if message.usage_metadata.is_some() || message.go_away.is_some() {
        debug!("Ignoring informational server message");
        return Ok(Vec::new());
    }

    Err(VoiceError::ProtocolAnomaly(format!(
        "unmatched message: {}",
        String::from_utf8_lossy(payload)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_json(value: serde_json::Value) -> VoiceResult<Vec<ServerEvent>> {
        decode(value.to_string().as_bytes())
    }

    #[test]
    fn test_setup_complete() {
        let events = decode_json(json!({ "setupComplete": {} })).unwrap();
        assert_eq!(events, vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn test_audio_parts_then_content_then_turn_complete() {
        let events = decode_json(json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } },
                    { "text": "hi" },
                    { "inlineData": { "mimeType": "audio/pcm", "data": "AgA=" } }
                ]},
                "turnComplete": true
            }
        }))
        .unwrap();

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ServerEvent::AudioChunk(vec![1, 0]));
        assert_eq!(events[1], ServerEvent::AudioChunk(vec![2, 0]));
        match &events[2] {
            ServerEvent::ContentChunk(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].text.as_deref(), Some("hi"));
            }
            other => panic!("expected content chunk, got {:?}", other),
        }
        assert_eq!(events[3], ServerEvent::TurnComplete);
    }

    #[test]
    fn test_bad_audio_part_is_skipped() {
        let events = decode_json(json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "not base64!" } },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AgA=" } }
                ]},
                "turnComplete": true
            }
        }))
        .unwrap();

        assert_eq!(
            events,
            vec![
                ServerEvent::AudioChunk(vec![1, 0]),
                ServerEvent::AudioChunk(vec![2, 0]),
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_audio_only_turn_has_no_content_chunk() {
        let events = decode_json(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } }
            ]}}
        }))
        .unwrap();

        assert_eq!(events, vec![ServerEvent::AudioChunk(vec![1, 0])]);
    }

    #[test]
    fn test_interrupted_reported_alone() {
        let events = decode_json(json!({
            "serverContent": { "interrupted": true, "turnComplete": true }
        }))
        .unwrap();

        assert_eq!(events, vec![ServerEvent::Interrupted]);
    }

    #[test]
    fn test_tool_call_cancellation() {
        let events = decode_json(json!({ "toolCallCancellation": { "ids": ["a", "b"] } })).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::ToolCallCancellation(vec!["a".into(), "b".into()])]
        );
    }

    #[test]
    fn test_unmatched_message_is_anomaly() {
        let err = decode_json(json!({ "somethingElse": 1 })).unwrap_err();
        assert!(matches!(err, VoiceError::ProtocolAnomaly(_)));

        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, VoiceError::ProtocolAnomaly(_)));
    }
}
