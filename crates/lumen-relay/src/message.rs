use lumen_core::{Event, EventId};
use serde_json::{json, Value};

use crate::{Filter, RelayError};

/// Frames sent client → relay.
#[derive(Clone, Debug)]
pub enum ClientMessage {
    Req { sub_id: String, filter: Filter },
    Event(Event),
    Close { sub_id: String },
}

impl ClientMessage {
    /// Serialize to the array-framed wire form.
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Req { sub_id, filter } => {
                json!(["REQ", sub_id, filter]).to_string()
            }
            ClientMessage::Event(event) => json!(["EVENT", event]).to_string(),
            ClientMessage::Close { sub_id } => json!(["CLOSE", sub_id]).to_string(),
        }
    }
}

/// Frames received relay → client.
#[derive(Clone, Debug)]
pub enum RelayMessage {
    Event { sub_id: String, event: Event },
    Eose { sub_id: String },
    Ok {
        event_id: EventId,
        accepted: bool,
        message: String,
    },
    Notice(String),
    Closed { sub_id: String, message: String },
}

impl RelayMessage {
    /// Parse an array-framed relay message.
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("bad frame json: {e}")))?;
        let arr = value
            .as_array()
            .ok_or_else(|| RelayError::Protocol("frame is not an array".into()))?;
        let kind = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol("missing frame type".into()))?;

        let str_at = |i: usize| -> Result<String, RelayError> {
            arr.get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RelayError::Protocol(format!("{kind}: missing element {i}")))
        };

        match kind {
            "EVENT" => {
                let sub_id = str_at(1)?;
                let event: Event = serde_json::from_value(
                    arr.get(2)
                        .cloned()
                        .ok_or_else(|| RelayError::Protocol("EVENT: missing event".into()))?,
                )
                .map_err(|e| RelayError::Protocol(format!("EVENT: bad event: {e}")))?;
                Ok(RelayMessage::Event { sub_id, event })
            }
            "EOSE" => Ok(RelayMessage::Eose { sub_id: str_at(1)? }),
            "OK" => {
                let event_id = EventId::from_hex(&str_at(1)?)
                    .map_err(|e| RelayError::Protocol(format!("OK: bad event id: {e}")))?;
                let accepted = arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| RelayError::Protocol("OK: missing accepted flag".into()))?;
                let message = arr
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "NOTICE" => Ok(RelayMessage::Notice(str_at(1)?)),
            "CLOSED" => Ok(RelayMessage::Closed {
                sub_id: str_at(1)?,
                message: arr
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            other => Err(RelayError::Protocol(format!("unknown frame type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::Pubkey;

    fn sample_event() -> Event {
        Event {
            id: EventId::from_bytes([7u8; 32]),
            pubkey: Pubkey::from_bytes([2u8; 32]),
            created_at: 1_700_000_000,
            kind: 23194,
            tags: vec![vec!["p".to_string(), "ab".repeat(32)]],
            content: "ct?iv=aXY=".to_string(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn req_frame_shape() {
        let frame = ClientMessage::Req {
            sub_id: "lumen-1".to_string(),
            filter: Filter::new().kind(23194),
        }
        .to_json();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v[0], "REQ");
        assert_eq!(v[1], "lumen-1");
        assert_eq!(v[2]["kinds"][0], 23194);
    }

    #[test]
    fn event_frame_round_trip() {
        let ev = sample_event();
        let publish = ClientMessage::Event(ev.clone()).to_json();
        let v: Value = serde_json::from_str(&publish).unwrap();
        assert_eq!(v[0], "EVENT");

        // Same event delivered back inside a subscription frame.
        let delivered = json!(["EVENT", "sub", v[1]]).to_string();
        match RelayMessage::from_json(&delivered).unwrap() {
            RelayMessage::Event { sub_id, event } => {
                assert_eq!(sub_id, "sub");
                assert_eq!(event, ev);
            }
            other => panic!("expected EVENT, got {other:?}"),
        }
    }

    #[test]
    fn ok_frame_parses() {
        let id = EventId::from_bytes([7u8; 32]);
        let frame = json!(["OK", id.to_hex(), true, ""]).to_string();
        match RelayMessage::from_json(&frame).unwrap() {
            RelayMessage::Ok {
                event_id, accepted, ..
            } => {
                assert_eq!(event_id, id);
                assert!(accepted);
            }
            other => panic!("expected OK, got {other:?}"),
        }
    }

    #[test]
    fn eose_and_rejects() {
        assert!(matches!(
            RelayMessage::from_json(r#"["EOSE","sub"]"#).unwrap(),
            RelayMessage::Eose { .. }
        ));
        assert!(RelayMessage::from_json("not json").is_err());
        assert!(RelayMessage::from_json(r#"{"type":"EVENT"}"#).is_err());
        assert!(RelayMessage::from_json(r#"["AUTH","x"]"#).is_err());
    }
}
