use serde::{Deserialize, Serialize};

use crate::types::{EventId, Pubkey, Timestamp};

/// A signed relay event, exactly as carried on the wire.
///
/// `id` is sha256 over the canonical serialization (see [`Event::canonical`]),
/// `sig` is a 64-byte Schnorr signature over `id`, lowercase hex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: Pubkey,
    pub created_at: Timestamp,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Canonical serialization whose sha256 is the event id:
    /// compact JSON of `[0, pubkey_hex, created_at, kind, tags, content]`.
    pub fn canonical(
        pubkey: &Pubkey,
        created_at: Timestamp,
        kind: u32,
        tags: &[Vec<String>],
        content: &str,
    ) -> String {
        serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]).to_string()
    }

    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_compact_json() {
        let pk = Pubkey::from_bytes([2u8; 32]);
        let tags = vec![vec!["p".to_string(), "ab".to_string()]];
        let c = Event::canonical(&pk, 1700000000, 23194, &tags, "hello");
        assert_eq!(
            c,
            format!(r#"[0,"{}",1700000000,23194,[["p","ab"]],"hello"]"#, pk.to_hex())
        );
    }

    #[test]
    fn tag_value_finds_first_match() {
        let ev = Event {
            id: EventId::from_bytes([0u8; 32]),
            pubkey: Pubkey::from_bytes([2u8; 32]),
            created_at: 0,
            kind: 23194,
            tags: vec![
                vec!["e".to_string(), "first".to_string()],
                vec!["e".to_string(), "second".to_string()],
            ],
            content: String::new(),
            sig: String::new(),
        };
        assert_eq!(ev.tag_value("e"), Some("first"));
        assert_eq!(ev.tag_value("d"), None);
    }

    #[test]
    fn wire_round_trip() {
        let ev = Event {
            id: EventId::from_bytes([7u8; 32]),
            pubkey: Pubkey::from_bytes([2u8; 32]),
            created_at: 1700000000,
            kind: 23195,
            tags: vec![vec!["p".to_string(), "cafe".to_string()]],
            content: "ct?iv=aXY=".to_string(),
            sig: "00".repeat(64),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
