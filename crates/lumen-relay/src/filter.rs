use serde::{Deserialize, Serialize};

use lumen_core::{Pubkey, Timestamp};

/// Subscription filter. The service subscribes to request-kind events
/// tagged with its own pubkey, from the last consumed timestamp onward.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub kinds: Vec<u32>,
    #[serde(rename = "#p", skip_serializing_if = "Vec::is_empty", default)]
    pub p_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub since: Option<Timestamp>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn p_tag(mut self, pubkey: &Pubkey) -> Self {
        self.p_tags.push(pubkey.to_hex());
        self
    }

    pub fn since(mut self, ts: Timestamp) -> Self {
        self.since = Some(ts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::constants::REQUEST_KIND;

    #[test]
    fn serializes_with_tag_key() {
        let pk = Pubkey::from_bytes([1u8; 32]);
        let f = Filter::new().kind(REQUEST_KIND).p_tag(&pk).since(1000);
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["kinds"][0], 23194);
        assert_eq!(v["#p"][0], pk.to_hex());
        assert_eq!(v["since"], 1000);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let v = serde_json::to_value(Filter::new().kind(1)).unwrap();
        assert!(v.get("#p").is_none());
        assert!(v.get("since").is_none());
    }
}
