//! Wire encoding for `instance-state` notification payloads.
//!
//! Format (version 1): `<tag>:<comma-joined-ids>` where `<tag>` is
//! `ready` or `unready`. NOTIFY payloads have a server-side size ceiling,
//! so the encoder splits id lists beyond a configured cap into multiple
//! payloads; each batch decodes independently, so listeners need no
//! reassembly.

use crate::error::RelayError;

/// Readiness transition carried by an `instance-state` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// The listed instances became ready.
    Ready,
    /// The listed instances became unready.
    Unready,
}

impl StateTransition {
    /// Returns the wire tag for this transition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Unready => "unready",
        }
    }
}

impl std::fmt::Display for StateTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded (or to-be-encoded) `instance-state` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatePayload {
    /// The readiness transition.
    pub transition: StateTransition,
    /// Affected instance ids, in the order they were written.
    pub ids: Vec<String>,
}

impl InstanceStatePayload {
    /// Builds a payload for `transition` over `ids`.
    #[must_use]
    pub fn new(transition: StateTransition, ids: &[String]) -> Self {
        Self {
            transition,
            ids: ids.to_vec(),
        }
    }

    /// Encodes into one or more wire payloads, at most `ids_per_payload`
    /// ids each. A cap of zero is treated as one.
    #[must_use]
    pub fn encode_batched(&self, ids_per_payload: usize) -> Vec<String> {
        let cap = ids_per_payload.max(1);
        self.ids
            .chunks(cap)
            .map(|chunk| format!("{}:{}", self.transition, chunk.join(",")))
            .collect()
    }

    /// Parses one wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] on a missing separator, unknown
    /// tag, or empty id list.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let (tag, id_part) = raw
            .split_once(':')
            .ok_or_else(|| RelayError::Validation(format!("malformed state payload: {raw}")))?;

        let transition = match tag {
            "ready" => StateTransition::Ready,
            "unready" => StateTransition::Unready,
            other => {
                return Err(RelayError::Validation(format!(
                    "unknown state transition tag: {other}"
                )));
            }
        };

        let ids: Vec<String> = id_part
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(RelayError::Validation(format!(
                "state payload carries no ids: {raw}"
            )));
        }

        Ok(Self { transition, ids })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn encodes_single_batch() {
        let payload = InstanceStatePayload::new(StateTransition::Ready, &ids(&["i1", "i2"]));
        assert_eq!(payload.encode_batched(64), vec!["ready:i1,i2".to_string()]);
    }

    #[test]
    fn splits_ids_beyond_cap() {
        let payload = InstanceStatePayload::new(
            StateTransition::Unready,
            &ids(&["a", "b", "c", "d", "e", "f", "g"]),
        );
        let encoded = payload.encode_batched(3);
        assert_eq!(
            encoded,
            vec![
                "unready:a,b,c".to_string(),
                "unready:d,e,f".to_string(),
                "unready:g".to_string(),
            ]
        );
    }

    #[test]
    fn zero_cap_still_emits_payloads() {
        let payload = InstanceStatePayload::new(StateTransition::Ready, &ids(&["x", "y"]));
        assert_eq!(payload.encode_batched(0).len(), 2);
    }

    #[test]
    fn parse_round_trips_each_batch() {
        let payload = InstanceStatePayload::new(StateTransition::Ready, &ids(&["i1", "i2", "i3"]));
        for encoded in payload.encode_batched(2) {
            let parsed = InstanceStatePayload::parse(&encoded).unwrap();
            assert_eq!(parsed.transition, StateTransition::Ready);
            assert!(!parsed.ids.is_empty());
        }
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(InstanceStatePayload::parse("ready").is_err());
    }

    #[test]
    fn parse_rejects_unknown_tag() {
        assert!(InstanceStatePayload::parse("draining:i1").is_err());
    }

    #[test]
    fn parse_rejects_empty_id_list() {
        assert!(InstanceStatePayload::parse("ready:").is_err());
    }
}
