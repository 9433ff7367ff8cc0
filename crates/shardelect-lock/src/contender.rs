//! Parsing of prefix snapshots into contenders, holder and weights

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shardelect_consul::KvEntry;

/// Name of the lock key under the prefix.
pub const LOCK_KEY: &str = "lock";

/// JSON value of a contender key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContenderValue {
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub info: Value,
}

/// JSON value of the lock key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockValue {
    pub holder: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub info: Value,
}

/// Everything the lock derives from one snapshot of its prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefixSnapshot {
    /// Weight advertised by each live contender, keyed by session id.
    pub contender_weights: HashMap<String, f64>,
    /// Holder named by the lock key, iff it is itself a live contender.
    pub holder: Option<String>,
    /// Highest advertised weight, or 0 with no contenders.
    pub max_weight: f64,
    /// ModifyIndex of the lock key, 0 when absent. CAS precondition for the
    /// next acquisition attempt.
    pub lock_modify_index: u64,
}

impl PrefixSnapshot {
    /// Whether `session` may take the lock from the current holder.
    ///
    /// A contender is eligible when it carries the maximum weight and the
    /// holder, if any, advertises strictly less. An incumbent of equal
    /// weight keeps the lock.
    pub fn eligible(&self, session: &str) -> bool {
        let Some(own) = self.contender_weights.get(session) else {
            return false;
        };
        if *own < self.max_weight {
            return false;
        }
        match &self.holder {
            None => true,
            Some(holder) => self
                .contender_weights
                .get(holder)
                .is_some_and(|weight| *weight < self.max_weight),
        }
    }
}

/// Parse one prefix snapshot. Pure: the same entries always produce the same
/// snapshot.
///
/// Contender entries must sit directly under the prefix, carry a UUID as
/// their last path segment, be acquired by the session of the same id, and
/// hold a JSON value with a numeric `weight`; anything else is skipped. A
/// lock key naming a holder that is not a live contender counts as unheld.
pub fn parse_entries(prefix: &str, entries: &[KvEntry]) -> PrefixSnapshot {
    let mut contender_weights = HashMap::new();
    let mut lock_holder: Option<String> = None;
    let mut lock_modify_index = 0;

    for entry in entries {
        let Some(name) = entry
            .key
            .strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches('/'))
        else {
            continue;
        };

        if name == LOCK_KEY {
            lock_modify_index = entry.modify_index;
            lock_holder = entry
                .raw_value()
                .and_then(|bytes| serde_json::from_slice::<LockValue>(&bytes).ok())
                .map(|value| value.holder);
            continue;
        }

        if Uuid::parse_str(name).is_err() {
            continue;
        }
        if entry.session.as_deref() != Some(name) {
            continue;
        }
        let Some(value) = entry
            .raw_value()
            .and_then(|bytes| serde_json::from_slice::<ContenderValue>(&bytes).ok())
        else {
            continue;
        };
        contender_weights.insert(name.to_string(), value.weight);
    }

    let max_weight = if contender_weights.is_empty() {
        0.0
    } else {
        contender_weights
            .values()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    };
    let holder = lock_holder.filter(|holder| contender_weights.contains_key(holder));

    PrefixSnapshot {
        contender_weights,
        holder,
        max_weight,
        lock_modify_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PREFIX: &str = "cluster/wlock";
    const SESSION_A: &str = "11111111-1111-1111-1111-111111111111";
    const SESSION_B: &str = "22222222-2222-2222-2222-222222222222";

    fn entry(key: &str, modify_index: u64, value: &Value, session: Option<&str>) -> KvEntry {
        KvEntry {
            key: key.to_string(),
            create_index: 1,
            modify_index,
            lock_index: 0,
            flags: 0,
            value: Some(KvEntry::encode_value(value.to_string().as_bytes())),
            session: session.map(|s| s.to_string()),
        }
    }

    fn contender(session: &str, weight: f64) -> KvEntry {
        entry(
            &format!("{PREFIX}/{session}"),
            2,
            &json!({"weight": weight}),
            Some(session),
        )
    }

    fn lock(holder: &str, modify_index: u64) -> KvEntry {
        entry(
            &format!("{PREFIX}/lock"),
            modify_index,
            &json!({"holder": holder}),
            None,
        )
    }

    #[test]
    fn test_collects_contenders_and_holder() {
        let entries = vec![contender(SESSION_A, 10.0), contender(SESSION_B, 20.0), lock(SESSION_A, 9)];
        let snapshot = parse_entries(PREFIX, &entries);

        assert_eq!(snapshot.contender_weights.len(), 2);
        assert_eq!(snapshot.contender_weights[SESSION_A], 10.0);
        assert_eq!(snapshot.contender_weights[SESSION_B], 20.0);
        assert_eq!(snapshot.holder.as_deref(), Some(SESSION_A));
        assert_eq!(snapshot.max_weight, 20.0);
        assert_eq!(snapshot.lock_modify_index, 9);
    }

    #[test]
    fn test_parse_is_pure() {
        let entries = vec![contender(SESSION_A, 10.0), lock(SESSION_A, 4)];
        assert_eq!(parse_entries(PREFIX, &entries), parse_entries(PREFIX, &entries));
    }

    #[test]
    fn test_empty_prefix_snapshot() {
        let snapshot = parse_entries(PREFIX, &[]);
        assert!(snapshot.contender_weights.is_empty());
        assert_eq!(snapshot.holder, None);
        assert_eq!(snapshot.max_weight, 0.0);
        assert_eq!(snapshot.lock_modify_index, 0);
    }

    #[test]
    fn test_non_uuid_segment_is_ignored() {
        let entries = vec![entry(
            &format!("{PREFIX}/not-a-uuid"),
            2,
            &json!({"weight": 5.0}),
            Some("not-a-uuid"),
        )];
        assert!(parse_entries(PREFIX, &entries).contender_weights.is_empty());
    }

    #[test]
    fn test_session_mismatch_is_ignored() {
        let entries = vec![entry(
            &format!("{PREFIX}/{SESSION_A}"),
            2,
            &json!({"weight": 5.0}),
            Some(SESSION_B),
        )];
        assert!(parse_entries(PREFIX, &entries).contender_weights.is_empty());

        let unacquired = vec![entry(
            &format!("{PREFIX}/{SESSION_A}"),
            2,
            &json!({"weight": 5.0}),
            None,
        )];
        assert!(parse_entries(PREFIX, &unacquired).contender_weights.is_empty());
    }

    #[test]
    fn test_non_numeric_weight_disqualifies() {
        let entries = vec![
            entry(
                &format!("{PREFIX}/{SESSION_A}"),
                2,
                &json!({"weight": "heavy"}),
                Some(SESSION_A),
            ),
            entry(&format!("{PREFIX}/{SESSION_B}"), 2, &json!({}), Some(SESSION_B)),
        ];
        assert!(parse_entries(PREFIX, &entries).contender_weights.is_empty());
    }

    #[test]
    fn test_holder_must_be_live_contender() {
        let entries = vec![contender(SESSION_A, 10.0), lock(SESSION_B, 7)];
        let snapshot = parse_entries(PREFIX, &entries);
        assert_eq!(snapshot.holder, None);
        // The stale lock key still provides the CAS index.
        assert_eq!(snapshot.lock_modify_index, 7);
    }

    #[test]
    fn test_garbled_lock_value_is_unheld() {
        let mut bad = lock(SESSION_A, 3);
        bad.value = Some(KvEntry::encode_value(b"not json"));
        let snapshot = parse_entries(PREFIX, &[contender(SESSION_A, 1.0), bad]);
        assert_eq!(snapshot.holder, None);
        assert_eq!(snapshot.lock_modify_index, 3);
    }

    #[test]
    fn test_eligibility() {
        // No holder: the heaviest contender is eligible.
        let snapshot = parse_entries(PREFIX, &[contender(SESSION_A, 10.0), contender(SESSION_B, 20.0)]);
        assert!(!snapshot.eligible(SESSION_A));
        assert!(snapshot.eligible(SESSION_B));

        // Unknown session is never eligible.
        assert!(!snapshot.eligible("33333333-3333-3333-3333-333333333333"));
    }

    #[test]
    fn test_equal_weight_incumbent_keeps_lock() {
        let snapshot = parse_entries(
            PREFIX,
            &[contender(SESSION_A, 10.0), contender(SESSION_B, 10.0), lock(SESSION_A, 5)],
        );
        assert!(!snapshot.eligible(SESSION_B));
        // The incumbent itself stays "eligible" only in the trivial sense of
        // not being preemptable; it already holds the lock.
        assert!(!snapshot.eligible(SESSION_A));
    }

    #[test]
    fn test_heavier_contender_preempts_lighter_holder() {
        let snapshot = parse_entries(
            PREFIX,
            &[contender(SESSION_A, 10.0), contender(SESSION_B, 20.0), lock(SESSION_A, 5)],
        );
        assert!(snapshot.eligible(SESSION_B));
        assert!(!snapshot.eligible(SESSION_A));
    }

    #[test]
    fn test_contender_value_round_trip() {
        let value = ContenderValue {
            weight: 12.5,
            info: json!({"zone": "b"}),
        };
        let bytes = serde_json::to_vec(&value).unwrap();
        let decoded: ContenderValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, value);

        let bare: ContenderValue = serde_json::from_str(r#"{"weight": 3}"#).unwrap();
        assert_eq!(bare.weight, 3.0);
        assert_eq!(bare.info, Value::Null);
    }

    #[test]
    fn test_lock_value_round_trip() {
        let value = LockValue {
            holder: SESSION_A.to_string(),
            info: Value::Null,
        };
        let bytes = serde_json::to_vec(&value).unwrap();
        assert_eq!(String::from_utf8_lossy(&bytes), format!(r#"{{"holder":"{SESSION_A}"}}"#));
        let decoded: LockValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
