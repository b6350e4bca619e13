//! Token selection policy
//!
//! A pure function over the pool snapshot: filter to available tokens,
//! keep the top weight tier, and round-robin over the rotation
//! sequence among equals. Weight expresses sticky preference (a token
//! degraded by pro failures is dispreferred until it recovers), the
//! rotation order gives operators a stable dispatch pattern.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::record::TokenRecord;

/// Result of one selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    /// The id of the token to hand out.
    Token(String),
    /// Nothing can be handed out right now. `earliest` is the soonest
    /// future cooldown deadline among enabled tokens, when one exists,
    /// so callers can tell their clients when to retry.
    Exhausted { earliest: Option<DateTime<Utc>> },
}

/// Pick the next token and return the committed rotation cursor.
///
/// The cursor only advances when a round-robin choice was made between
/// equal-weight tokens; a unique top-tier winner leaves it in place.
pub(crate) fn pick(
    records: &HashMap<String, TokenRecord>,
    rotation: &[String],
    cursor: usize,
    now: DateTime<Utc>,
) -> (Selection, usize) {
    let available: Vec<&TokenRecord> = rotation
        .iter()
        .filter_map(|id| records.get(id))
        .filter(|record| record.is_available(now))
        .collect();

    if available.is_empty() {
        let earliest = records
            .values()
            .filter(|record| record.enabled)
            .filter_map(|record| record.available_after)
            .filter(|after| *after > now)
            .min();
        return (Selection::Exhausted { earliest }, cursor);
    }

    let top = available
        .iter()
        .map(|record| record.weight)
        .max()
        .unwrap_or_default();
    let tier: Vec<&str> = available
        .iter()
        .filter(|record| record.weight == top)
        .map(|record| record.id.as_str())
        .collect();

    if let [only] = tier.as_slice() {
        return (Selection::Token((*only).to_string()), cursor);
    }

    // Walk the rotation sequence from the cursor until we hit a
    // top-tier token, then commit the cursor one past it.
    let len = rotation.len();
    for step in 0..len {
        let pos = (cursor + step) % len;
        let id = rotation[pos].as_str();
        if tier.contains(&id) {
            return (Selection::Token(id.to_string()), (pos + 1) % len);
        }
    }

    // Unreachable: every tier member came from the rotation sequence.
    (Selection::Exhausted { earliest: None }, cursor)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::FakeClient;
    use super::super::record::DEFAULT_WEIGHT;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
    }

    fn build(ids: &[&str]) -> (HashMap<String, TokenRecord>, Vec<String>) {
        let mut records = HashMap::new();
        let mut rotation = Vec::new();
        for id in ids {
            records.insert(
                id.to_string(),
                TokenRecord::new(id.to_string(), FakeClient::online(), true),
            );
            rotation.push(id.to_string());
        }
        (records, rotation)
    }

    #[test]
    fn test_empty_pool_yields_no_earliest() {
        let (records, rotation) = build(&[]);
        let (selection, cursor) = pick(&records, &rotation, 0, t(0));
        assert_eq!(selection, Selection::Exhausted { earliest: None });
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_cooldown_pool_reports_earliest_deadline() {
        let (mut records, rotation) = build(&["a", "b"]);
        if let Some(r) = records.get_mut("a") {
            r.mark_failure(t(0));
        }
        if let Some(r) = records.get_mut("b") {
            r.mark_failure(t(0));
            r.mark_failure(t(1));
        }

        let (selection, _) = pick(&records, &rotation, 0, t(2));
        // a cools for 60s from t=0, b for 120s from t=1.
        assert_eq!(
            selection,
            Selection::Exhausted {
                earliest: Some(t(0) + Duration::seconds(60)),
            }
        );
    }

    #[test]
    fn test_disabled_only_pool_has_no_advisory_deadline() {
        let (mut records, rotation) = build(&["a"]);
        if let Some(r) = records.get_mut("a") {
            r.enabled = false;
        }

        let (selection, _) = pick(&records, &rotation, 0, t(0));
        assert_eq!(selection, Selection::Exhausted { earliest: None });
    }

    #[test]
    fn test_never_selects_disabled_or_cooling_tokens() {
        let (mut records, rotation) = build(&["a", "b", "c"]);
        if let Some(r) = records.get_mut("a") {
            r.enabled = false;
        }
        if let Some(r) = records.get_mut("b") {
            r.mark_failure(t(0));
        }

        for cursor in 0..3 {
            let (selection, _) = pick(&records, &rotation, cursor, t(1));
            assert_eq!(selection, Selection::Token("c".to_string()));
        }
    }

    #[test]
    fn test_unique_top_tier_skips_rotation() {
        let (mut records, rotation) = build(&["a", "b"]);
        if let Some(r) = records.get_mut("a") {
            r.mark_pro_failure();
        }

        // b alone holds the top weight; the cursor must not move.
        let (selection, cursor) = pick(&records, &rotation, 0, t(0));
        assert_eq!(selection, Selection::Token("b".to_string()));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_round_robin_among_equal_weights() {
        let (records, rotation) = build(&["a", "b", "c"]);
        assert!(records.values().all(|r| r.weight == DEFAULT_WEIGHT));

        let mut cursor = 0;
        let mut picked = Vec::new();
        for _ in 0..6 {
            let (selection, next) = pick(&records, &rotation, cursor, t(0));
            cursor = next;
            match selection {
                Selection::Token(id) => picked.push(id),
                other => panic!("unexpected selection: {other:?}"),
            }
        }
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_rotation_skips_lower_tier_members() {
        let (mut records, rotation) = build(&["a", "b", "c"]);
        if let Some(r) = records.get_mut("b") {
            r.mark_pro_failure();
        }

        let mut cursor = 0;
        let mut picked = Vec::new();
        for _ in 0..4 {
            let (selection, next) = pick(&records, &rotation, cursor, t(0));
            cursor = next;
            match selection {
                Selection::Token(id) => picked.push(id),
                other => panic!("unexpected selection: {other:?}"),
            }
        }
        assert_eq!(picked, vec!["a", "c", "a", "c"]);
    }

    #[test]
    fn test_stale_cursor_wraps_after_removal() {
        let (records, rotation) = build(&["a", "b"]);
        // A cursor beyond the rotation length (left over from a larger
        // pool) still lands on a valid member.
        let (selection, cursor) = pick(&records, &rotation, 5, t(0));
        assert_eq!(selection, Selection::Token("b".to_string()));
        assert_eq!(cursor, 0);
    }
}
