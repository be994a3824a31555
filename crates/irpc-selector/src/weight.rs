//! The smooth weighted round-robin engine shared by `WeightedRoundRobin`
//! and `WeightedICMP` (§4.6), plus the ICMP weight table.

use std::collections::HashMap;

struct Entry {
    weight: i64,
    current_weight: i64,
    effective_weight: i64,
}

/// Nginx-style smooth weighted selection: each pick adds every endpoint's
/// `effective_weight` to its `current_weight`, returns the endpoint with
/// the largest `current_weight`, and subtracts the round's total from it.
/// This spreads picks out instead of bursting through one high-weight
/// endpoint before moving to the next.
pub(crate) struct SmoothWeighted {
    entries: HashMap<String, Entry>,
}

impl SmoothWeighted {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub(crate) fn set_weights(&mut self, weights: HashMap<String, i64>) {
        self.entries.retain(|key, _| weights.contains_key(key));
        for (key, weight) in weights {
            self.entries
                .entry(key)
                .and_modify(|e| e.weight = weight)
                .or_insert(Entry {
                    weight,
                    current_weight: 0,
                    effective_weight: weight,
                });
        }
    }

    pub(crate) fn pick(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let mut total = 0i64;
        let mut best_key: Option<String> = None;
        let mut best_weight = i64::MIN;
        for (key, entry) in self.entries.iter_mut() {
            entry.current_weight += entry.effective_weight;
            total += entry.effective_weight;
            if entry.current_weight > best_weight {
                best_weight = entry.current_weight;
                best_key = Some(key.clone());
            }
        }
        if let Some(key) = &best_key {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.current_weight -= total;
            }
        }
        best_key
    }

    /// `EffectiveWeight` decays on failure and climbs back toward `Weight`
    /// on success, per §4.6's "converges back toward Weight" note. Not part
    /// of the bare `Selector` trait (§4.6 only names `Select`/
    /// `UpdateServer`) — exposed as an inherent method the xClient calls
    /// when it learns a call to an endpoint succeeded or failed.
    pub(crate) fn note_result(&mut self, key: &str, success: bool) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if success {
            if entry.effective_weight < entry.weight {
                entry.effective_weight += 1;
            }
        } else {
            entry.effective_weight -= entry.weight / 10 + 1;
            if entry.effective_weight < 0 {
                entry.effective_weight = 0;
            }
        }
    }
}

/// ICMP round-trip-time → weight table (§4.6). The third clause's bounds
/// are carried over verbatim from the documented likely-bug (§9 Open
/// Questions): `100 < t < 1000` overlaps the second clause's `t ≤ 200`
/// rather than starting past it at `200 < t < 1000`. Because match arms
/// are checked in order, the overlap is silently unreachable for
/// `100 < t ≤ 200` (the second arm wins first) — left exactly as specified
/// rather than corrected to `200 < t < 1000`.
pub fn calculate_weight(rtt_ms: i64) -> i64 {
    if rtt_ms <= 10 {
        191
    } else if rtt_ms <= 200 {
        201 - rtt_ms
    } else if rtt_ms > 100 && rtt_ms < 1000 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values_match_the_documented_table() {
        assert_eq!(calculate_weight(0), 191);
        assert_eq!(calculate_weight(10), 191);
        assert_eq!(calculate_weight(11), 190);
        assert_eq!(calculate_weight(200), 1);
        assert_eq!(calculate_weight(1000), 0);
        assert_eq!(calculate_weight(5000), 0);
    }

    #[test]
    fn overlapping_clause_is_pinned_as_documented_not_silently_fixed() {
        // 150 falls in both the second clause's domain (10 < t <= 200) and
        // the third's as literally written (100 < t < 1000); the second
        // arm wins because it's checked first.
        assert_eq!(calculate_weight(150), 51);
    }

    #[test]
    fn smooth_weighted_picks_converge_to_weight_ratio() {
        let mut engine = SmoothWeighted::new();
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 5);
        weights.insert("b".to_string(), 1);
        engine.set_weights(weights);

        let mut counts = HashMap::new();
        for _ in 0..60 {
            let key = engine.pick().unwrap();
            *counts.entry(key).or_insert(0) += 1;
        }
        let a = *counts.get("a").unwrap_or(&0);
        let b = *counts.get("b").unwrap_or(&0);
        assert_eq!(a + b, 60);
        // a:b should be roughly 5:1 over a full cycle.
        assert!(a > b * 3, "expected a to dominate b, got a={a} b={b}");
    }

    #[test]
    fn failure_decays_effective_weight_then_recovers_on_success() {
        let mut engine = SmoothWeighted::new();
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 10);
        engine.set_weights(weights);

        engine.note_result("a", false);
        engine.note_result("a", false);
        // Several successes should climb effective_weight back toward 10.
        for _ in 0..20 {
            engine.note_result("a", true);
        }
        // Picking still returns the only endpoint regardless; this test
        // only exercises that note_result doesn't panic or starve it.
        assert_eq!(engine.pick(), Some("a".to_string()));
    }
}
