//! Stakeholder survey relevance merge.
//!
//! Survey aggregation runs outside the engine and periodically produces a
//! per-issue relevance map. Folding it into the canonical records must not
//! disturb selection state in any way; this module is a pure list-in,
//! list-out transform.

use std::collections::BTreeMap;

use tracing::warn;

use crate::model::{IssueId, MaterialityIssue, RelevanceScore};

/// Replace every record's `stakeholder_relevance` from `relevance_by_id`.
///
/// The map is authoritative: records absent from it have their prior value
/// cleared. Values clamp into [0, 100]; non-finite values are dropped with
/// a warning and treated as absent. No other field changes, `is_material`
/// included.
#[must_use]
pub fn merge_relevance(
    canonical: &[MaterialityIssue],
    relevance_by_id: &BTreeMap<IssueId, f64>,
) -> Vec<MaterialityIssue> {
    canonical
        .iter()
        .map(|issue| {
            let mut record = issue.clone();
            record.stakeholder_relevance = relevance_by_id
                .get(&issue.id)
                .and_then(|raw| match RelevanceScore::new(*raw) {
                    Ok(score) => Some(score.value()),
                    Err(err) => {
                        warn!(id = %issue.id, "dropping stakeholder relevance: {err}");
                        None
                    }
                });
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::merge_relevance;
    use crate::model::{IssueId, MaterialityIssue};
    use std::collections::BTreeMap;

    fn issue(id: &str, material: bool) -> MaterialityIssue {
        MaterialityIssue {
            id: IssueId::new(id),
            name: id.to_uppercase(),
            description: format!("{id} description"),
            impact_relevance: 80.0,
            financial_relevance: 60.0,
            is_material: material,
            ..MaterialityIssue::default()
        }
    }

    fn relevance(pairs: &[(&str, f64)]) -> BTreeMap<IssueId, f64> {
        pairs
            .iter()
            .map(|(id, value)| (IssueId::new(*id), *value))
            .collect()
    }

    #[test]
    fn sets_relevance_and_nothing_else() {
        let canonical = vec![issue("a", true)];
        let merged = merge_relevance(&canonical, &relevance(&[("a", 42.0)]));

        assert_eq!(merged[0].stakeholder_relevance, Some(42.0));
        assert!(merged[0].is_material);
        assert_eq!(merged[0].impact_relevance, 80.0);
        assert_eq!(merged[0].financial_relevance, 60.0);
        assert_eq!(merged[0].name, canonical[0].name);
    }

    #[test]
    fn absent_ids_are_cleared() {
        let mut seeded = issue("a", false);
        seeded.stakeholder_relevance = Some(77.0);

        let merged = merge_relevance(&[seeded], &relevance(&[]));
        assert_eq!(merged[0].stakeholder_relevance, None);
    }

    #[test]
    fn values_clamp_into_range() {
        let canonical = vec![issue("a", false), issue("b", false)];
        let merged = merge_relevance(&canonical, &relevance(&[("a", 150.0), ("b", -10.0)]));

        assert_eq!(merged[0].stakeholder_relevance, Some(100.0));
        assert_eq!(merged[1].stakeholder_relevance, Some(0.0));
    }

    #[test]
    fn non_finite_values_count_as_absent() {
        let canonical = vec![issue("a", false)];
        let merged = merge_relevance(&canonical, &relevance(&[("a", f64::NAN)]));
        assert_eq!(merged[0].stakeholder_relevance, None);
    }

    #[test]
    fn input_list_is_untouched() {
        let canonical = vec![issue("a", true)];
        let before = canonical.clone();
        let _ = merge_relevance(&canonical, &relevance(&[("a", 1.0)]));
        assert_eq!(canonical, before);
    }

    #[test]
    fn preserves_order_and_length() {
        let canonical = vec![issue("c", false), issue("a", true), issue("b", false)];
        let merged = merge_relevance(&canonical, &relevance(&[("a", 5.0)]));

        assert_eq!(merged.len(), 3);
        let order: Vec<&str> = merged.iter().map(|issue| issue.id.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }
}
