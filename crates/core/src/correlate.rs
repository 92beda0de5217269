//! Correlator: joins work items with extracted payloads

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};

use crate::correlation::CorrelationId;
use crate::error::PipelineError;
use crate::item::WorkItem;
use crate::parser::ExtractedPayload;

/// Key every merged record serializes its id under.
pub const ID_KEY: &str = "correlation_id";

/// One output row: the work item's fields plus the payload's new keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

/// Result of a merge
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Merged records, in work-item order.
    pub records: Vec<MergedRecord>,
    /// Work items with no extracted payload.
    pub missing_ids: Vec<CorrelationId>,
    /// Payloads whose id matches no work item.
    pub unmatched_ids: Vec<CorrelationId>,
    /// Payload ids seen more than once; the first payload wins.
    pub duplicate_ids: Vec<CorrelationId>,
    /// Payload keys dropped because they clash with the item's own fields
    /// or with the id key.
    pub shadowed_keys: Vec<(CorrelationId, Vec<String>)>,
}

impl MergeOutcome {
    /// Correlation mismatches: unmatched plus duplicate payload ids.
    pub fn mismatches(&self) -> usize {
        self.unmatched_ids.len() + self.duplicate_ids.len()
    }
}

/// Join `items` with `payloads` by correlation id.
///
/// Only ids present on both sides produce a record; partial records are
/// never emitted. The item's fields win on key collision and a payload key
/// named [`ID_KEY`] is always dropped.
pub fn merge(items: &[WorkItem], payloads: Vec<ExtractedPayload>) -> MergeOutcome {
    let known: HashSet<&CorrelationId> = items.iter().map(|i| &i.correlation_id).collect();
    let mut outcome = MergeOutcome::default();
    let mut by_id: HashMap<CorrelationId, Map<String, JsonValue>> =
        HashMap::with_capacity(payloads.len());

    for payload in payloads {
        if !known.contains(&payload.correlation_id) {
            outcome.unmatched_ids.push(payload.correlation_id);
        } else if by_id.contains_key(&payload.correlation_id) {
            outcome.duplicate_ids.push(payload.correlation_id);
        } else {
            by_id.insert(payload.correlation_id, payload.fields);
        }
    }

    for item in items {
        match by_id.remove(&item.correlation_id) {
            Some(payload_fields) => {
                let mut fields = item.fields.clone();
                let mut shadowed = Vec::new();
                for (key, value) in payload_fields {
                    if key == ID_KEY || fields.contains_key(&key) {
                        shadowed.push(key);
                    } else {
                        fields.insert(key, value);
                    }
                }
                if !shadowed.is_empty() {
                    outcome
                        .shadowed_keys
                        .push((item.correlation_id.clone(), shadowed));
                }
                outcome.records.push(MergedRecord {
                    correlation_id: item.correlation_id.clone(),
                    fields,
                });
            }
            None => outcome.missing_ids.push(item.correlation_id.clone()),
        }
    }

    outcome
}

/// Records sharing one parent id, with each record's discriminators.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub parent: String,
    pub members: Vec<(Vec<String>, MergedRecord)>,
}

/// Regroup records with composite ids under their parent.
///
/// Every id must decompose into a parent and exactly `discriminators`
/// components. Groups keep the order in which parents first appear.
pub fn regroup(
    records: Vec<MergedRecord>,
    discriminators: usize,
) -> Result<Vec<Group>, PipelineError> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let composite = record.correlation_id.decompose(discriminators)?;
        let slot = *index.entry(composite.parent.clone()).or_insert_with(|| {
            groups.push(Group {
                parent: composite.parent.clone(),
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].members.push((composite.discriminators, record));
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str) -> WorkItem {
        let mut fields = Map::new();
        fields.insert("row_id".into(), json!(id));
        fields.insert("age".into(), json!(40));
        WorkItem::new(id, "prompt", fields)
    }

    fn payload(id: &str, text: &str) -> ExtractedPayload {
        let mut fields = Map::new();
        fields.insert("transcription".into(), json!(text));
        ExtractedPayload {
            correlation_id: CorrelationId::new(id),
            fields,
        }
    }

    #[test]
    fn merge_reports_missing_ids() {
        let items = vec![item("A"), item("B"), item("C")];
        let outcome = merge(&items, vec![payload("C", "c"), payload("A", "a")]);

        let ids: Vec<_> = outcome.records.iter().map(|r| r.correlation_id.as_str()).collect();
        assert_eq!(ids, ["A", "C"]);
        assert_eq!(outcome.missing_ids, [CorrelationId::new("B")]);
        assert_eq!(outcome.mismatches(), 0);
        assert_eq!(outcome.records[0].fields["transcription"], "a");
        assert_eq!(outcome.records[0].fields["age"], 40);
    }

    #[test]
    fn merge_reports_unmatched_and_duplicates() {
        let items = vec![item("A")];
        let outcome = merge(
            &items,
            vec![payload("A", "first"), payload("A", "second"), payload("Z", "z")],
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].fields["transcription"], "first");
        assert_eq!(outcome.unmatched_ids, [CorrelationId::new("Z")]);
        assert_eq!(outcome.duplicate_ids, [CorrelationId::new("A")]);
        assert_eq!(outcome.mismatches(), 2);
    }

    #[test]
    fn item_fields_win_on_collision() {
        let items = vec![item("A")];
        let mut p = payload("A", "t");
        p.fields.insert("age".into(), json!("unknown"));
        p.fields.insert(ID_KEY.into(), json!("bogus"));
        let outcome = merge(&items, vec![p]);

        let record = &outcome.records[0];
        assert_eq!(record.fields["age"], 40);
        assert_eq!(record.fields["transcription"], "t");
        assert!(!record.fields.contains_key(ID_KEY));
        assert_eq!(outcome.shadowed_keys.len(), 1);
        assert_eq!(outcome.shadowed_keys[0].1, ["age", ID_KEY]);

        let line = serde_json::to_string(record).unwrap();
        let back: MergedRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.correlation_id.as_str(), "A");
    }

    #[test]
    fn merged_record_serializes_flat() {
        let outcome = merge(&[item("A")], vec![payload("A", "t")]);
        let value = serde_json::to_value(&outcome.records[0]).unwrap();
        assert_eq!(value["correlation_id"], "A");
        assert_eq!(value["transcription"], "t");
    }

    #[test]
    fn regroup_collects_sections_per_parent() {
        let ids = ["row1:subjective", "row2:plan", "row1:plan"];
        let items: Vec<_> = ids.iter().map(|id| item(id)).collect();
        let payloads = ids.iter().map(|id| payload(id, id)).collect();
        let merged = merge(&items, payloads).records;

        let groups = regroup(merged, 1).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].parent, "row1");
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].members[1].0, ["plan"]);
        assert_eq!(groups[1].parent, "row2");
    }

    #[test]
    fn regroup_rejects_plain_ids() {
        let merged = merge(&[item("row1")], vec![payload("row1", "t")]).records;
        assert!(regroup(merged, 1).is_err());
    }
}
