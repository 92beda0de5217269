//! Work items and the request builder

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

use crate::correlation::CorrelationId;
use crate::error::PipelineError;

/// One locally generated request: its correlation id, the rendered
/// instruction sent to the model, and the facts merged into the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub correlation_id: CorrelationId,
    pub payload: String,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl WorkItem {
    pub fn new(
        correlation_id: impl Into<CorrelationId>,
        payload: impl Into<String>,
        fields: Map<String, JsonValue>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: payload.into(),
            fields,
        }
    }
}

/// Build exactly `count` work items by calling `make` with each index.
///
/// Fails if the generator fails or produces a duplicate correlation id.
pub fn build_items<F>(count: usize, mut make: F) -> Result<Vec<WorkItem>, PipelineError>
where
    F: FnMut(usize) -> Result<WorkItem, PipelineError>,
{
    let mut items = Vec::with_capacity(count);
    for index in 0..count {
        items.push(make(index)?);
    }
    ensure_unique(&items)?;
    Ok(items)
}

/// Reject a collection containing the same correlation id twice.
pub fn ensure_unique(items: &[WorkItem]) -> Result<(), PipelineError> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(&item.correlation_id) {
            return Err(PipelineError::Validation(format!(
                "duplicate correlation id '{}'",
                item.correlation_id
            )));
        }
    }
    Ok(())
}

/// Composite ids for every combination of the discriminator axes, in
/// row-major order.
///
/// `fan_out("row1", &[&["s", "o"], &["simple", "bullets"]])` yields
/// `row1:s:simple`, `row1:s:bullets`, `row1:o:simple`, `row1:o:bullets`.
pub fn fan_out(parent: &str, axes: &[&[&str]]) -> Result<Vec<CorrelationId>, PipelineError> {
    let mut paths: Vec<Vec<&str>> = vec![Vec::new()];
    for axis in axes {
        let mut next = Vec::with_capacity(paths.len() * axis.len());
        for path in &paths {
            for disc in axis.iter() {
                let mut extended = path.clone();
                extended.push(*disc);
                next.push(extended);
            }
        }
        paths = next;
    }
    paths
        .iter()
        .map(|discs| CorrelationId::compose(parent, discs))
        .collect()
}

/// Row id used for locally generated patient rows (`row0000`, `row0001`, ...).
pub fn row_id(index: usize) -> CorrelationId {
    CorrelationId::new(format!("row{index:04}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id, "prompt", Map::new())
    }

    #[test]
    fn build_items_produces_exact_count_with_distinct_ids() {
        for n in [0, 1, 7, 250] {
            let items = build_items(n, |i| Ok(item(row_id(i).as_str()))).unwrap();
            assert_eq!(items.len(), n);
            let ids: HashSet<_> = items.iter().map(|i| &i.correlation_id).collect();
            assert_eq!(ids.len(), n);
        }
    }

    #[test]
    fn build_items_rejects_duplicates() {
        let err = build_items(3, |i| Ok(item(if i == 2 { "row0000" } else { "x" })))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn build_items_propagates_generator_errors() {
        let err = build_items(3, |i| {
            if i == 1 {
                Err(PipelineError::Validation("boom".into()))
            } else {
                Ok(item(row_id(i).as_str()))
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn fan_out_covers_every_combination() {
        let sections: &[&str] = &["subjective", "objective", "assessment", "plan"];
        let formats: &[&str] = &["simple", "bullets", "narrative", "brev_bp", "detailed"];
        let ids = fan_out("row0001", &[sections, formats]).unwrap();

        assert_eq!(ids.len(), 20);
        assert_eq!(ids[0].as_str(), "row0001:subjective:simple");
        assert_eq!(ids[19].as_str(), "row0001:plan:detailed");
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn row_ids_are_zero_padded() {
        assert_eq!(row_id(7).as_str(), "row0007");
        assert_eq!(row_id(1031).as_str(), "row1031");
    }
}
