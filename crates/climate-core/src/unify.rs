use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::model::RawPermit;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_collapsed: usize,
}

/// Total order over candidate rows for one approval id; the greatest row is
/// authoritative.
///
/// Close date first, with a missing close date ranking below any present one.
/// Remaining ties fall to issue date, then source system, then the rest of the
/// row's content, so the winner never depends on input order.
pub fn compare_authority(a: &RawPermit, b: &RawPermit) -> Ordering {
    a.dates
        .closed
        .cmp(&b.dates.closed)
        .then_with(|| a.dates.issued.cmp(&b.dates.issued))
        .then_with(|| a.source_system.cmp(&b.source_system))
        .then_with(|| content_key(a).cmp(&content_key(b)))
}

type ContentKey<'a> = (
    (
        Option<&'a str>,
        Option<&'a str>,
        Option<&'a str>,
        Option<&'a str>,
    ),
    (Option<&'a str>, Option<&'a str>),
    (Option<chrono::NaiveDate>, Option<chrono::NaiveDate>),
    (Option<u64>, Option<u64>, Option<u64>),
);

fn content_key(permit: &RawPermit) -> ContentKey<'_> {
    (
        (
            permit.project_id.as_deref(),
            permit.job_id.as_deref(),
            permit.address.as_deref(),
            permit.apn.as_deref(),
        ),
        (
            permit.approval_type.as_deref(),
            permit.approval_status.as_deref(),
        ),
        (permit.dates.created, permit.dates.expired),
        (
            permit.valuation.map(f64::to_bits),
            permit.lat.map(f64::to_bits),
            permit.lng.map(f64::to_bits),
        ),
    )
}

/// Collapses the union of all sources to one row per approval id, ordered by id.
pub fn deduplicate(records: impl IntoIterator<Item = RawPermit>) -> (Vec<RawPermit>, DedupSummary) {
    let mut survivors: BTreeMap<String, RawPermit> = BTreeMap::new();
    let mut rows_in = 0usize;

    for record in records {
        rows_in += 1;
        match survivors.entry(record.approval_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if compare_authority(&record, slot.get()) == Ordering::Greater {
                    slot.insert(record);
                }
            }
        }
    }

    let deduped: Vec<RawPermit> = survivors.into_values().collect();
    let summary = DedupSummary {
        rows_in,
        rows_out: deduped.len(),
        duplicates_collapsed: rows_in - deduped.len(),
    };

    info!(
        rows_in = summary.rows_in,
        rows_out = summary.rows_out,
        dropped = summary.duplicates_collapsed,
        "deduplicated permits"
    );

    (deduped, summary)
}
