//! Finding aggregation: dedup, corroboration, and the emission gate.
//!
//! Findings are grouped by `(vuln_class, file, line)`. Within a group the
//! highest severity wins (ties keep the incumbent), scanner ids union, and
//! corroborated findings get a confidence boost. The aggregator is pure and
//! deterministic for a given input ordering.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::domain::finding::{Finding, VulnClass};

/// Default emission threshold for uncorroborated findings.
pub const MIN_UNCORROBORATED_CONFIDENCE: u8 = 80;

const CORROBORATION_BOOST: u8 = 5;
const CONFIDENCE_CAP: u8 = 99;
const CORROBORATED_MARKER: &str = "(corroborated)";

/// Pure aggregator over a batch of raw findings.
#[derive(Debug, Clone, Copy)]
pub struct FindingAggregator {
    min_uncorroborated_confidence: u8,
}

impl Default for FindingAggregator {
    fn default() -> Self {
        Self {
            min_uncorroborated_confidence: MIN_UNCORROBORATED_CONFIDENCE,
        }
    }
}

impl FindingAggregator {
    pub fn new(min_uncorroborated_confidence: u8) -> Self {
        Self {
            min_uncorroborated_confidence,
        }
    }

    /// Deduplicate, fuse, gate, and order a batch of findings.
    pub fn aggregate(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let mut order: Vec<(VulnClass, PathBuf, u32)> = Vec::new();
        let mut groups: HashMap<(VulnClass, PathBuf, u32), Finding> = HashMap::new();

        for incoming in findings {
            let key = incoming.location_key();
            match groups.entry(key.clone()) {
                Entry::Occupied(mut entry) => merge(entry.get_mut(), incoming),
                Entry::Vacant(entry) => {
                    order.push(key);
                    entry.insert(incoming);
                }
            }
        }

        let mut emitted: Vec<Finding> = order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .filter(|f| {
                f.is_corroborated() || f.confidence >= self.min_uncorroborated_confidence
            })
            .collect();

        // Stable sort keeps group insertion order within equal keys, so the
        // output is deterministic for a given input multiset ordering.
        emitted.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.confidence.cmp(&a.confidence))
        });
        emitted
    }
}

fn merge(existing: &mut Finding, incoming: Finding) {
    let mut scanner_ids: Vec<String> =
        existing.scanner_ids().iter().map(|s| s.to_string()).collect();
    for id in incoming.scanner_ids() {
        if !scanner_ids.iter().any(|s| s == id) {
            scanner_ids.push(id.to_string());
        }
    }
    let corroborated = scanner_ids.len() >= 2;

    let boost = if corroborated { CORROBORATION_BOOST } else { 0 };
    let confidence = existing
        .confidence
        .max(incoming.confidence)
        .saturating_add(boost)
        .min(CONFIDENCE_CAP);

    // Highest severity wins; on a tie the incumbent stays representative.
    if incoming.severity > existing.severity {
        existing.severity = incoming.severity;
        existing.title = incoming.title.clone();
    }

    if !incoming.description.is_empty()
        && !existing
            .description
            .split(" | ")
            .any(|d| d == incoming.description)
    {
        if existing.description.is_empty() {
            existing.description = incoming.description;
        } else {
            existing.description = format!("{} | {}", existing.description, incoming.description);
        }
    }

    if !incoming.evidence.is_empty()
        && !existing.evidence.lines().any(|l| l == incoming.evidence)
    {
        if existing.evidence.is_empty() {
            existing.evidence = incoming.evidence;
        } else {
            existing.evidence = format!("{}\n{}", existing.evidence, incoming.evidence);
        }
    }

    existing.scanner_id = scanner_ids.join(" + ");
    existing.confidence = confidence;

    if corroborated && !existing.title.contains(CORROBORATED_MARKER) {
        existing.title = format!("{} {CORROBORATED_MARKER}", existing.title);
    }

    // Keep `id = H(scanner_id | class | file | line)` true after the union.
    existing.id = Finding::compute_id(
        &existing.scanner_id,
        existing.vuln_class,
        &existing.file,
        existing.line,
    );
}
