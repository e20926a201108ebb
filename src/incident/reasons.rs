//! Outage reason selection.

use rand::Rng;

use crate::db::ReasonTemplate;

/// Reason used when the template pool is empty or unavailable.
pub const DEFAULT_REASON_CODE: &str = "unknown";
pub const DEFAULT_REASON_TEXT: &str = "We are investigating the cause of this outage.";

/// Static pool for active incidents that have no persisted reason.
const FALLBACK_REASONS: &[&str] = &[
    "Our hosting provider is experiencing an outage.",
    "A network issue is preventing connections to the service.",
    "The service is under unusually high load.",
    "We are investigating the cause of this outage.",
];

/// Weighted random picker over a reason template pool.
///
/// Holds a cumulative weight table so a pick is one uniform draw and a
/// binary search, whatever the size of the weights.
#[derive(Debug, Clone)]
pub struct ReasonPicker {
    templates: Vec<ReasonTemplate>,
    cumulative: Vec<u64>,
}

impl ReasonPicker {
    /// Build the picker. Zero-weight templates are never chosen.
    pub fn new(templates: Vec<ReasonTemplate>) -> Self {
        let templates: Vec<_> = templates.into_iter().filter(|t| t.weight > 0).collect();
        let mut total = 0u64;
        let cumulative = templates
            .iter()
            .map(|t| {
                total += t.weight as u64;
                total
            })
            .collect();
        Self { templates, cumulative }
    }

    pub fn total_weight(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template owning the point `draw` in `[0, total_weight)`.
    pub fn select(&self, draw: u64) -> Option<&ReasonTemplate> {
        let idx = self.cumulative.partition_point(|&c| c <= draw);
        self.templates.get(idx)
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&ReasonTemplate> {
        let total = self.total_weight();
        if total == 0 {
            return None;
        }
        self.select(rng.gen_range(0..total))
    }
}

/// Stable display reason for a target, used when no reason row exists.
pub fn fallback_reason(target_name: &str) -> &'static str {
    let idx = (fnv1a(target_name.as_bytes()) % FALLBACK_REASONS.len() as u64) as usize;
    FALLBACK_REASONS[idx]
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
