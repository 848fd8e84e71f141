//! Fixtures shared by the Cronos benchmarks.

use cronos_core::config::CronosConfig;
use cronos_core::types::{EdgeInput, Properties};
use cronos_core::{MemoryContext, Universe};
use serde_json::{Value, json};

/// Narration fragments recombined into benchmark memories.
const FRAGMENTS: [&str; 8] = [
    "the dragon",
    "guards the castle",
    "a merchant",
    "sells bread at dawn",
    "the knight",
    "swore an oath",
    "the river",
    "floods the valley",
];

/// An in-memory context with universe `w1` owned by `u1`.
///
/// # Panics
///
/// If the in-memory stores cannot be created.
#[must_use]
pub fn seeded_context() -> MemoryContext {
    let ctx = MemoryContext::init(&CronosConfig::in_memory()).expect("in-memory context");
    ctx.catalog()
        .upsert_universe(&Universe::new("w1", "u1", "Bench"))
        .expect("bench universe");
    ctx
}

/// Tenant metadata for a memory.
#[must_use]
pub fn tags(user: &str, universe: &str) -> Properties {
    match json!({"userId": user, "universeId": universe}) {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}

/// A deterministic sentence for memory `i`.
#[must_use]
pub fn sentence(i: usize) -> String {
    format!(
        "{} {} near marker {i}",
        FRAGMENTS[i % FRAGMENTS.len()],
        FRAGMENTS[(i / FRAGMENTS.len() + 1) % FRAGMENTS.len()]
    )
}

/// `n` edges fanning out from `Hub`.
#[must_use]
pub fn hub_edges(n: usize) -> Vec<EdgeInput> {
    (0..n)
        .map(|i| EdgeInput::new("Hub", "KNOWS", format!("Spoke{i}")))
        .collect()
}
