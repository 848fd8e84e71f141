//! Property-Based Tests for Cronos Core
//!
//! Uses `proptest` to check the invariants that must hold whatever the
//! input: merge idempotence, tenant isolation and bounded traversal.

use proptest::prelude::*;

use cronos_core::config::CronosConfig;
use cronos_core::error::ReadOutcome;
use cronos_core::types::{EdgeInput, Properties};
use cronos_core::vector::SearchFilter;
use cronos_core::{MemoryContext, Universe};
use serde_json::{Value, json};

fn context_with_universe(universe: &str, user: &str) -> MemoryContext {
    let ctx = MemoryContext::init(&CronosConfig::in_memory()).expect("init");
    ctx.catalog()
        .upsert_universe(&Universe::new(universe, user, "Generated"))
        .expect("universe");
    ctx
}

fn tags(user: &str, universe: &str) -> Properties {
    let Value::Object(map) = json!({"userId": user, "universeId": universe}) else {
        unreachable!()
    };
    map
}

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{1,7}"
}

fn arb_relation() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["KNOWS", "FEARS", "OWNS", "SERVES", "GUARDS"]).prop_map(str::to_string)
}

fn arb_edge() -> impl Strategy<Value = EdgeInput> {
    (arb_name(), arb_relation(), arb_name()).prop_map(|(s, r, o)| EdgeInput::new(s, r, o))
}

fn arb_sentence() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{2,8}", 2..8).prop_map(|words| words.join(" "))
}

// ---------------------------------------------------------------------------
// Property: merging a batch twice is the same as merging it once
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn merge_edges_is_idempotent(batch in prop::collection::vec(arb_edge(), 1..12)) {
        let ctx = context_with_universe("w1", "u1");
        let graph = ctx.graph();

        graph.merge_edges(&batch, "w1", "u1").expect("first");
        let before: Vec<_> = batch
            .iter()
            .map(|e| graph.query_neighbors(&e.subject, "w1", "u1", 1, None))
            .collect();

        graph.merge_edges(&batch, "w1", "u1").expect("second");
        let after: Vec<_> = batch
            .iter()
            .map(|e| graph.query_neighbors(&e.subject, "w1", "u1", 1, None))
            .collect();

        prop_assert_eq!(before, after);
    }

    #[test]
    fn upsert_universe_is_idempotent(name in arb_name(), repeats in 1usize..5) {
        let ctx = context_with_universe("w1", "u1");
        for _ in 0..repeats {
            ctx.catalog().upsert_universe(&Universe::new("w1", "u1", name.as_str())).expect("upsert");
        }
        let ReadOutcome::Ok(universes) = ctx.catalog().list_for_user("u1").universes else {
            panic!("listing failed");
        };
        prop_assert_eq!(universes.len(), 1);
        prop_assert_eq!(&universes[0].name, &name);
    }
}

// ---------------------------------------------------------------------------
// Property: searches never cross tenants
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn search_never_returns_other_tenants(
        own in prop::collection::vec(arb_sentence(), 0..5),
        foreign in prop::collection::vec(arb_sentence(), 1..5),
        query in arb_sentence(),
    ) {
        let ctx = context_with_universe("w1", "u1");
        for text in &own {
            ctx.vector().ingest(text, tags("u1", "w1")).expect("own");
        }
        for text in &foreign {
            ctx.vector().ingest(text, tags("u2", "w1")).expect("foreign");
        }

        let hits = ctx.vector().search(&query, &SearchFilter::tenant("u1", "w1"), 10);
        prop_assert!(hits.len() <= own.len());
        for hit in &hits {
            prop_assert!(own.contains(hit));
        }
    }
}

// ---------------------------------------------------------------------------
// Property: depth-1 traversal is bounded and local
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn neighbors_are_bounded_and_touch_the_entity(
        fan_out in 0usize..120,
        extra in prop::collection::vec(arb_edge(), 0..20),
        depth in 0u32..4,
    ) {
        let ctx = context_with_universe("w1", "u1");
        let mut batch: Vec<EdgeInput> = (0..fan_out)
            .map(|i| EdgeInput::new("Hub", "KNOWS", format!("Spoke{i}")))
            .collect();
        batch.extend(extra);
        if !batch.is_empty() {
            ctx.graph().merge_edges(&batch, "w1", "u1").expect("merge");
        }

        let edges = ctx.graph().query_neighbors("Hub", "w1", "u1", depth, None);
        prop_assert!(edges.len() <= 50);
        prop_assert!(edges.iter().all(|e| e.touches("Hub")));
    }
}
