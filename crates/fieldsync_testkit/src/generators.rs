//! Property-based test generators using proptest.
//!
//! Strategies for entities, payloads and deltas shaped like the field data
//! devices actually submit.

use fieldsync_protocol::{
    DeltaDto, DeltaOperation, DeltaPayload, EntityReference, ResolutionStrategy, SyncVersion,
};
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

/// Entity types seen in the field.
pub const ENTITY_TYPES: [&str; 5] = ["project", "zone", "installation", "photo", "measurement"];

/// Strategy for entity types.
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(ENTITY_TYPES.to_vec()).prop_map(str::to_string)
}

/// Strategy for fresh entity references.
pub fn entity_ref_strategy() -> impl Strategy<Value = EntityReference> {
    (entity_type_strategy(), any::<u128>())
        .prop_map(|(entity_type, id)| EntityReference::new(entity_type, Uuid::from_u128(id)))
}

/// Strategy for a fixed pool of entities, so generated deltas collide.
pub fn entity_pool_strategy(size: usize) -> impl Strategy<Value = Vec<EntityReference>> {
    prop::collection::vec(entity_ref_strategy(), size.max(1))
}

/// Strategy for JSON measurement payloads.
pub fn payload_strategy() -> impl Strategy<Value = DeltaPayload> {
    (
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        -1000.0f64..1000.0,
        any::<bool>(),
    )
        .prop_map(|(label, value, verified)| {
            let doc = json!({ "label": label, "value": value, "verified": verified });
            DeltaPayload::from(doc.to_string())
        })
}

/// Strategy for delta operations.
pub fn operation_strategy() -> impl Strategy<Value = DeltaOperation> {
    prop_oneof![
        Just(DeltaOperation::Create),
        Just(DeltaOperation::Update),
        Just(DeltaOperation::Delete),
    ]
}

/// Strategy for resolution strategies.
pub fn resolution_strategy() -> impl Strategy<Value = ResolutionStrategy> {
    prop_oneof![
        Just(ResolutionStrategy::ClientWins),
        Just(ResolutionStrategy::ServerWins),
        Just(ResolutionStrategy::ManualMerge),
    ]
}

/// Strategy for deltas against entities from `pool`, with base versions
/// in `0..max_base`.
pub fn delta_strategy(
    pool: Vec<EntityReference>,
    max_base: u64,
) -> impl Strategy<Value = DeltaDto> {
    (
        prop::sample::select(pool),
        operation_strategy(),
        0..max_base.max(1),
        payload_strategy(),
    )
        .prop_map(|(entity, operation, base, payload)| {
            DeltaDto::new(entity, operation, SyncVersion::new(base), payload)
        })
}

/// Strategy for batches of 1 to `max_len` deltas against `pool`.
pub fn batch_strategy(
    pool: Vec<EntityReference>,
    max_len: usize,
) -> impl Strategy<Value = Vec<DeltaDto>> {
    prop::collection::vec(delta_strategy(pool, 4), 1..max_len.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn payloads_are_json() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let payload = payload_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            let value: serde_json::Value =
                serde_json::from_slice(payload.as_bytes()).unwrap();
            assert!(value.get("label").is_some());
        }
    }

    proptest! {
        #[test]
        fn deltas_target_the_pool(pool in entity_pool_strategy(3)) {
            let mut runner = TestRunner::deterministic();
            let delta = delta_strategy(pool.clone(), 4)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            prop_assert!(pool.contains(&delta.entity_ref()));
            prop_assert!(delta.base_version.get() < 4);
        }

        #[test]
        fn batches_are_never_empty(batch in batch_strategy(vec![
            EntityReference::new("zone", Uuid::nil()),
        ], 8)) {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() < 8);
        }
    }
}
