//! Property-based tests for reconciliation using proptest.
//!
//! Properties verified:
//! - Reconciling the same declaration twice leaves the table unchanged
//! - Owned keys equal the declared keys after a successful reconciliation
//! - Records without the ownership marker survive any reconciliation
//! - The last record declared for a key is the one stored

#![allow(clippy::panic)]

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use seedkeeper_reconciler::{Declaration, InMemoryStore, Reconciler, SeedRecord};

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    unwrap_result(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        "runtime creation should succeed",
    )
}

/// Declared and foreign records draw keys from the same space so they collide.
const KEY_PATTERN: &str = "k[0-9]{1,2}";

fn record_strategy() -> impl Strategy<Value = SeedRecord> {
    (KEY_PATTERN, "[a-z]{0,6}", any::<i32>())
        .prop_map(|(key, name, n)| SeedRecord::new().with("Id", key).with("Name", name).with("N", n))
}

fn declaration_strategy() -> impl Strategy<Value = Declaration> {
    prop::collection::vec(record_strategy(), 0..40).prop_map(Declaration::from_records)
}

fn foreign_strategy() -> impl Strategy<Value = Vec<SeedRecord>> {
    prop::collection::vec(
        (KEY_PATTERN, "[a-z]{0,6}")
            .prop_map(|(key, note)| SeedRecord::new().with("Id", key).with("Note", note)),
        0..10,
    )
}

fn declared_keys(declaration: &Declaration) -> BTreeSet<String> {
    declaration
        .records()
        .iter()
        .filter_map(|r| r.key("Id").map(str::to_string))
        .collect()
}

fn foreign_keys(foreign: &[SeedRecord]) -> BTreeSet<String> {
    foreign
        .iter()
        .filter_map(|r| r.key("Id").map(str::to_string))
        .collect()
}

// ==========================================================================
// PROPERTY: Idempotence
// ==========================================================================

proptest! {
    /// Property: a second reconciliation with the same declaration changes
    /// nothing, and succeeds exactly when the first did.
    #[test]
    fn prop_reconcile_is_idempotent(
        prior in declaration_strategy(),
        declaration in declaration_strategy(),
        foreign in foreign_strategy(),
    ) {
        let rt = runtime();
        let store = InMemoryStore::new("seeds", "Id");
        let reconciler = Reconciler::default();

        let (first_ok, first, second_ok, second) = rt.block_on(async {
            unwrap_result(store.insert_raw(foreign).await, "seeding foreign records");
            let _ = reconciler.reconcile(&store, "Id", &prior).await;
            let first_ok = reconciler.reconcile(&store, "Id", &declaration).await.is_ok();
            let first = store.snapshot().await;
            let second_ok = reconciler.reconcile(&store, "Id", &declaration).await.is_ok();
            (first_ok, first, second_ok, store.snapshot().await)
        });

        prop_assert_eq!(first_ok, second_ok);
        prop_assert_eq!(first, second);
    }

    /// Property: the owned key set equals the declared key set.
    #[test]
    fn prop_reconcile_converges(
        prior in declaration_strategy(),
        declaration in declaration_strategy(),
    ) {
        let rt = runtime();
        let store = InMemoryStore::new("seeds", "Id");
        let reconciler = Reconciler::default();

        let owned: BTreeSet<String> = rt.block_on(async {
            unwrap_result(reconciler.reconcile(&store, "Id", &prior).await, "prior reconcile");
            unwrap_result(reconciler.reconcile(&store, "Id", &declaration).await, "reconcile");
            unwrap_result(reconciler.owned_keys(&store).await, "owned keys")
        })
        .into_iter()
        .collect();

        prop_assert_eq!(owned, declared_keys(&declaration));
    }

    /// Property: unmarked records are neither deleted nor modified, even when
    /// a declaration claims their key. Such a declaration is refused, naming
    /// a colliding key.
    #[test]
    fn prop_foreign_records_isolated(
        declarations in prop::collection::vec(declaration_strategy(), 1..4),
        foreign in foreign_strategy(),
    ) {
        let rt = runtime();
        let store = InMemoryStore::new("seeds", "Id");
        let reconciler = Reconciler::default();

        let expected: BTreeMap<String, SeedRecord> = foreign
            .iter()
            .filter_map(|r| r.key("Id").map(|k| (k.to_string(), r.clone())))
            .collect();
        let foreign_keys = foreign_keys(&foreign);

        let outcomes = rt.block_on(async {
            unwrap_result(store.insert_raw(foreign).await, "seeding foreign records");
            let mut outcomes = Vec::new();
            for declaration in &declarations {
                let result = reconciler.reconcile(&store, "Id", declaration).await;
                outcomes.push((declared_keys(declaration), result));
            }
            outcomes
        });

        for (declared, result) in outcomes {
            let collides = !declared.is_disjoint(&foreign_keys);
            prop_assert_eq!(result.is_err(), collides);
            if let Err(err) = result {
                prop_assert_eq!(err.code(), "StoreWriteFailed");
                let key = err.failing_key().map(str::to_string).unwrap_or_default();
                prop_assert!(foreign_keys.contains(&key));
            }
        }

        for (key, record) in expected {
            prop_assert_eq!(rt.block_on(store.get(&key)), Some(record));
        }
    }

    /// Property: the stored record for a key is the last one declared, plus the marker.
    #[test]
    fn prop_last_declared_record_wins(declaration in declaration_strategy()) {
        let rt = runtime();
        let store = InMemoryStore::new("seeds", "Id");
        let reconciler = Reconciler::default();
        let marker = reconciler.marker().clone();

        let mut last: BTreeMap<String, SeedRecord> = BTreeMap::new();
        for record in declaration.records() {
            if let Some(key) = record.key("Id") {
                last.insert(key.to_string(), marker.mark(record.clone()));
            }
        }

        rt.block_on(async {
            unwrap_result(reconciler.reconcile(&store, "Id", &declaration).await, "reconcile");
        });

        let stored: BTreeMap<String, SeedRecord> = rt
            .block_on(store.snapshot())
            .into_iter()
            .filter_map(|r| r.key("Id").map(|k| (k.to_string(), r.clone())))
            .collect();

        prop_assert_eq!(stored, last);
    }
}
