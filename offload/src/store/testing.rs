//! Test suite for ensuring a correct implementation of a store.
use std::time::Duration;

use serde_json::json;

use super::*;

const SHORT_TTL: Duration = Duration::from_millis(50);
const PAST_SHORT_TTL: Duration = Duration::from_millis(120);

/// Create test suite for an offload store.
///
/// Store implementors should include this as part of their test suites.
///
/// # Example
///
/// ```
/// use offload::store_test_suite;
/// use offload::store::memory::InMemoryStore;
/// store_test_suite!(for: InMemoryStore::new());
/// ```
///
/// If you are using a different async test attribute you can configure the macro to use that
/// instead. For example when using `sqlx::test` you could do the following:
///
/// ```ignore
/// use offload::store_test_suite;
/// store_test_suite!(
///     attr: sqlx::test,
///     args: (pool: PgPool),
///     store: StoreImplementation::from_pool(pool).await.unwrap()
/// );
/// ```
#[macro_export]
macro_rules! store_test_suite {
    (for: $store:expr) => {
        $crate::store_test_suite!(attr: tokio::test, args: (), store: $store);
    };
    (attr: $attr:meta, args: $args:tt, store: $store:expr) => {
        #[$attr]
        async fn get_missing_key $args {
            let store = $store;
            $crate::store::testing::get_missing_key(store).await;
        }
        #[$attr]
        async fn set_then_get $args {
            let store = $store;
            $crate::store::testing::set_then_get(store).await;
        }
        #[$attr]
        async fn set_overwrites_in_place $args {
            let store = $store;
            $crate::store::testing::set_overwrites_in_place(store).await;
        }
        #[$attr]
        async fn set_with_ttl_expires $args {
            let store = $store;
            $crate::store::testing::set_with_ttl_expires(store).await;
        }
        #[$attr]
        async fn insert_only_when_absent $args {
            let store = $store;
            $crate::store::testing::insert_only_when_absent(store).await;
        }
        #[$attr]
        async fn insert_replaces_expired_entry $args {
            let store = $store;
            $crate::store::testing::insert_replaces_expired_entry(store).await;
        }
        #[$attr]
        async fn delete_removes_entry $args {
            let store = $store;
            $crate::store::testing::delete_removes_entry(store).await;
        }
        #[$attr]
        async fn delete_missing_key $args {
            let store = $store;
            $crate::store::testing::delete_missing_key(store).await;
        }
        #[$attr]
        async fn list_by_prefix_in_insertion_order $args {
            let store = $store;
            $crate::store::testing::list_by_prefix_in_insertion_order(store).await;
        }
        #[$attr]
        async fn list_with_limit $args {
            let store = $store;
            $crate::store::testing::list_with_limit(store).await;
        }
        #[$attr]
        async fn list_skips_expired $args {
            let store = $store;
            $crate::store::testing::list_skips_expired(store).await;
        }
    };
}

#[doc(hidden)]
pub async fn get_missing_key(store: impl Store) {
    assert_eq!(store.get("missing").await.unwrap(), None);
}

#[doc(hidden)]
pub async fn set_then_get(store: impl Store) {
    store
        .set("job_batch_1", json!(["a", "b"]), None)
        .await
        .unwrap();

    assert_eq!(
        store.get("job_batch_1").await.unwrap(),
        Some(json!(["a", "b"]))
    );
}

#[doc(hidden)]
pub async fn set_overwrites_in_place(store: impl Store) {
    store.set("job_batch_1", json!(["a"]), None).await.unwrap();
    store.set("job_batch_2", json!(["b"]), None).await.unwrap();
    store.set("job_batch_1", json!(["c"]), None).await.unwrap();

    let entries = store.list("job_batch_", None).await.unwrap();

    assert_eq!(
        entries,
        vec![
            Entry {
                key: "job_batch_1".to_owned(),
                value: json!(["c"]),
            },
            Entry {
                key: "job_batch_2".to_owned(),
                value: json!(["b"]),
            },
        ]
    );
}

#[doc(hidden)]
pub async fn set_with_ttl_expires(store: impl Store) {
    store
        .set("job_process_lock", json!(true), Some(SHORT_TTL))
        .await
        .unwrap();
    assert!(store.get("job_process_lock").await.unwrap().is_some());

    tokio::time::sleep(PAST_SHORT_TTL).await;

    assert_eq!(store.get("job_process_lock").await.unwrap(), None);
}

#[doc(hidden)]
pub async fn insert_only_when_absent(store: impl Store) {
    assert!(store
        .insert("job_process_lock", json!(1), Some(Duration::from_secs(60)))
        .await
        .unwrap());
    assert!(!store
        .insert("job_process_lock", json!(2), Some(Duration::from_secs(60)))
        .await
        .unwrap());

    assert_eq!(store.get("job_process_lock").await.unwrap(), Some(json!(1)));
}

#[doc(hidden)]
pub async fn insert_replaces_expired_entry(store: impl Store) {
    assert!(store
        .insert("job_process_lock", json!(1), Some(SHORT_TTL))
        .await
        .unwrap());

    tokio::time::sleep(PAST_SHORT_TTL).await;

    assert!(store
        .insert("job_process_lock", json!(2), None)
        .await
        .unwrap());
    assert_eq!(store.get("job_process_lock").await.unwrap(), Some(json!(2)));
}

#[doc(hidden)]
pub async fn delete_removes_entry(store: impl Store) {
    store.set("job_status", json!(2), None).await.unwrap();

    store.delete("job_status").await.unwrap();

    assert_eq!(store.get("job_status").await.unwrap(), None);
}

#[doc(hidden)]
pub async fn delete_missing_key(store: impl Store) {
    assert!(store.delete("missing").await.is_ok());
}

#[doc(hidden)]
pub async fn list_by_prefix_in_insertion_order(store: impl Store) {
    for key in ["job_batch_z", "other_batch_a", "job_batch_a", "job_batch_m"] {
        store.set(key, json!([key]), None).await.unwrap();
    }

    let keys = store
        .list("job_batch_", None)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.key)
        .collect::<Vec<_>>();

    assert_eq!(keys, ["job_batch_z", "job_batch_a", "job_batch_m"]);
}

#[doc(hidden)]
pub async fn list_with_limit(store: impl Store) {
    for i in 0..5 {
        store
            .set(&format!("job_batch_{i}"), json!([i]), None)
            .await
            .unwrap();
    }

    let entries = store.list("job_batch_", Some(2)).await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, "job_batch_0");
    assert_eq!(entries[1].key, "job_batch_1");
}

#[doc(hidden)]
pub async fn list_skips_expired(store: impl Store) {
    store
        .set("job_batch_1", json!([1]), Some(SHORT_TTL))
        .await
        .unwrap();
    store.set("job_batch_2", json!([2]), None).await.unwrap();

    tokio::time::sleep(PAST_SHORT_TTL).await;

    let entries = store.list("job_batch_", None).await.unwrap();

    assert_eq!(
        entries,
        vec![Entry {
            key: "job_batch_2".to_owned(),
            value: json!([2]),
        }]
    );
}
