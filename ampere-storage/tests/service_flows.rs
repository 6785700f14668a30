//! End-to-end flows through `DataAccessService` over instrumented drivers.

use std::sync::Arc;
use std::time::Duration;

use ampere_cache::CacheManager;
use ampere_core::{CacheSettings, Populate, Sort};
use ampere_storage::{
    AggregateOptions, CacheCategory, CountOptions, DataAccessService, DocumentStore, GetOptions,
    InMemoryDocumentStore, PaginateOptions, QueryOptions, UpdateOptions,
};
use ampere_test_utils::assertions::{
    assert_hits_misses, assert_injected_failure, assert_invalid_identifier,
};
use ampere_test_utils::fixtures::{self, id_of};
use ampere_test_utils::{init_test_tracing, memory_service, CountingStore, FailingStore, StoreOp};
use futures_util::future::join_all;
use serde_json::{json, Value};

type Counted = CountingStore<InMemoryDocumentStore>;

fn counted_service(collection: &str) -> DataAccessService<Counted> {
    init_test_tracing();
    DataAccessService::new(
        collection,
        Arc::new(CountingStore::new(InMemoryDocumentStore::new())),
        Arc::new(CacheManager::new(CacheSettings::default())),
    )
}

async fn seed_readings(svc: &DataAccessService<Counted>, meter_id: &str, n: u32) {
    for doc in fixtures::readings(meter_id, n) {
        svc.create(doc).await.unwrap();
    }
    svc.store().reset();
}

#[tokio::test]
async fn paginate_second_page_of_twenty_five() {
    let svc = counted_service("readings");
    seed_readings(&svc, "65a1b2c3d4e5f60718293a4b", 25).await;

    let page = svc
        .paginate(
            &json!({"meterId": "65a1b2c3d4e5f60718293a4b"}),
            PaginateOptions::new(2, 10).with_sort(Sort::asc("day")),
        )
        .await
        .unwrap();

    assert_eq!(page.data.len(), 10);
    assert_eq!(page.data[0]["day"], json!(10));
    assert_eq!(page.pagination.total, 25);
    assert_eq!(page.pagination.total_pages, 3);
    assert_eq!(page.pagination.current_page, 2);
    assert!(page.pagination.has_next);
    assert!(page.pagination.has_previous);

    let wire = serde_json::to_value(&page).unwrap();
    let meta = &wire["paginacion"];
    assert_eq!(meta["paginaActual"], json!(2));
    assert_eq!(meta["totalPaginas"], json!(3));
    assert_eq!(meta["limite"], json!(10));
    assert_eq!(meta["haySiguiente"], json!(true));
    assert_eq!(meta["hayAnterior"], json!(true));
    assert_eq!(meta["total"], json!(25));

    // Same page again: served from the paginated namespace.
    svc.paginate(
        &json!({"meterId": "65a1b2c3d4e5f60718293a4b"}),
        PaginateOptions::new(2, 10).with_sort(Sort::asc("day")),
    )
    .await
    .unwrap();
    assert_eq!(svc.store().calls(StoreOp::Find), 1);
    assert_eq!(svc.store().calls(StoreOp::Count), 1);
}

#[tokio::test]
async fn last_page_and_page_past_the_end() {
    let svc = counted_service("readings");
    seed_readings(&svc, "65a1b2c3d4e5f60718293a4b", 25).await;

    let last = svc
        .paginate(&json!({}), PaginateOptions::new(3, 10))
        .await
        .unwrap();
    assert_eq!(last.data.len(), 5);
    assert!(!last.pagination.has_next);

    let beyond = svc
        .paginate(&json!({}), PaginateOptions::new(9, 10))
        .await
        .unwrap();
    assert!(beyond.data.is_empty());
    assert_eq!(beyond.pagination.current_page, 9);
    assert!(!beyond.pagination.has_next);
}

#[tokio::test]
async fn update_is_visible_to_every_read_shape() {
    let svc = counted_service("meters");
    let a = svc
        .create(fixtures::meter("M-1", "65a1b2c3d4e5f60718293a4b", "north"))
        .await
        .unwrap();
    svc.create(fixtures::meter("M-2", "65a1b2c3d4e5f60718293a4b", "north"))
        .await
        .unwrap();

    let north = json!({"zone": "north"});
    assert_eq!(svc.query(&north, QueryOptions::new()).await.unwrap().len(), 2);
    assert_eq!(svc.count(&north, CountOptions::default()).await.unwrap(), 2);
    assert_eq!(
        svc.paginate(&north, PaginateOptions::default()).await.unwrap().pagination.total,
        2
    );

    svc.update(&id_of(&a), &json!({"$set": {"zone": "south"}}), UpdateOptions::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(svc.query(&north, QueryOptions::new()).await.unwrap().len(), 1);
    assert_eq!(svc.count(&north, CountOptions::default()).await.unwrap(), 1);
    assert_eq!(
        svc.paginate(&north, PaginateOptions::default()).await.unwrap().pagination.total,
        1
    );
    let fetched = svc.get_by_id(&id_of(&a), GetOptions::new()).await.unwrap().unwrap();
    assert_eq!(fetched["zone"], json!("south"));
}

#[tokio::test]
async fn malformed_ids_never_reach_the_driver() {
    let svc = counted_service("meters");
    assert_invalid_identifier(&svc.get_by_id("not-an-id", GetOptions::new()).await);
    assert_invalid_identifier(
        &svc.update("12345", &json!({"zone": "x"}), UpdateOptions::default()).await,
    );
    assert_invalid_identifier(&svc.delete("65a1b2c3d4e5f60718293a4").await);

    assert_eq!(svc.store().total_calls(), 0);
    assert!(svc.cache().namespaces().is_empty());
}

#[tokio::test]
async fn driver_errors_propagate_and_are_not_cached() {
    init_test_tracing();
    let store = Arc::new(FailingStore::new(InMemoryDocumentStore::new()));
    let svc = DataAccessService::new("meters", Arc::clone(&store), Arc::new(CacheManager::default()));
    svc.create(json!({"serial": "M-1", "zone": "north"})).await.unwrap();

    store.fail_next(1);
    assert_injected_failure(&svc.query(&json!({"zone": "north"}), QueryOptions::new()).await);
    let ns = svc.namespace_name(CacheCategory::Find);
    assert_eq!(svc.cache().namespace_stats(&ns).size, 0);

    let docs = svc.query(&json!({"zone": "north"}), QueryOptions::new()).await.unwrap();
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn failed_write_leaves_cache_untouched() {
    init_test_tracing();
    let store = Arc::new(FailingStore::new(InMemoryDocumentStore::new()));
    let svc = DataAccessService::new("meters", Arc::clone(&store), Arc::new(CacheManager::default()));
    let created = svc.create(json!({"serial": "M-1"})).await.unwrap();
    svc.query(&json!({}), QueryOptions::new()).await.unwrap();

    store.fail_next(1);
    assert_injected_failure(
        &svc.update(&id_of(&created), &json!({"serial": "M-2"}), UpdateOptions::default())
            .await,
    );

    let ns = svc.namespace_name(CacheCategory::Find);
    assert_eq!(svc.cache().namespace_stats(&ns).size, 1);
}

#[tokio::test]
async fn concurrent_get_by_id_hits_driver_once() {
    init_test_tracing();
    let store = Arc::new(
        CountingStore::new(InMemoryDocumentStore::new()).with_read_delay(Duration::from_millis(20)),
    );
    let svc = Arc::new(DataAccessService::new(
        "customers",
        Arc::clone(&store),
        Arc::new(CacheManager::default()),
    ));
    let created = svc.create(fixtures::customer("Ana", "north")).await.unwrap();
    let id = id_of(&created);

    let reads = (0..8).map(|_| {
        let svc = Arc::clone(&svc);
        let id = id.clone();
        async move { svc.get_by_id(&id, GetOptions::new()).await }
    });
    let results = join_all(reads).await;

    assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));
    assert_eq!(store.calls(StoreOp::FindById), 1);
    assert_hits_misses(svc.cache(), &svc.namespace_name(CacheCategory::ById), 7, 1);
}

#[tokio::test]
async fn select_and_populate_are_part_of_the_key() {
    let svc = counted_service("meters");
    let owner = svc
        .store()
        .insert("customers", fixtures::customer("Luis", "south"))
        .await
        .unwrap();
    let meter = svc
        .create(fixtures::meter("M-7", &id_of(&owner), "south"))
        .await
        .unwrap();
    let id = id_of(&meter);

    let plain = svc.get_by_id(&id, GetOptions::new()).await.unwrap().unwrap();
    assert_eq!(plain["customerId"], json!(id_of(&owner)));

    let expanded = svc
        .get_by_id(
            &id,
            GetOptions::new()
                .with_populate(Populate::new("customerId", "customers").with_select(&["name"]))
                .with_select(&["serial", "customerId"]),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(expanded["customerId"]["name"], json!("Luis"));
    assert!(expanded.get("zone").is_none());

    // Both shapes are cached separately and both die with an update.
    assert_eq!(svc.cache().namespace_stats("meters:byId").size, 2);
    svc.update(&id, &json!({"phases": 3}), UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(svc.cache().namespace_stats("meters:byId").size, 0);
}

#[tokio::test]
async fn sanitized_filter_treats_input_literally() {
    let svc = counted_service("meters");
    svc.create(json!({"serial": "MTR-1", "note": "a+b"})).await.unwrap();
    svc.create(json!({"serial": "MTR-2", "note": "aab"})).await.unwrap();

    // `a+b` would match "aab" as a pattern; sanitized it only matches itself.
    let docs = svc
        .query(&json!({"note": {"$regex": "a+b"}}), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["serial"], json!("MTR-1"));

    let count = svc
        .count(&json!({"note": {"$regex": ".*"}}), CountOptions::default())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn aggregate_ttl_override_and_bypass() {
    let svc = counted_service("readings");
    seed_readings(&svc, "65a1b2c3d4e5f60718293a4b", 4).await;
    let pipeline = [json!({"$group": {"_id": "$meterId", "kwh": {"$sum": "$kwh"}}})];

    let out = svc
        .aggregate(&pipeline, AggregateOptions::new().with_ttl(Duration::from_millis(30)))
        .await
        .unwrap();
    assert_eq!(out[0]["kwh"], json!(10.0));

    svc.aggregate(&pipeline, AggregateOptions::new()).await.unwrap();
    assert_eq!(svc.store().calls(StoreOp::Aggregate), 1);

    svc.aggregate(&pipeline, AggregateOptions::new().bypass_cache())
        .await
        .unwrap();
    assert_eq!(svc.store().calls(StoreOp::Aggregate), 2);

    tokio::time::sleep(Duration::from_millis(60)).await;
    // The bypass stored its result with the category TTL, so it is still live.
    svc.aggregate(&pipeline, AggregateOptions::new()).await.unwrap();
    assert_eq!(svc.store().calls(StoreOp::Aggregate), 2);
}

#[tokio::test]
async fn query_options_shape_results() {
    let svc = counted_service("readings");
    seed_readings(&svc, "65a1b2c3d4e5f60718293a4b", 6).await;

    let docs: Vec<Value> = svc
        .query(
            &json!({"kwh": {"$gte": 2}}),
            QueryOptions::new()
                .with_sort(Sort::desc("kwh"))
                .with_skip(1)
                .with_limit(2)
                .with_select(&["kwh"]),
        )
        .await
        .unwrap();
    let kwh: Vec<&Value> = docs.iter().map(|d| &d["kwh"]).collect();
    assert_eq!(kwh, vec![&json!(5.0), &json!(4.0)]);
    assert!(docs[0].get("meterId").is_none());
}

#[tokio::test]
async fn slow_read_does_not_cache_over_a_concurrent_write() {
    init_test_tracing();
    let store = Arc::new(
        CountingStore::new(InMemoryDocumentStore::new())
            .with_settle_delay(Duration::from_millis(100)),
    );
    let svc = DataAccessService::new("meters", Arc::clone(&store), Arc::new(CacheManager::default()));
    let created = svc
        .create(fixtures::meter("M-1", "65a1b2c3d4e5f60718293a4b", "north"))
        .await
        .unwrap();

    // The read has its answer from the driver but is still in transit when
    // the write commits.
    let all = json!({});
    let (in_transit, _) = tokio::join!(svc.query(&all, QueryOptions::new()), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        svc.update(&id_of(&created), &json!({"zone": "south"}), UpdateOptions::default())
            .await
            .unwrap()
    });
    assert_eq!(in_transit.unwrap()[0]["zone"], json!("north"));

    let after = svc.query(&json!({}), QueryOptions::new()).await.unwrap();
    assert_eq!(after[0]["zone"], json!("south"));
    assert_eq!(store.calls(StoreOp::Find), 2);
}

#[tokio::test]
async fn plain_memory_service_round_trip() {
    let svc = memory_service("customers");
    let created = svc.create(fixtures::customer("Eva", "east")).await.unwrap();
    let fetched = svc
        .get_by_id(&id_of(&created), GetOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched["name"], json!("Eva"));
    assert_eq!(svc.store().collection_names().unwrap(), vec!["customers".to_string()]);
}
