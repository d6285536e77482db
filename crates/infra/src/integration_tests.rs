//! End-to-end scenarios for the data layer over the in-memory backend.
//!
//! Verifies:
//! - Records of one tenant are invisible and immutable to another
//! - Tenant stamping wins over caller-supplied values
//! - Shared tables bypass isolation
//! - Pagination, upsert conflict targets and filter composition
//! - Subscriptions only observe their own tenant and stop on unsubscribe
//! - Timeouts and backend failures surface as errors

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::{Value as JsonValue, json};

    use bookbuddy_core::{AppTable, DataError, Record, TenantPolicy, record_from_value};
    use bookbuddy_events::{ChangeEvent, ChangeKind};

    use crate::backend::InMemoryStore;
    use crate::config::DataConfig;
    use crate::engine::CrudEngine;
    use crate::query::{Filter, Order, QueryOptions};
    use crate::realtime::SubscriptionBridge;
    use crate::storage::{LocalObjectStore, TenantBuckets, UploadOptions};

    type Engine = CrudEngine<Arc<InMemoryStore>>;

    fn record(value: JsonValue) -> Record {
        record_from_value(value).unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, Engine, Engine) {
        bookbuddy_observability::init_for_tests();
        let store = Arc::new(InMemoryStore::new());
        let ours = CrudEngine::new(store.clone(), TenantPolicy::new("bookbuddy"));
        let theirs = CrudEngine::new(store.clone(), TenantPolicy::new("otherapp"));
        (store, ours, theirs)
    }

    fn opts() -> QueryOptions {
        QueryOptions::default()
    }

    /// Poll `condition` for up to two seconds.
    fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[tokio::test]
    async fn isolated_create_read_round_trip() -> anyhow::Result<()> {
        let (_store, ours, theirs) = setup();

        let book = ours
            .create(AppTable::Books, record(json!({"title": "Dune", "author": "Herbert"})), &opts())
            .await?;
        let id = book["id"].clone();
        assert_eq!(book["app_id"], json!("bookbuddy"));

        let fetched = ours.fetch_by_id(AppTable::Books, id.clone(), &opts()).await?;
        assert_eq!(fetched["title"], json!("Dune"));

        let page = theirs.fetch_all(AppTable::Books, &[], &opts()).await?;
        assert!(page.is_empty());
        assert_eq!(page.count, 0);

        let err = theirs.fetch_by_id(AppTable::Books, id.clone(), &opts()).await.unwrap_err();
        assert!(err.is_not_found());

        let all = theirs
            .fetch_all(AppTable::Books, &[], &opts().with_skip_tenant_filter())
            .await?;
        assert_eq!(all.count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn stamp_integrity_for_create_many_and_upsert() -> anyhow::Result<()> {
        let (store, ours, _theirs) = setup();

        ours.create_many(
            AppTable::Quotes,
            vec![
                record(json!({"text": "a", "app_id": "otherapp"})),
                record(json!({"text": "b", "app_id": null})),
                record(json!({"text": "c"})),
            ],
            &opts(),
        )
        .await?;
        ours.upsert(
            AppTable::Wishlist,
            record(json!({"id": "w1", "title": "Neuromancer", "app_id": "otherapp"})),
            &opts(),
        )
        .await?;

        for row in store.rows("quotes").iter().chain(store.rows("wishlist").iter()) {
            assert_eq!(row["app_id"], json!("bookbuddy"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn upsert_cannot_take_over_another_tenants_row() -> anyhow::Result<()> {
        let (store, ours, theirs) = setup();
        theirs
            .create(AppTable::Books, record(json!({"id": "b1", "title": "theirs"})), &opts())
            .await?;

        let err = ours
            .upsert(AppTable::Books, record(json!({"id": "b1", "title": "mine"})), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Conflict(_)));

        let kept = theirs.fetch_by_id(AppTable::Books, json!("b1"), &opts()).await?;
        assert_eq!(kept["title"], json!("theirs"));
        assert_eq!(kept["app_id"], json!("otherapp"));
        assert!(ours.fetch_by_id(AppTable::Books, json!("b1"), &opts()).await.is_err());
        assert_eq!(store.rows("books").len(), 1);

        let err = ours
            .upsert_many(
                AppTable::Books,
                vec![
                    record(json!({"id": "b2", "title": "fresh"})),
                    record(json!({"id": "b1", "title": "mine"})),
                ],
                &opts(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Conflict(_)));
        assert_eq!(store.rows("books").len(), 1);

        let own = ours
            .upsert(AppTable::Books, record(json!({"id": "b3", "title": "v1"})), &opts())
            .await?;
        assert_eq!(own["app_id"], json!("bookbuddy"));
        ours.upsert(AppTable::Books, record(json!({"id": "b3", "title": "v2"})), &opts())
            .await?;
        let own = ours.fetch_by_id(AppTable::Books, json!("b3"), &opts()).await?;
        assert_eq!(own["title"], json!("v2"));
        Ok(())
    }

    #[tokio::test]
    async fn other_tenant_cannot_update_or_remove() -> anyhow::Result<()> {
        let (store, ours, theirs) = setup();
        let note = ours
            .create(AppTable::Notes, record(json!({"body": "private"})), &opts())
            .await?;
        let id = note["id"].clone();

        let err = theirs
            .update(AppTable::Notes, id.clone(), record(json!({"body": "hijacked"})), &opts())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = theirs.remove(AppTable::Notes, id.clone(), &opts()).await.unwrap_err();
        assert!(err.is_not_found());

        let removed = theirs
            .remove_where(AppTable::Notes, &[Filter::eq("id", id.clone())], &opts())
            .await?;
        assert_eq!(removed.count, 0);

        let rows = store.rows("notes");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["body"], json!("private"));

        let removed = ours.remove(AppTable::Notes, id, &opts()).await?;
        assert_eq!(removed["body"], json!("private"));
        assert!(store.rows("notes").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn update_where_touches_only_own_rows() -> anyhow::Result<()> {
        let (store, ours, _theirs) = setup();
        store.seed(
            "reading_sessions",
            [
                record(json!({"id": "s1", "app_id": "bookbuddy", "minutes": 10})),
                record(json!({"id": "s2", "app_id": "bookbuddy", "minutes": 40})),
                record(json!({"id": "s3", "app_id": "otherapp", "minutes": 50})),
            ],
        )?;

        let page = ours
            .update_where(
                AppTable::ReadingSessions,
                record(json!({"long": true})),
                &[Filter::gte("minutes", 30)],
                &opts(),
            )
            .await?;

        assert_eq!(page.count, 1);
        assert_eq!(page.records[0]["id"], json!("s2"));
        let flagged: Vec<_> = store
            .rows("reading_sessions")
            .into_iter()
            .filter(|r| r.get("long").is_some())
            .collect();
        assert_eq!(flagged.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn offset_pagination_returns_requested_window() -> anyhow::Result<()> {
        let (store, ours, _theirs) = setup();
        store.seed(
            "books",
            (0..50).map(|n| record(json!({"id": format!("b{n}"), "app_id": "bookbuddy", "n": n}))),
        )?;

        let page = ours
            .fetch_all(
                AppTable::Books,
                &[],
                &opts().with_order(Order::asc("n")).with_limit(10).with_offset(20),
            )
            .await?;

        let ns: Vec<i64> = page.records.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, (20..30).collect::<Vec<_>>());
        assert_eq!(page.count, 50);

        let default_sized = ours
            .fetch_all(AppTable::Books, &[], &opts().with_order(Order::asc("n")).with_offset(45))
            .await?;
        assert_eq!(default_sized.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn shared_profiles_bypass_isolation() -> anyhow::Result<()> {
        let (store, ours, theirs) = setup();
        let user = bookbuddy_core::UserId::new();

        ours.create(
            AppTable::Profiles,
            record(json!({"id": user.to_string(), "display_name": "Ada"})),
            &opts(),
        )
        .await?;

        let profile = theirs
            .fetch_by_id(AppTable::Profiles, json!(user.to_string()), &opts())
            .await?;
        assert_eq!(profile["display_name"], json!("Ada"));
        assert!(!store.rows("profiles")[0].contains_key("app_id"));
        Ok(())
    }

    #[tokio::test]
    async fn upsert_on_composite_conflict_target_keeps_one_row() -> anyhow::Result<()> {
        let (store, ours, theirs) = setup();
        let options = opts().with_on_conflict("user_id,app_id");

        ours.upsert(
            AppTable::ReadingStreaks,
            record(json!({"user_id": "u1", "current_streak": 1})),
            &options,
        )
        .await?;
        let second = ours
            .upsert(
                AppTable::ReadingStreaks,
                record(json!({"user_id": "u1", "current_streak": 2})),
                &options,
            )
            .await?;
        theirs
            .upsert(
                AppTable::ReadingStreaks,
                record(json!({"user_id": "u1", "current_streak": 7})),
                &options,
            )
            .await?;

        assert_eq!(second["current_streak"], json!(2));
        let ours_rows = ours.fetch_all(AppTable::ReadingStreaks, &[], &opts()).await?;
        assert_eq!(ours_rows.count, 1);
        assert_eq!(ours_rows.records[0]["current_streak"], json!(2));
        assert_eq!(store.rows("reading_streaks").len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_many_and_count() -> anyhow::Result<()> {
        let (_store, ours, _theirs) = setup();
        let options = opts().with_on_conflict("user_id,achievement_id");

        let rows = ours
            .upsert_many(
                AppTable::UserAchievements,
                vec![
                    record(json!({"user_id": "u1", "achievement_id": "first-book"})),
                    record(json!({"user_id": "u1", "achievement_id": "streak-7"})),
                    record(json!({"user_id": "u1", "achievement_id": "first-book", "seen": true})),
                ],
                &options,
            )
            .await?;
        assert_eq!(rows.len(), 3);

        let n = ours.count(AppTable::UserAchievements, &[Filter::eq("user_id", "u1")], &opts()).await?;
        assert_eq!(n, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscriptions_only_see_their_tenant() -> anyhow::Result<()> {
        let (store, ours, theirs) = setup();
        let bridge = SubscriptionBridge::new(store.clone(), ours.policy().clone());
        let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let seen = seen.clone();
            bridge
                .subscribe(
                    AppTable::Books,
                    ChangeKind::All,
                    move |event| seen.lock().unwrap().push(event),
                    &opts(),
                )
                .await?
        };
        assert_eq!(handle.channel(), "books:bookbuddy");

        theirs.create(AppTable::Books, record(json!({"title": "theirs"})), &opts()).await?;
        let book = ours.create(AppTable::Books, record(json!({"title": "ours"})), &opts()).await?;
        ours.update(AppTable::Books, book["id"].clone(), record(json!({"title": "ours 2"})), &opts())
            .await?;

        assert!(wait_until(|| seen.lock().unwrap().len() >= 2));
        std::thread::sleep(Duration::from_millis(150));
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert!(seen.iter().all(|e| {
                e.new_record().is_some_and(|r| r["app_id"] == json!("bookbuddy"))
            }));
            assert_eq!(seen[0].kind(), ChangeKind::Insert);
            assert_eq!(seen[1].kind(), ChangeKind::Update);
        }

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());

        ours.create(AppTable::Books, record(json!({"title": "after"})), &opts()).await?;
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(seen.lock().unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_the_handle_stops_delivery() -> anyhow::Result<()> {
        let (store, ours, _theirs) = setup();
        let bridge = SubscriptionBridge::new(store.clone(), ours.policy().clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let calls = calls.clone();
            bridge
                .subscribe(
                    AppTable::ReadingGoals,
                    ChangeKind::Insert,
                    move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                    },
                    &opts(),
                )
                .await?
        };

        ours.create(AppTable::ReadingGoals, record(json!({"target": 12})), &opts()).await?;
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));

        drop(handle);
        ours.create(AppTable::ReadingGoals, record(json!({"target": 24})), &opts()).await?;
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let (store, _ours, _theirs) = setup();
        let engine = CrudEngine::new(store.clone(), TenantPolicy::new("bookbuddy"))
            .with_call_timeout(Some(Duration::from_millis(50)));
        store.set_latency(Some(Duration::from_millis(500)));

        let err = engine.fetch_all(AppTable::Books, &[], &opts()).await.unwrap_err();
        assert_eq!(err, DataError::Timeout(Duration::from_millis(50)));
        assert!(err.is_retryable());

        store.set_latency(None);
        assert!(engine.fetch_all(AppTable::Books, &[], &opts()).await.is_ok());
    }

    #[tokio::test]
    async fn backend_failures_pass_through() {
        let (store, ours, _theirs) = setup();
        store.fail_next(DataError::Constraint("null value in column \"title\"".into()));

        let err = ours
            .create(AppTable::Books, record(json!({"author": "anon"})), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Constraint(_)));
        assert!(!err.is_programming_error());
        assert!(store.rows("books").is_empty());
    }

    #[tokio::test]
    async fn engine_and_storage_from_config() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_string_lossy().into_owned();
        let config = DataConfig::from_lookup(|key| match key {
            "BOOKBUDDY_APP_ID" => Some("otherapp".to_string()),
            "BOOKBUDDY_STORAGE_ROOT" => Some(root.clone()),
            "BOOKBUDDY_PUBLIC_URL" => Some("https://cdn.example/public/".to_string()),
            _ => None,
        })?;

        let engine = CrudEngine::from_config(Arc::new(InMemoryStore::new()), &config);
        let book = engine.create(AppTable::Books, record(json!({"title": "X"})), &opts()).await?;
        assert_eq!(book["app_id"], json!("otherapp"));

        let buckets = TenantBuckets::new(
            LocalObjectStore::new(config.storage_root.clone(), config.public_url.clone()),
            config.app_id.clone(),
        );
        let path = buckets
            .upload_object("covers", "b1.png", vec![1, 2, 3], &UploadOptions::default())
            .await?;
        assert_eq!(
            buckets.public_url("covers", &path),
            "https://cdn.example/public/otherapp-covers/b1.png"
        );
        assert!(dir.path().join("otherapp-covers/b1.png").exists());

        buckets.delete_objects("covers", &[path]).await?;
        assert!(!dir.path().join("otherapp-covers/b1.png").exists());
        Ok(())
    }

    fn rows_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((0i64..4, 0i64..10), 0..30)
    }

    proptest! {
        #[test]
        fn filter_order_does_not_change_results(rows in rows_strategy(), a in 0i64..4, b in 0i64..10) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            runtime.block_on(async {
                let store = Arc::new(InMemoryStore::new());
                store.seed(
                    "books",
                    rows.iter().enumerate().map(|(i, (x, y))| {
                        record(json!({"id": i.to_string(), "app_id": "bookbuddy", "a": x, "b": y}))
                    }),
                ).unwrap();
                let engine = CrudEngine::new(store, TenantPolicy::new("bookbuddy"));
                let options = opts().with_order(Order::asc("id"));

                let forward = engine
                    .fetch_all(AppTable::Books, &[Filter::eq("a", a), Filter::gt("b", b)], &options)
                    .await
                    .unwrap();
                let backward = engine
                    .fetch_all(AppTable::Books, &[Filter::gt("b", b), Filter::eq("a", a)], &options)
                    .await
                    .unwrap();

                prop_assert_eq!(forward, backward);
                Ok(())
            })?;
        }
    }
}
