use std::sync::Arc;
use std::time::Duration;

use azure_backend::{
    Azure, CacheError, EntryState, PlayerJoin, PlayerLeave, RequestError, RequestPolicy,
    config::Config, helpers,
};
use async_trait::async_trait;
use azure_db::{BackingStore, Database, PlayerId, PlayerName, PlayerRecord, Position};
use tokio::sync::Semaphore;

/// Helper to create test database with in-memory SQLite
async fn setup_test_db() -> Database {
    Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database")
}

/// Helper to create the service with default test configuration
fn create_test_azure(db: &Database) -> Azure {
    Azure::new(Arc::new(db.clone()), Config::default())
}

/// Database whose loads wait until the test lets them through
struct GatedStore {
    db: Database,
    gate: Semaphore,
}

#[async_trait]
impl BackingStore for GatedStore {
    async fn load_record(&self, id: PlayerId) -> azure_db::Result<Option<PlayerRecord>> {
        let _permit = self.gate.acquire().await;
        self.db.load_record(id).await
    }

    async fn save_record(&self, record: &PlayerRecord) -> azure_db::Result<()> {
        self.db.save_record(record).await
    }
}

fn join(id: PlayerId, name: &str, now: i64) -> PlayerJoin {
    PlayerJoin {
        id,
        name: name.to_string(),
        address: Some("203.0.113.7".to_string()),
        locale: Some("en_us".to_string()),
        now,
    }
}

fn spawn_point() -> Position {
    Position::new("world", 12.5, 64.0, -8.25, 90.0, 0.0)
}

/// Background saves are fire-and-forget; poll until one lands
async fn wait_for_saved(db: &Database, id: PlayerId, check: impl Fn(&PlayerRecord) -> bool) -> PlayerRecord {
    for _ in 0..100 {
        if let Some(record) = db.get_record(id).await.unwrap() {
            if check(&record) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("record for {} was never saved", id);
}

// =============================================================================
// JOIN / LEAVE TESTS
// =============================================================================

#[tokio::test]
async fn test_first_join_creates_and_persists_record() {
    // GIVEN: A player the store has never seen
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();

    // WHEN: They join
    let record = azure.on_join(join(id, "Steve", 1000)).await.unwrap();

    // THEN: A record is cached for the session and stored
    assert_eq!(record.name.as_str(), "Steve");
    assert_eq!(record.last_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(record.last_seen, 1000);
    assert_eq!(azure.players().state(id), EntryState::Present);
    assert!(db.get_record(id).await.unwrap().is_some());
    assert_eq!(azure.names().resolve_name("steve"), Some(id));
}

#[tokio::test]
async fn test_join_rejects_invalid_name() {
    // GIVEN: A fresh service
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();

    // WHEN: A join reports a name with invalid characters
    let result = azure.on_join(join(id, "not a name!", 1000)).await;

    // THEN: Nothing is cached or stored
    assert!(matches!(result, Err(CacheError::InvalidName(_))));
    assert_eq!(azure.players().state(id), EntryState::Absent);
    assert!(db.get_record(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_leave_schedules_eviction_and_saves() {
    // GIVEN: An online player
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "Alex", 1000)).await.unwrap();

    // WHEN: They leave
    assert!(azure.on_leave(PlayerLeave {
        id,
        position: Some(spawn_point()),
        now: 2000,
    }));

    // THEN: The record waits out the grace period and its last position is stored
    let grace = azure.config().cache_grace_period.as_secs() as i64;
    assert_eq!(
        azure.players().state(id),
        EntryState::ScheduledForEviction { at: 2000 + grace }
    );
    let stored = wait_for_saved(&db, id, |record| record.last_position.is_some()).await;
    assert_eq!(stored.last_position, Some(spawn_point()));
    assert_eq!(stored.last_seen, 2000);
}

#[tokio::test]
async fn test_leave_for_unknown_player_is_ignored() {
    // GIVEN: A player that never joined
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);

    // WHEN/THEN: The leave event changes nothing
    assert!(!azure.on_leave(PlayerLeave {
        id: PlayerId::new_v4(),
        position: None,
        now: 0,
    }));
    assert!(azure.players().is_empty());
}

#[tokio::test]
async fn test_rejoin_within_grace_period_keeps_entry() {
    // GIVEN: A player who left a moment ago
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "Steve", 0)).await.unwrap();
    azure.on_leave(PlayerLeave {
        id,
        position: Some(spawn_point()),
        now: 0,
    });

    // WHEN: They come back before the grace period ends
    let record = azure.on_join(join(id, "Steve", 900)).await.unwrap();

    // THEN: The cached record is reused and no sweep evicts it
    assert_eq!(record.last_position, Some(spawn_point()));
    assert_eq!(azure.players().state(id), EntryState::Present);
    let report = azure.players().evict_expired(1_000_000).await;
    assert_eq!(report.evicted, 0);
}

#[tokio::test]
async fn test_rejoin_after_eviction_reloads_from_store() {
    // GIVEN: A player whose entry was evicted after they left
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "Steve", 0)).await.unwrap();
    azure
        .set_home(id, "base", Position::new("world", 1.0, 70.0, 1.0, 0.0, 0.0))
        .await
        .unwrap();
    azure.on_leave(PlayerLeave {
        id,
        position: Some(spawn_point()),
        now: 0,
    });
    let grace = azure.config().cache_grace_period.as_secs() as i64;
    // The save started by the leave may still be running; the sweep defers until it lands
    for _ in 0..100 {
        azure.players().evict_expired(grace).await;
        if azure.players().state(id) == EntryState::Absent {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(azure.players().state(id), EntryState::Absent);

    // WHEN: They join again
    let record = azure.on_join(join(id, "Steve", grace + 10)).await.unwrap();

    // THEN: Everything saved before eviction is back
    assert_eq!(record.last_position, Some(spawn_point()));
    assert!(record.home("base").is_some());
    assert_eq!(record.last_seen, grace + 10);
}

#[tokio::test]
async fn test_rename_on_join_updates_index_and_record() {
    // GIVEN: A known player
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "OldName", 0)).await.unwrap();

    // WHEN: They join under a new name
    let record = azure.on_join(join(id, "NewName", 10)).await.unwrap();

    // THEN: Only the new name resolves
    assert_eq!(record.name.as_str(), "NewName");
    assert_eq!(azure.names().resolve_name("NewName"), Some(id));
    assert_eq!(azure.names().resolve_name("OldName"), None);
}

#[tokio::test]
async fn test_leave_during_join_load_still_expires() {
    // GIVEN: A join whose record load is still in flight
    let db = setup_test_db().await;
    let store = Arc::new(GatedStore {
        db: db.clone(),
        gate: Semaphore::new(0),
    });
    let azure = Arc::new(Azure::new(store.clone(), Config::default()));
    let id = PlayerId::new_v4();
    let joining = {
        let azure = Arc::clone(&azure);
        tokio::spawn(async move { azure.on_join(join(id, "Steve", 1000)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(azure.players().state(id), EntryState::Pending);

    // WHEN: The player leaves before the load completes
    assert!(azure.on_leave(PlayerLeave {
        id,
        position: None,
        now: 1001,
    }));
    store.gate.add_permits(1);
    joining.await.unwrap().unwrap();

    // THEN: The record is not pinned and leaves the cache after its grace period
    assert!(matches!(
        azure.players().state(id),
        EntryState::ScheduledForEviction { .. }
    ));
    for _ in 0..100 {
        azure.players().evict_expired(i64::MAX).await;
        if azure.players().state(id) == EntryState::Absent {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(azure.players().state(id), EntryState::Absent);
}

// =============================================================================
// OFFLINE LOOKUP TESTS
// =============================================================================

#[tokio::test]
async fn test_offline_player_found_by_name_after_warm() {
    // GIVEN: A stored player that has not joined since startup
    let db = setup_test_db().await;
    let id = PlayerId::new_v4();
    let name = PlayerName::try_from("Notch").unwrap();
    db.put_record(PlayerRecord::new(id, name, 500)).await.unwrap();
    let azure = create_test_azure(&db);

    // WHEN: Names are warmed and the player is looked up by name
    assert_eq!(azure.warm_names().await.unwrap(), 1);
    let record = azure.players().get_by_name("NOTCH").await.unwrap().unwrap();

    // THEN: The record is loaded and scheduled to leave the cache again
    assert_eq!(record.id, id);
    assert!(matches!(
        azure.players().state(id),
        EntryState::ScheduledForEviction { .. }
    ));
}

#[tokio::test]
async fn test_unknown_name_without_warm_is_none() {
    // GIVEN: A stored player but a cold name index
    let db = setup_test_db().await;
    let id = PlayerId::new_v4();
    db.put_record(PlayerRecord::new(id, PlayerName::try_from("Jeb_").unwrap(), 0))
        .await
        .unwrap();
    let azure = create_test_azure(&db);

    // WHEN/THEN: Name lookups only consult the index
    assert!(azure.players().get_by_name("Jeb_").await.unwrap().is_none());
    assert!(azure.players().is_empty());
}

#[tokio::test]
async fn test_offline_edit_does_not_steal_reassigned_name() {
    // GIVEN: "Steve" was stored for one player but now belongs to another
    let db = setup_test_db().await;
    let former = PlayerId::new_v4();
    db.put_record(PlayerRecord::new(former, PlayerName::try_from("Steve").unwrap(), 0))
        .await
        .unwrap();
    let azure = create_test_azure(&db);
    azure.warm_names().await.unwrap();
    let current = PlayerId::new_v4();
    azure.on_join(join(current, "Steve", 100)).await.unwrap();

    // WHEN: The former owner is loaded and edited while offline
    azure.players().get(former).await.unwrap();
    azure.set_home(former, "base", spawn_point()).await.unwrap();

    // THEN: The name still resolves to the player currently using it
    assert_eq!(azure.names().resolve_name("Steve"), Some(current));
    let found = azure.players().get_by_name("steve").await.unwrap().unwrap();
    assert_eq!(found.id, current);
}

// =============================================================================
// HOME TESTS
// =============================================================================

#[tokio::test]
async fn test_homes_set_and_remove() {
    // GIVEN: An online player
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "Steve", 0)).await.unwrap();

    // WHEN: They set, move and remove a home
    let first = azure.set_home(id, "base", spawn_point()).await.unwrap();
    let moved = Position::new("world_nether", 0.0, 32.0, 0.0, 0.0, 0.0);
    let replaced = azure.set_home(id, "base", moved.clone()).await.unwrap();
    let removed = azure.remove_home(id, "base").await.unwrap();

    // THEN: Each call reports what it replaced
    assert_eq!(first, None);
    assert_eq!(replaced, Some(spawn_point()));
    assert_eq!(removed, Some(moved));
    assert!(azure.players().get_if_present(id).unwrap().homes.is_empty());
}

#[tokio::test]
async fn test_invalid_home_name_is_rejected() {
    // GIVEN: An online player
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "Steve", 0)).await.unwrap();

    // WHEN: They use a home name with a space
    let result = azure.set_home(id, "my base", spawn_point()).await;

    // THEN: The home is refused
    assert!(matches!(result, Err(CacheError::InvalidName(_))));
}

// =============================================================================
// REQUEST TESTS
// =============================================================================

#[tokio::test]
async fn test_request_lifecycle() {
    // GIVEN: Two players
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let (alice, bob) = (PlayerId::new_v4(), PlayerId::new_v4());

    // WHEN: Alice asks Bob, then asks again
    azure.send_request(alice, bob).await.unwrap();
    let again = azure.send_request(alice, bob).await;

    // THEN: The default policy refuses the duplicate
    assert!(matches!(again, Err(RequestError::AlreadyPending { .. })));
    assert_eq!(azure.config().request_policy, RequestPolicy::Reject);

    // AND: Bob sees and answers the request exactly once
    let pending = azure.pending_requests(bob).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, alice);
    assert!(azure.answer_request(alice, bob).await.is_some());
    assert!(azure.answer_request(alice, bob).await.is_none());
    assert!(azure.requests().is_empty());
}

#[tokio::test]
async fn test_request_to_wrong_target_is_not_answered() {
    // GIVEN: Alice asked Bob
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    let (alice, bob, carol) = (PlayerId::new_v4(), PlayerId::new_v4(), PlayerId::new_v4());
    azure.send_request(alice, bob).await.unwrap();

    // WHEN/THEN: Carol cannot answer it
    assert!(azure.answer_request(alice, carol).await.is_none());
    assert_eq!(azure.requests().len(), 1);
}

// =============================================================================
// LIFECYCLE TESTS
// =============================================================================

#[tokio::test]
async fn test_shutdown_flushes_unsaved_records() {
    // GIVEN: A running service with an unsaved edit
    let db = setup_test_db().await;
    let azure = create_test_azure(&db);
    assert!(azure.start_reaper());
    assert!(!azure.start_reaper());
    let id = PlayerId::new_v4();
    azure.on_join(join(id, "Steve", helpers::now())).await.unwrap();
    azure.set_home(id, "base", spawn_point()).await.unwrap();

    // WHEN: The service shuts down
    let report = azure.shutdown().await;

    // THEN: The edit reached the store
    assert_eq!(report.failed, 0);
    let stored = db.get_record(id).await.unwrap().unwrap();
    assert_eq!(stored.home("base"), Some(&spawn_point()));
}
