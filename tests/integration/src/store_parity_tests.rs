//! The in-memory and SQLite stores must behave identically behind the service

use crate::test_utils::*;
use custody_core::ErrorKind;
use custody_handoff::{
    DisputeReason, HandoffFilter, HandoffStatus, HandoffStore, InMemoryHandoffStore,
    SqliteHandoffStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Drive one fixed command script and return a comparable summary.
fn run_script(world: &TestWorld) -> Vec<(String, HandoffStatus, usize)> {
    let a = world.service.create(&supervisor(), step1_request("P1")).unwrap();
    world.clock.advance(Duration::from_secs(1));
    let b = world.service.create(&supervisor(), step1_request("P2")).unwrap();
    world.clock.advance(Duration::from_secs(1));
    let c = world.service.create(&driver(), step2_request("P1")).unwrap();

    world.service.confirm(&supervisor(), &a.id).unwrap();
    world.service.confirm_by_token(&token_of(&a)).unwrap();

    world
        .service
        .dispute(&driver(), &b.id, DisputeReason::WrongWeight, None)
        .unwrap();
    world.service.begin_resolution(&supervisor(), &b.id).unwrap();
    world.service.resolve(&supervisor(), &b.id, "reweighed at depot").unwrap();

    world.clock.advance(TEST_TTL);
    world.service.expire_due().unwrap();
    assert_eq!(
        world.service.confirm_by_token(&token_of(&c)).unwrap_err().kind(),
        ErrorKind::TokenExpired
    );

    world
        .service
        .list(&HandoffFilter::default())
        .unwrap()
        .into_iter()
        .map(|h| {
            assert!(h.check_invariants().is_ok());
            (h.handoff_id, h.status, h.audit.len())
        })
        .collect()
}

#[test]
fn test_same_script_same_result() {
    let dir = TempDir::new().unwrap();
    let memory = run_script(&TestWorld::in_memory());
    let sqlite = run_script(&TestWorld::sqlite(&dir.path().join("parity.db")));

    assert_eq!(memory, sqlite);
    assert_eq!(
        memory.iter().map(|(code, status, _)| (code.as_str(), *status)).collect::<Vec<_>>(),
        vec![
            ("DI-000001", HandoffStatus::Expired),
            ("FD-000002", HandoffStatus::Resolved),
            ("FD-000001", HandoffStatus::Completed),
        ]
    );
}

#[test]
fn test_sqlite_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("restart.db");

    let (id, token) = {
        let world = TestWorld::sqlite(&path);
        let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();
        world.service.confirm(&supervisor(), &handoff.id).unwrap();
        (handoff.id.clone(), token_of(&handoff))
    };

    let world = TestWorld::sqlite(&path);
    let reloaded = world.service.get(&id).unwrap();
    assert_eq!(reloaded.status, HandoffStatus::ConfirmedBySender);

    let done = world.service.confirm_by_token(&token).unwrap();
    assert_eq!(done.handoff.status, HandoffStatus::Completed);
    assert_eq!(world.service.notifications(&id).unwrap().len(), 1);

    // Sequence continues after restart
    let next = world.service.create(&supervisor(), step1_request("S2")).unwrap();
    assert_eq!(next.handoff_id, "FD-000002");
}

#[test]
fn test_version_conflict_parity() {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Arc<dyn HandoffStore>> = vec![
        Arc::new(InMemoryHandoffStore::new()),
        Arc::new(SqliteHandoffStore::open(dir.path().join("cas.db")).unwrap()),
    ];

    for store in stores {
        let world = TestWorld::with_store(store.clone());
        let handoff = world.service.create(&supervisor(), step1_request("V1")).unwrap();
        let version = handoff.version;

        store.replace(version, handoff.clone()).unwrap();
        let err = store.replace(version, handoff.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert_eq!(store.get(&handoff.id).unwrap().version, version + 1);
    }
}
