//! Concurrent commands racing on one handoff

use crate::test_utils::*;
use custody_core::{CustodyError, ErrorKind};
use custody_handoff::{DisputeReason, Handoff, HandoffService, HandoffStatus, Outcome};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const RACERS: usize = 8;

fn race<F>(service: &Arc<HandoffService>, racers: usize, command: F) -> Vec<Result<Outcome, CustodyError>>
where
    F: Fn(&HandoffService, usize) -> Result<Outcome, CustodyError> + Sync,
{
    let barrier = Barrier::new(racers);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..racers)
            .map(|i| {
                let barrier = &barrier;
                let command = &command;
                let service = Arc::clone(service);
                scope.spawn(move || {
                    barrier.wait();
                    command(&service, i)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn count_events(handoff: &Handoff, event: &str) -> usize {
    handoff.audit.iter().filter(|e| e.event == event).count()
}

fn assert_single_receiver_confirmation(world: &TestWorld) {
    let handoff = world.service.create(&supervisor(), step1_request("R1")).unwrap();
    world.service.confirm(&supervisor(), &handoff.id).unwrap();
    let token = token_of(&handoff);

    let results = race(&world.service, RACERS, |service, _| service.confirm_by_token(&token));

    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(o) if o.applied))
        .count();
    assert_eq!(applied, 1, "exactly one racer may apply the confirmation");

    // Losers see a harmless repeat, never a retired-token error
    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(
                    err.kind(),
                    ErrorKind::ConcurrencyConflict | ErrorKind::InvalidTransition
                ),
                "unexpected error {:?}",
                err
            );
        }
    }

    let stored = world.service.get(&handoff.id).unwrap();
    assert_eq!(stored.status, HandoffStatus::Completed);
    assert_eq!(count_events(&stored, "receiver_confirm"), 1);
    assert_eq!(stored.total_containers, 2);
    assert!(stored.check_invariants().is_ok());
}

#[test]
fn test_token_confirmation_race_in_memory() {
    assert_single_receiver_confirmation(&TestWorld::in_memory());
}

#[test]
fn test_token_confirmation_race_sqlite() {
    let dir = TempDir::new().unwrap();
    assert_single_receiver_confirmation(&TestWorld::sqlite(&dir.path().join("race.db")));
}

#[test]
fn test_both_sides_confirm_concurrently() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("R2")).unwrap();

    let results = race(&world.service, 2, |service, i| {
        if i == 0 {
            service.confirm(&supervisor(), &handoff.id)
        } else {
            service.confirm(&driver(), &handoff.id)
        }
    });

    // The loser of the first compare-and-swap retries on fresh state and lands
    assert!(results.iter().all(|r| r.is_ok()));
    let stored = world.service.get(&handoff.id).unwrap();
    assert_eq!(stored.status, HandoffStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(count_events(&stored, "sender_confirm"), 1);
    assert_eq!(count_events(&stored, "receiver_confirm"), 1);
    assert!(stored.check_invariants().is_ok());
}

#[test]
fn test_confirm_races_dispute() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("R3")).unwrap();

    let results = race(&world.service, 2, |service, i| {
        if i == 0 {
            service.confirm(&supervisor(), &handoff.id)
        } else {
            service.dispute(&driver(), &handoff.id, DisputeReason::MissingContainer, None)
        }
    });

    let stored = world.service.get(&handoff.id).unwrap();
    assert!(results[1].is_ok(), "dispute is legal from either pre-state");
    assert_eq!(stored.status, HandoffStatus::Disputed);
    assert!(stored.check_invariants().is_ok());
    if let Err(err) = &results[0] {
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}

#[test]
fn test_sweep_races_confirmation_at_deadline() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("R4")).unwrap();
    let token = token_of(&handoff);
    world.clock.advance(TEST_TTL);

    let results = race(&world.service, RACERS, |service, i| {
        if i % 2 == 0 {
            service.expire_due().and_then(|_| {
                Ok(Outcome {
                    handoff: service.get(&handoff.id)?,
                    applied: false,
                })
            })
        } else {
            service.confirm_by_token(&token)
        }
    });

    for (i, result) in results.iter().enumerate() {
        if i % 2 == 1 {
            assert_eq!(result.as_ref().unwrap_err().kind(), ErrorKind::TokenExpired);
        }
    }
    let stored = world.service.get(&handoff.id).unwrap();
    assert_eq!(stored.status, HandoffStatus::Expired);
    assert_eq!(count_events(&stored, "expire"), 1);
    assert!(stored.check_invariants().is_ok());
}
