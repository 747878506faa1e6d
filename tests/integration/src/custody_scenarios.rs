//! End-to-end custody scenarios

use crate::test_utils::*;
use custody_core::{audit, ErrorKind};
use custody_handoff::{
    ContainerLine, DeliveryStatus, DisputeReason, HandoffFilter, HandoffStatus, HandoffType,
    PublicGateway,
};
use proptest::prelude::*;

#[test]
fn test_two_container_scenario_completes() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();

    assert_eq!(handoff.total_containers, 2);
    assert_eq!(handoff.total_declared_weight, 5.0);
    assert_eq!(handoff.status, HandoffStatus::Pending);
    let token = token_of(&handoff);

    let sender = world.service.confirm(&supervisor(), &handoff.id).unwrap();
    assert_eq!(sender.handoff.status, HandoffStatus::ConfirmedBySender);

    let receiver = world.service.confirm_by_token(&token).unwrap();
    assert_eq!(receiver.handoff.status, HandoffStatus::Completed);
    assert!(receiver.handoff.completed_at.is_some());
    assert!(receiver.handoff.confirmation_token.is_none());
    assert!(receiver.handoff.check_invariants().is_ok());

    // created → pending → confirmed_by_sender → completed
    let trail = &receiver.handoff.audit;
    let path: Vec<_> = trail.iter().map(|e| e.to.as_str()).collect();
    assert_eq!(path, vec!["created", "pending", "confirmed_by_sender", "completed"]);
    assert_eq!(audit::first_break(trail, &receiver.handoff.id), None);
}

#[test]
fn test_dispute_then_resolution_blocks_confirmation() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();

    let disputed = world
        .service
        .dispute(&driver(), &handoff.id, DisputeReason::WrongWeight, None)
        .unwrap();
    assert_eq!(disputed.handoff.status, HandoffStatus::Disputed);

    let resolved = world
        .service
        .resolve(&supervisor(), &handoff.id, "corrected weight")
        .unwrap();
    assert_eq!(resolved.handoff.status, HandoffStatus::Resolved);
    assert!(resolved.handoff.completed_at.is_none());

    for caller in [supervisor(), driver()] {
        let err = world.service.confirm(&caller, &handoff.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}

#[test]
fn test_second_dispute_rejected() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();
    world
        .service
        .dispute(&driver(), &handoff.id, DisputeReason::WrongCount, None)
        .unwrap();

    let err = world
        .service
        .dispute(&supervisor(), &handoff.id, DisputeReason::DamagedContainer, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[test]
fn test_dispute_after_one_sided_confirmation() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();
    world.service.confirm(&driver(), &handoff.id).unwrap();

    let disputed = world
        .service
        .dispute(
            &supervisor(),
            &handoff.id,
            DisputeReason::Other,
            Some("lid seal broken on arrival".to_string()),
        )
        .unwrap();
    assert_eq!(disputed.handoff.status, HandoffStatus::Disputed);
    assert!(disputed.handoff.receiver.confirmed_at.is_some());
}

#[test]
fn test_chain_with_only_step1_completed() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();
    world.service.confirm(&supervisor(), &handoff.id).unwrap();
    world.service.confirm(&driver(), &handoff.id).unwrap();

    let chain = world.service.chain("S1").unwrap();
    assert_eq!(chain.chain_id, "chain-S1");
    assert_eq!(chain.step1.as_ref().unwrap().status, HandoffStatus::Completed);
    assert!(chain.step2.is_none());
    assert_eq!(chain.progress, 0.5);
}

#[test]
fn test_full_chain_through_incinerator() {
    let world = TestWorld::in_memory();
    let step1 = world.service.create(&supervisor(), step1_request("S7")).unwrap();
    world.service.confirm(&supervisor(), &step1.id).unwrap();
    world.service.confirm(&driver(), &step1.id).unwrap();

    let step2 = world.service.create(&driver(), step2_request("S7")).unwrap();
    assert_eq!(step2.handoff_id, "DI-000001");
    assert_eq!(step2.chain_id, step1.chain_id);
    assert!(step2.receiver.identity.is_none());

    let gateway = PublicGateway::new(world.service.clone());
    let token = token_of(&step2);
    let (view, applied) = gateway.confirm_by_token(&token).unwrap();
    assert!(applied);
    assert_eq!(view.status, HandoffStatus::ConfirmedByReceiver);
    world.service.confirm(&driver(), &step2.id).unwrap();

    let chain = world.service.chain("S7").unwrap();
    assert!(chain.is_complete());
    assert_eq!(world.service.get_by_chain("S7").unwrap().len(), 2);
}

#[test]
fn test_token_rules() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();
    let token = token_of(&handoff);

    // Live pending handoff resolves
    assert_eq!(world.service.resolve_token(&token).unwrap().id, handoff.id);

    // Completed handoff: token retired
    world.service.confirm(&supervisor(), &handoff.id).unwrap();
    world.service.confirm_by_token(&token).unwrap();
    assert_eq!(
        world.service.resolve_token(&token).unwrap_err().kind(),
        ErrorKind::TokenExpired
    );

    // Expired handoff: token retired
    let other = world.service.create(&supervisor(), step1_request("S2")).unwrap();
    let other_token = token_of(&other);
    world.clock.advance(TEST_TTL);
    assert_eq!(
        world.service.resolve_token(&other_token).unwrap_err().kind(),
        ErrorKind::TokenExpired
    );

    assert_eq!(
        world.service.resolve_token(&"0".repeat(64)).unwrap_err().kind(),
        ErrorKind::TokenInvalid
    );
}

#[test]
fn test_expiry_measured_from_last_transition() {
    let world = TestWorld::in_memory();
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();

    world.clock.advance(TEST_TTL / 2);
    world.service.confirm(&supervisor(), &handoff.id).unwrap();

    world.clock.advance(TEST_TTL / 2);
    assert_eq!(world.service.expire_due().unwrap(), 0);

    world.clock.advance(TEST_TTL / 2);
    assert_eq!(world.service.expire_due().unwrap(), 1);
    let expired = world.service.get(&handoff.id).unwrap();
    assert_eq!(expired.status, HandoffStatus::Expired);
    assert!(expired.confirmation_token.is_none());
    assert_eq!(
        world.service.confirm(&driver(), &handoff.id).unwrap_err().kind(),
        ErrorKind::InvalidTransition
    );
}

#[test]
fn test_notification_failure_is_best_effort() {
    let world = TestWorld::in_memory();
    world.notifier.set_failing(true);
    let handoff = world.service.create(&supervisor(), step1_request("S1")).unwrap();
    assert_eq!(handoff.status, HandoffStatus::Pending);

    world.notifier.set_failing(false);
    world
        .service
        .resend_notification(&supervisor(), &handoff.id, None)
        .unwrap();

    let log = world.service.notifications(&handoff.id).unwrap();
    let statuses: Vec<_> = log.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![DeliveryStatus::Failed, DeliveryStatus::Sent]);
    assert_eq!(world.notifier.sent().len(), 2);
}

#[test]
fn test_list_is_newest_first_and_filtered() {
    let world = TestWorld::in_memory();
    let first = world.service.create(&supervisor(), step1_request("S1")).unwrap();
    world.clock.advance(std::time::Duration::from_secs(1));
    let second = world.service.create(&facility_staff(), step1_request("S2")).unwrap();
    world.service.confirm(&facility_staff(), &second.id).unwrap();

    let all = world.service.list(&HandoffFilter::default()).unwrap();
    assert_eq!(all[0].id, second.id);
    assert_eq!(all[1].id, first.id);

    let pending = world
        .service
        .list(&HandoffFilter {
            status: Some(HandoffStatus::Pending),
            handoff_type: Some(HandoffType::FacilityToDriver),
        })
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first.id);
}

#[test]
fn test_company_mismatch_rejected() {
    let world = TestWorld::in_memory();
    let mut request = step1_request("S1");
    request.containers.push(ContainerLine::new("L1"));
    assert_eq!(
        world.service.create(&supervisor(), request).unwrap_err().kind(),
        ErrorKind::ValidationError
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_totals_match_containers(
        weights in proptest::collection::vec(proptest::option::of(0.0f64..500.0), 1..3)
    ) {
        let world = TestWorld::in_memory();
        let refs = ["C1", "C2", "C3"];
        let mut request = step1_request("P1");
        request.containers = weights
            .iter()
            .zip(refs.iter())
            .map(|(w, r)| {
                let line = ContainerLine::new(*r);
                match w {
                    Some(w) => line.with_weight(*w),
                    None => line,
                }
            })
            .collect();

        let handoff = world.service.create(&supervisor(), request).unwrap();
        let expected: f64 = weights.iter().map(|w| w.unwrap_or(0.0)).sum();
        prop_assert_eq!(handoff.total_containers, weights.len());
        prop_assert!((handoff.total_declared_weight - expected).abs() < 1e-9);
        prop_assert!(handoff.check_invariants().is_ok());
    }
}
