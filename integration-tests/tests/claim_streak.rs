#![allow(non_snake_case)]

use integration_tests::TestContext;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::thread;
use streaks::{
    analyzer::Disqualification,
    app::ledger::{
        ClaimLedger,
        RoundSettlement,
    },
    coordinator::ClaimOutcome,
    records::StreakCandidate,
};
use tokio::runtime::{
    Builder,
    Runtime,
};

#[tokio::test]
async fn claim__scenario_streak__is_paid_once_and_recorded_once() {
    let ctx = TestContext::new();
    let alice = ctx.alice();

    // given
    ctx.settle(1, &[(&alice, true, Decimal::new(25, 1))]);
    ctx.settle(2, &[(&alice, true, Decimal::new(30, 1))]);
    ctx.settle(3, &[(&alice, true, Decimal::new(28, 1))]);
    let coordinator = ctx.coordinator();
    let evaluation = coordinator.evaluate(&alice, Some(3)).unwrap();
    let candidate = evaluation.candidate.clone().expect("qualified");
    assert_eq!(
        candidate,
        StreakCandidate {
            start_round: 1,
            end_round: 3,
            round_count: 3,
            total_reward: Decimal::new(83, 1),
        }
    );

    // when
    let first = coordinator.claim(&alice, &candidate).await.unwrap();
    let second = coordinator.claim(&alice, &candidate).await.unwrap();

    // then
    assert_eq!(
        first,
        ClaimOutcome::Success {
            amount_paid: 8,
            start_round: 1,
            end_round: 3,
        }
    );
    assert_eq!(second, ClaimOutcome::AlreadyClaimed);
    assert_eq!(ctx.claims().claims(&alice).unwrap().len(), 1);
    assert_eq!(ctx.payouts().total_credited(&alice), 8);
}

#[test]
fn claim__racing_threads__exactly_one_payout() {
    let ctx = TestContext::new();
    let alice = ctx.alice();

    // given
    for round_id in 10..=14 {
        ctx.settle(round_id, &[(&alice, true, Decimal::TWO)]);
    }
    let candidate = ctx
        .coordinator()
        .evaluate_now(&alice)
        .unwrap()
        .candidate
        .expect("qualified");

    // when
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = ctx.coordinator();
            let alice = alice.clone();
            let candidate = candidate.clone();
            thread::spawn(move || {
                let rt = Builder::new_current_thread().enable_all().build().unwrap();
                rt.block_on(coordinator.claim(&alice, &candidate)).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<ClaimOutcome> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    // then
    let successes = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, ClaimOutcome::Success { .. }))
        .count();
    assert_eq!(successes, 1, "{outcomes:?}");
    assert!(
        outcomes
            .iter()
            .all(|outcome| matches!(
                outcome,
                ClaimOutcome::Success { .. } | ClaimOutcome::AlreadyClaimed
            ))
    );
    assert_eq!(ctx.claims().claims(&alice).unwrap().len(), 1);
    assert_eq!(ctx.payouts().total_credited(&alice), 10);
}

#[tokio::test]
async fn claim__players_in_same_rounds__claim_independently() {
    let ctx = TestContext::new();
    let alice = ctx.alice();
    let bob = ctx.bob();

    // given
    for round_id in 1..=3 {
        ctx.settle(
            round_id,
            &[(&alice, true, Decimal::ONE), (&bob, true, Decimal::TEN)],
        );
    }
    let coordinator = ctx.coordinator();
    let alice_offer = coordinator.evaluate_now(&alice).unwrap().candidate.unwrap();
    let bob_offer = coordinator.evaluate_now(&bob).unwrap().candidate.unwrap();

    // when
    let alice_outcome = coordinator.claim(&alice, &alice_offer).await.unwrap();
    let bob_outcome = coordinator.claim(&bob, &bob_offer).await.unwrap();

    // then
    assert!(matches!(alice_outcome, ClaimOutcome::Success { amount_paid: 3, .. }));
    assert!(matches!(bob_outcome, ClaimOutcome::Success { amount_paid: 30, .. }));
}

#[tokio::test]
async fn evaluate__player_misses_live_round__offer_goes_stale() {
    let ctx = TestContext::new();
    let alice = ctx.alice();
    let bob = ctx.bob();

    // given
    for round_id in 21..=23 {
        ctx.settle(
            round_id,
            &[(&alice, true, Decimal::ONE), (&bob, true, Decimal::ONE)],
        );
    }
    let coordinator = ctx.coordinator();
    let offer = coordinator.evaluate_now(&alice).unwrap().candidate.unwrap();

    // when
    ctx.guesses().open_round(24).unwrap();
    ctx.settle(24, &[(&bob, true, Decimal::ONE)]);
    let evaluation = coordinator.evaluate_now(&alice).unwrap();
    let outcome = coordinator.claim(&alice, &offer).await.unwrap();

    // then
    assert!(evaluation.has_reason(Disqualification::CurrentRoundSkipped));
    assert_eq!(
        outcome,
        ClaimOutcome::StreakNoLongerValid {
            reason: "current round skipped".to_string(),
        }
    );
    assert_eq!(ctx.payouts().attempts(), 0);
}

#[tokio::test]
async fn claim__next_round_open_and_taking_guesses__still_pays() {
    let ctx = TestContext::new();
    let alice = ctx.alice();

    // given
    for round_id in 5..=7 {
        ctx.settle(round_id, &[(&alice, true, Decimal::TWO)]);
    }
    let coordinator = ctx.coordinator();
    let offer = coordinator.evaluate_now(&alice).unwrap().candidate.unwrap();

    // when
    ctx.guesses().open_round(8).unwrap();
    let outcome = coordinator.claim(&alice, &offer).await.unwrap();

    // then
    assert_eq!(
        outcome,
        ClaimOutcome::Success {
            amount_paid: 6,
            start_round: 5,
            end_round: 7,
        }
    );
}

#[test]
fn claim__stale_and_fresh_offers_in_parallel__record_one_claim() {
    let ctx = TestContext::new();
    let alice = ctx.alice();

    // given
    for round_id in 1..=3 {
        ctx.settle(round_id, &[(&alice, true, Decimal::ONE)]);
    }
    let coordinator = ctx.coordinator();
    let short_offer = coordinator.evaluate_now(&alice).unwrap().candidate.unwrap();
    ctx.settle(4, &[(&alice, true, Decimal::ONE)]);
    let long_offer = coordinator.evaluate_now(&alice).unwrap().candidate.unwrap();

    // when
    let handles: Vec<_> = [short_offer, long_offer]
        .into_iter()
        .map(|offer| {
            let coordinator = ctx.coordinator();
            let alice = alice.clone();
            thread::spawn(move || {
                let rt = Builder::new_current_thread().enable_all().build().unwrap();
                rt.block_on(coordinator.claim(&alice, &offer)).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<ClaimOutcome> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    // then
    let claims = ctx.claims().claims(&alice).unwrap();
    assert_eq!(claims.len(), 1, "{outcomes:?}");
    assert_eq!(
        ctx.payouts().total_credited(&alice),
        claims[0].round_count as u64
    );
    assert!(ctx.payouts().total_credited(&alice) <= 4);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]
    #[test]
    fn claim__any_history__claims_never_overlap_and_pay_once(
        outcomes in prop::collection::vec(prop::option::of(any::<bool>()), 3..40),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            _claim__any_history__claims_never_overlap_and_pay_once(outcomes).await
        })?;
    }
}

// `None` means the player skipped that round.
async fn _claim__any_history__claims_never_overlap_and_pay_once(
    outcomes: Vec<Option<bool>>,
) -> Result<(), TestCaseError> {
    let ctx = TestContext::new();
    let alice = ctx.alice();
    let bob = ctx.bob();
    let coordinator = ctx.coordinator();

    for (index, outcome) in outcomes.iter().enumerate() {
        let round_id = index as u64 + 1;
        match outcome {
            Some(is_correct) => ctx.settle(
                round_id,
                &[(&alice, *is_correct, Decimal::ONE), (&bob, true, Decimal::ONE)],
            ),
            None => ctx.settle(round_id, &[(&bob, true, Decimal::ONE)]),
        }
        if let Some(offer) = coordinator.evaluate_now(&alice).unwrap().candidate {
            let first = coordinator.claim(&alice, &offer).await.unwrap();
            let repeat = coordinator.claim(&alice, &offer).await.unwrap();
            let is_success = matches!(first, ClaimOutcome::Success { .. });
            prop_assert!(is_success);
            prop_assert_eq!(repeat, ClaimOutcome::AlreadyClaimed);
        }
    }

    let claims = ctx.claims().claims(&alice).unwrap();
    for pair in claims.windows(2) {
        prop_assert!(pair[1].start_round > pair[0].end_round);
    }
    let claimed_rounds: u64 = claims.iter().map(|claim| claim.round_count as u64).sum();
    prop_assert_eq!(ctx.payouts().total_credited(&alice), claimed_rounds);
    prop_assert_eq!(ctx.payouts().attempts(), claims.len());
    Ok(())
}
