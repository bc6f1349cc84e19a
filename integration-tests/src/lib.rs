//! Shared fixtures for end-to-end tests against the sled-backed ledgers.
use rust_decimal::Decimal;
use std::sync::Arc;
use streaks::{
    analyzer::StreakRules,
    app::{
        in_memory_payout_gateway::InMemoryPayoutGateway,
        ledger::RoundSettlement,
        sled_storage::{
            self,
            SledClaimLedger,
            SledGuessLedger,
        },
    },
    coordinator::ClaimCoordinator,
    records::{
        RoundId,
        SettledGuess,
        UserId,
    },
};
use tempdir::TempDir;

pub type SledCoordinator =
    ClaimCoordinator<SledGuessLedger, SledClaimLedger, InMemoryPayoutGateway>;

pub struct TestContext {
    // keeps the database directory alive for the lifetime of the context
    _temp_dir: TempDir,
    coordinator: Arc<SledCoordinator>,
    guesses: SledGuessLedger,
    claims: SledClaimLedger,
    payouts: InMemoryPayoutGateway,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new("streaks_integration").expect("create temp dir");
        let (guesses, claims) =
            sled_storage::open(temp_dir.path()).expect("open sled ledgers");
        let payouts = InMemoryPayoutGateway::new();
        let coordinator = Arc::new(ClaimCoordinator::new(
            guesses.clone(),
            claims.clone(),
            payouts.clone(),
            StreakRules::default(),
        ));
        tracing::info!("test ledgers at {}", temp_dir.path().display());
        Self {
            _temp_dir: temp_dir,
            coordinator,
            guesses,
            claims,
            payouts,
        }
    }

    pub fn coordinator(&self) -> Arc<SledCoordinator> {
        self.coordinator.clone()
    }

    pub fn guesses(&self) -> &SledGuessLedger {
        &self.guesses
    }

    pub fn claims(&self) -> &SledClaimLedger {
        &self.claims
    }

    pub fn payouts(&self) -> &InMemoryPayoutGateway {
        &self.payouts
    }

    pub fn alice(&self) -> UserId {
        UserId::new("100000000000000001").expect("valid user id")
    }

    pub fn bob(&self) -> UserId {
        UserId::new("100000000000000002").expect("valid user id")
    }

    /// Settle `round_id` with the given `(player, correct, reward)` outcomes.
    pub fn settle(&self, round_id: RoundId, outcomes: &[(&UserId, bool, Decimal)]) {
        let guesses: Vec<SettledGuess> = outcomes
            .iter()
            .map(|(user_id, is_correct, reward)| SettledGuess {
                user_id: (*user_id).clone(),
                is_correct: *is_correct,
                reward: *reward,
            })
            .collect();
        self.guesses
            .settle_round(round_id, &guesses)
            .expect("settle round");
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
