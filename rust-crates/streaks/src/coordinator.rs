//! Claim orchestration.
//!
//! An offer shown to a player can go stale before they act on it, so every claim re-reads
//! the ledgers and re-runs the analyzer before anything is written. The claim ledger's
//! insert-if-absent, which also refuses ranges reaching back into an earlier claim, is the
//! only guard against double claims; the payout is attempted only by the caller that
//! recorded the claim.
use crate::{
    Collaborator,
    Error,
    Result,
    analyzer::{
        self,
        Evaluation,
        StreakRules,
    },
    app::{
        ledger::{
            ClaimInsert,
            ClaimLedger,
            GuessLedger,
        },
        payout_gateway::PayoutGateway,
    },
    records::{
        ClaimKey,
        ClaimedStreak,
        RoundId,
        StreakCandidate,
        UserId,
    },
};
use chrono::Utc;
use rust_decimal::{
    Decimal,
    prelude::ToPrimitive,
};
use serde::{
    Deserialize,
    Serialize,
};


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Success {
        amount_paid: u64,
        start_round: RoundId,
        end_round: RoundId,
    },
    StreakNoLongerValid {
        reason: String,
    },
    AlreadyClaimed,
    /// The claim is recorded and will not be offered again, but the wallet never
    /// confirmed the credit.
    PayoutFailed {
        claim_recorded: bool,
        amount: u64,
        start_round: RoundId,
        end_round: RoundId,
    },
}

impl ClaimOutcome {
    pub fn message(&self) -> String {
        match self {
            ClaimOutcome::Success {
                amount_paid,
                start_round,
                end_round,
            } => format!(
                "Claimed {amount_paid} coins for your streak over rounds {start_round}-{end_round}."
            ),
            ClaimOutcome::StreakNoLongerValid { reason } => {
                format!("That streak can no longer be claimed: {reason}.")
            }
            ClaimOutcome::AlreadyClaimed => "That streak has already been claimed.".to_string(),
            ClaimOutcome::PayoutFailed {
                amount,
                start_round,
                end_round,
                ..
            } => format!(
                "Your streak over rounds {start_round}-{end_round} is recorded, but the {amount} coin payout did not go through. It will be settled manually."
            ),
        }
    }
}

/// Whole coins paid for a streak reward.
pub fn payout_amount(total_reward: Decimal) -> u64 {
    // negative totals pay nothing
    total_reward.floor().to_u64().unwrap_or_default()
}

pub struct ClaimCoordinator<Guesses, Claims, Payouts> {
    guesses: Guesses,
    claims: Claims,
    payouts: Payouts,
    rules: StreakRules,
}

impl<Guesses, Claims, Payouts> ClaimCoordinator<Guesses, Claims, Payouts> {
    pub fn new(
        guesses: Guesses,
        claims: Claims,
        payouts: Payouts,
        rules: StreakRules,
    ) -> Self {
        Self {
            guesses,
            claims,
            payouts,
            rules,
        }
    }

    pub fn guesses(&self) -> &Guesses {
        &self.guesses
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn rules(&self) -> &StreakRules {
        &self.rules
    }
}

impl<Guesses, Claims, Payouts> ClaimCoordinator<Guesses, Claims, Payouts>
where
    Guesses: GuessLedger,
    Claims: ClaimLedger,
    Payouts: PayoutGateway,
{
    /// Evaluate the player's streak against `current_round`, which may be omitted when the
    /// live round is not known.
    pub fn evaluate(
        &self,
        user_id: &UserId,
        current_round: Option<RoundId>,
    ) -> Result<Evaluation> {
        let history = self
            .guesses
            .history(user_id)
            .map_err(Error::unavailable(Collaborator::GuessLedger))?;
        let last_claim = self
            .claims
            .last_claim(user_id)
            .map_err(Error::unavailable(Collaborator::ClaimLedger))?;
        Ok(analyzer::evaluate(
            &history,
            last_claim.as_ref(),
            current_round,
            &self.rules,
        ))
    }

    /// Evaluate against the latest round the guess ledger knows about.
    pub fn evaluate_now(&self, user_id: &UserId) -> Result<Evaluation> {
        let current_round = self
            .guesses
            .latest_round_id()
            .map_err(Error::unavailable(Collaborator::GuessLedger))?;
        self.evaluate(user_id, current_round)
    }

    pub async fn claim(
        &self,
        user_id: &UserId,
        candidate: &StreakCandidate,
    ) -> Result<ClaimOutcome> {
        let key = ClaimKey::for_candidate(user_id, candidate);
        let existing = self
            .claims
            .claimed(&key)
            .map_err(Error::unavailable(Collaborator::ClaimLedger))?;
        if existing.is_some() {
            tracing::info!("Claim {} was already recorded", key);
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let fresh = self.evaluate_now(user_id)?;
        let Some(streak) = fresh
            .candidate
            .as_ref()
            .filter(|streak| streak.same_rounds_as(candidate))
        else {
            let reason = stale_reason(&fresh, candidate);
            tracing::info!("Rejecting stale claim {}: {}", key, reason);
            return Ok(ClaimOutcome::StreakNoLongerValid { reason });
        };

        let record = ClaimedStreak::new(user_id.clone(), streak, Utc::now());
        let inserted = self
            .claims
            .claim_if_absent(&record)
            .map_err(Error::unavailable(Collaborator::ClaimLedger))?;
        match inserted {
            ClaimInsert::Recorded => {}
            ClaimInsert::AlreadyExists => {
                tracing::info!("Lost race for claim {}", key);
                return Ok(ClaimOutcome::AlreadyClaimed);
            }
            ClaimInsert::Overlaps { claimed_end } => {
                tracing::info!(
                    "Rejecting claim {}: overlaps a claim ending at round {}",
                    key,
                    claimed_end
                );
                return Ok(ClaimOutcome::StreakNoLongerValid {
                    reason: format!(
                        "rounds {}-{} overlap a streak already claimed through round {}",
                        record.start_round, record.end_round, claimed_end
                    ),
                });
            }
        }

        let amount = payout_amount(record.total_reward);
        tracing::info!(
            "Recorded claim {} ({} rounds, reward {}); paying {}",
            key,
            record.round_count,
            record.total_reward,
            amount
        );
        match self.payouts.credit(user_id, amount, &key).await {
            Ok(()) => Ok(ClaimOutcome::Success {
                amount_paid: amount,
                start_round: record.start_round,
                end_round: record.end_round,
            }),
            Err(err) => {
                tracing::warn!(
                    "Payout of {} for claim {} failed, needs manual reconciliation: {:#}",
                    amount,
                    key,
                    err
                );
                Ok(ClaimOutcome::PayoutFailed {
                    claim_recorded: true,
                    amount,
                    start_round: record.start_round,
                    end_round: record.end_round,
                })
            }
        }
    }
}

fn stale_reason(fresh: &Evaluation, offered: &StreakCandidate) -> String {
    match &fresh.candidate {
        Some(current) => format!(
            "streak parameters changed: offered rounds {}-{} ({} rounds), now rounds {}-{} ({} rounds)",
            offered.start_round,
            offered.end_round,
            offered.round_count,
            current.start_round,
            current.end_round,
            current.round_count
        ),
        None => fresh.reason(),
    }
}
