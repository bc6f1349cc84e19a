use crate::records::{
    ClaimKey,
    ClaimedStreak,
    GuessRecord,
    RoundId,
    RoundMeta,
    SettledGuess,
    UserId,
};

/// Read side of the round/guess datastore.
pub trait GuessLedger {
    /// every resolved guess the player made, ordered by round id
    fn history(&self, user_id: &UserId) -> anyhow::Result<Vec<GuessRecord>>;

    /// greatest resolved round id; rounds still taking guesses are not counted
    fn latest_round_id(&self) -> anyhow::Result<Option<RoundId>>;
}

/// Write side of the round/guess datastore, driven by round settlement.
pub trait RoundSettlement {
    fn round(&self, round_id: RoundId) -> anyhow::Result<Option<RoundMeta>>;

    /// record a round as live; re-opening an open round is a no-op
    fn open_round(&self, round_id: RoundId) -> anyhow::Result<()>;

    /// resolve a round and append one guess record per participant
    fn settle_round(&self, round_id: RoundId, guesses: &[SettledGuess])
    -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettlementError {
    #[error("round {0} is already settled")]
    RoundAlreadySettled(RoundId),
    #[error("user {user_id} has more than one guess in round {round_id}")]
    DuplicateGuess { round_id: RoundId, user_id: UserId },
}

pub(crate) fn ensure_unique_participants(
    round_id: RoundId,
    guesses: &[SettledGuess],
) -> Result<(), SettlementError> {
    let mut seen = std::collections::HashSet::new();
    for guess in guesses {
        if !seen.insert(&guess.user_id) {
            return Err(SettlementError::DuplicateGuess {
                round_id,
                user_id: guess.user_id.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimInsert {
    Recorded,
    AlreadyExists,
    /// the player already holds a claim ending at or after the new claim's start round
    Overlaps { claimed_end: RoundId },
}

pub trait ClaimLedger {
    /// the player's claim with the greatest end round
    fn last_claim(&self, user_id: &UserId) -> anyhow::Result<Option<ClaimedStreak>>;

    fn claimed(&self, key: &ClaimKey) -> anyhow::Result<Option<ClaimedStreak>>;

    /// all of the player's claims, oldest round range first
    fn claims(&self, user_id: &UserId) -> anyhow::Result<Vec<ClaimedStreak>>;

    /// Insert `claim` unless a claim with the same key exists or the player's last claim
    /// already reaches `claim.start_round`. Both checks and the insert are one atomic step,
    /// so of any number of concurrent callers with overlapping rounds exactly one observes
    /// `Recorded`.
    fn claim_if_absent(&self, claim: &ClaimedStreak) -> anyhow::Result<ClaimInsert>;
}
