use chrono::{
    DateTime,
    Utc,
};
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

pub type RoundId = u64;

/// Player identifier as handed to us by the chat layer (e.g. a Discord snowflake).
///
/// Used as a storage key prefix, so it may not be empty or contain `|`.
#[derive(PartialEq, Eq, Hash, Debug, Clone, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> crate::Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.contains('|') {
            return Err(crate::Error::InvalidUserId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for UserId {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One player's participation in one resolved round.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct GuessRecord {
    pub round_id: RoundId,
    pub is_correct: bool,
    pub reward: Decimal,
}

impl GuessRecord {
    pub fn new(round_id: RoundId, is_correct: bool, reward: Decimal) -> Self {
        Self {
            round_id,
            is_correct,
            reward,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum RoundStatus {
    Open,
    Resolved,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct RoundMeta {
    pub round_id: RoundId,
    pub status: RoundStatus,
}

/// A settled guess as delivered by round settlement.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct SettledGuess {
    pub user_id: UserId,
    pub is_correct: bool,
    pub reward: Decimal,
}

/// A contiguous run of correct guesses that may be offered for claiming.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct StreakCandidate {
    pub start_round: RoundId,
    pub end_round: RoundId,
    pub round_count: u32,
    pub total_reward: Decimal,
}

impl StreakCandidate {
    /// Two candidates describe the same streak when they cover the same rounds.
    /// Rewards are not compared.
    pub fn same_rounds_as(&self, other: &StreakCandidate) -> bool {
        self.start_round == other.start_round
            && self.end_round == other.end_round
            && self.round_count == other.round_count
    }
}

/// Exactly-once key for a claim.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct ClaimKey {
    pub user_id: UserId,
    pub start_round: RoundId,
    pub end_round: RoundId,
}

impl ClaimKey {
    pub fn new(user_id: UserId, start_round: RoundId, end_round: RoundId) -> Self {
        Self {
            user_id,
            start_round,
            end_round,
        }
    }

    pub fn for_candidate(user_id: &UserId, candidate: &StreakCandidate) -> Self {
        Self::new(user_id.clone(), candidate.start_round, candidate.end_round)
    }
}

// Also used as the payout idempotency key, so the format must stay stable.
impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "streak:{}:{}-{}",
            self.user_id, self.start_round, self.end_round
        )
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedStreak {
    pub user_id: UserId,
    pub start_round: RoundId,
    pub end_round: RoundId,
    pub round_count: u32,
    pub total_reward: Decimal,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedStreak {
    pub fn new(
        user_id: UserId,
        candidate: &StreakCandidate,
        claimed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            start_round: candidate.start_round,
            end_round: candidate.end_round,
            round_count: candidate.round_count,
            total_reward: candidate.total_reward,
            claimed_at,
        }
    }

    pub fn key(&self) -> ClaimKey {
        ClaimKey::new(self.user_id.clone(), self.start_round, self.end_round)
    }
}
