//! Streak qualification.
//!
//! Works over a player's sparse participation history: a round id missing between two
//! participated rounds is a skipped round and breaks a streak just like a wrong guess.
//! Only rounds after the end of the player's last claimed streak are considered.
use crate::records::{
    ClaimedStreak,
    GuessRecord,
    RoundId,
    StreakCandidate,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const DEFAULT_MIN_STREAK_LEN: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRules {
    pub min_streak_len: u32,
}

impl Default for StreakRules {
    fn default() -> Self {
        Self {
            min_streak_len: DEFAULT_MIN_STREAK_LEN,
        }
    }
}

/// Why an evaluation did not produce a claimable streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disqualification {
    InsufficientHistory,
    StreakNotContiguous,
    StreakBrokenByIncorrectGuess,
    BelowMinimumLength,
    LaterFailure,
    CurrentRoundSkipped,
}

impl fmt::Display for Disqualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Disqualification::InsufficientHistory => "insufficient unclaimed rounds",
            Disqualification::StreakNotContiguous => "gap present",
            Disqualification::StreakBrokenByIncorrectGuess => "incorrect guess present",
            Disqualification::BelowMinimumLength => "below minimum length",
            Disqualification::LaterFailure => "later failure invalidates streak",
            Disqualification::CurrentRoundSkipped => "current round skipped",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Present only when the streak qualifies.
    pub candidate: Option<StreakCandidate>,
    /// Every check that failed; empty when qualified.
    pub reasons: Vec<Disqualification>,
}

impl Evaluation {
    fn qualified(candidate: StreakCandidate) -> Self {
        Self {
            candidate: Some(candidate),
            reasons: Vec::new(),
        }
    }

    fn disqualified(reasons: Vec<Disqualification>) -> Self {
        Self {
            candidate: None,
            reasons,
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.candidate.is_some()
    }

    pub fn has_reason(&self, reason: Disqualification) -> bool {
        self.reasons.contains(&reason)
    }

    pub fn reason(&self) -> String {
        match &self.candidate {
            Some(candidate) => format!(
                "qualified: {} correct rounds in a row ({}-{})",
                candidate.round_count, candidate.start_round, candidate.end_round
            ),
            None => self
                .reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Find the best claimable streak in `history`.
///
/// `current_round` is the round presently accepting guesses, if known. A player whose last
/// participated round is older than it has skipped the live round.
pub fn evaluate(
    history: &[GuessRecord],
    last_claim: Option<&ClaimedStreak>,
    current_round: Option<RoundId>,
    rules: &StreakRules,
) -> Evaluation {
    let min_len = rules.min_streak_len;
    let mut window: Vec<&GuessRecord> = history
        .iter()
        .filter(|record| last_claim.is_none_or(|claim| record.round_id > claim.end_round))
        .collect();
    if window.len() < min_len as usize {
        return Evaluation::disqualified(vec![Disqualification::InsufficientHistory]);
    }
    window.sort_by_key(|record| record.round_id);

    let mut best: Option<StreakCandidate> = None;
    let mut run: Option<StreakCandidate> = None;
    let mut previous: Option<RoundId> = None;
    let mut gap_present = false;
    let mut incorrect_present = false;

    for record in &window {
        let contiguous = previous.is_none_or(|p| p.checked_add(1) == Some(record.round_id));
        if !contiguous {
            gap_present = true;
            close_run(&mut best, run.take());
        }
        if record.is_correct {
            run = Some(match run.take() {
                Some(mut streak) => {
                    streak.end_round = record.round_id;
                    streak.round_count += 1;
                    streak.total_reward += record.reward;
                    streak
                }
                None => StreakCandidate {
                    start_round: record.round_id,
                    end_round: record.round_id,
                    round_count: 1,
                    total_reward: record.reward,
                },
            });
        } else {
            incorrect_present = true;
            close_run(&mut best, run.take());
        }
        previous = Some(record.round_id);
    }
    close_run(&mut best, run.take());

    let mut reasons = Vec::new();
    match &best {
        Some(streak) if streak.round_count >= min_len => {
            let later_failure = window
                .iter()
                .any(|record| record.round_id > streak.end_round && !record.is_correct);
            if later_failure {
                reasons.push(Disqualification::LaterFailure);
            }
        }
        _ => {
            if gap_present {
                reasons.push(Disqualification::StreakNotContiguous);
            }
            if incorrect_present {
                reasons.push(Disqualification::StreakBrokenByIncorrectGuess);
            }
            reasons.push(Disqualification::BelowMinimumLength);
        }
    }

    // Measured against the whole history, not just the unclaimed window.
    let last_participated = history.iter().map(|record| record.round_id).max();
    if let (Some(current), Some(last)) = (current_round, last_participated) {
        if current > last {
            reasons.push(Disqualification::CurrentRoundSkipped);
        }
    }

    match best {
        Some(streak) if reasons.is_empty() => Evaluation::qualified(streak),
        _ => Evaluation::disqualified(reasons),
    }
}

// Equal lengths go to the later run, whatever either reward.
fn close_run(best: &mut Option<StreakCandidate>, run: Option<StreakCandidate>) {
    let Some(run) = run else {
        return;
    };
    let replace = best
        .as_ref()
        .is_none_or(|current| run.round_count >= current.round_count);
    if replace {
        *best = Some(run);
    }
}
