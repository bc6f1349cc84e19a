use crate::{
    analyzer::Evaluation,
    coordinator::ClaimOutcome,
    records::{
        RoundId,
        SettledGuess,
        StreakCandidate,
        UserId,
    },
};
use tokio::sync::oneshot;

pub trait QueryAPI {
    fn query(&mut self) -> impl Future<Output = anyhow::Result<Query>>;
}

#[derive(Debug)]
pub enum Query {
    Evaluate(EvaluateQuery),
    Claim(ClaimQuery),
    OpenRound(OpenRoundQuery),
    SettleRound(SettleRoundQuery),
}

impl Query {
    pub fn evaluate(
        user_id: UserId,
        current_round: Option<RoundId>,
        sender: oneshot::Sender<crate::Result<Evaluation>>,
    ) -> Self {
        Query::Evaluate(EvaluateQuery {
            user_id,
            current_round,
            sender,
        })
    }

    pub fn claim(
        user_id: UserId,
        candidate: StreakCandidate,
        sender: oneshot::Sender<crate::Result<ClaimOutcome>>,
    ) -> Self {
        Query::Claim(ClaimQuery {
            user_id,
            candidate,
            sender,
        })
    }
}

#[derive(Debug)]
pub struct EvaluateQuery {
    pub user_id: UserId,
    /// falls back to the latest resolved round in the guess ledger when absent
    pub current_round: Option<RoundId>,
    pub sender: oneshot::Sender<crate::Result<Evaluation>>,
}

#[derive(Debug)]
pub struct ClaimQuery {
    pub user_id: UserId,
    pub candidate: StreakCandidate,
    pub sender: oneshot::Sender<crate::Result<ClaimOutcome>>,
}

#[derive(Debug)]
pub struct OpenRoundQuery {
    pub round_id: RoundId,
    pub sender: oneshot::Sender<anyhow::Result<()>>,
}

#[derive(Debug)]
pub struct SettleRoundQuery {
    pub round_id: RoundId,
    pub guesses: Vec<SettledGuess>,
    pub sender: oneshot::Sender<anyhow::Result<()>>,
}
