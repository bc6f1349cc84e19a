use crate::{
    app::{
        ledger::{
            ClaimLedger,
            GuessLedger,
            RoundSettlement,
        },
        payout_gateway::PayoutGateway,
        query_api::{
            ClaimQuery,
            EvaluateQuery,
            OpenRoundQuery,
            Query,
            QueryAPI,
            SettleRoundQuery,
        },
    },
    coordinator::ClaimCoordinator,
};
use tracing_subscriber::EnvFilter;

pub mod actix_query_api;
pub mod http_payout_gateway;
pub mod in_memory_ledger;
pub mod in_memory_payout_gateway;
pub mod ledger;
pub mod payout_gateway;
pub mod query_api;
pub mod sled_storage;


pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Continue,
    Exit,
}

/// Serves queries one at a time against a claim coordinator.
pub struct App<Guesses, Claims, Payouts, API> {
    coordinator: ClaimCoordinator<Guesses, Claims, Payouts>,
    api: API,
}

impl<Guesses, Claims, Payouts, API> App<Guesses, Claims, Payouts, API> {
    pub fn new(coordinator: ClaimCoordinator<Guesses, Claims, Payouts>, api: API) -> Self {
        Self { coordinator, api }
    }
}

impl<
    Guesses: GuessLedger + RoundSettlement,
    Claims: ClaimLedger,
    Payouts: PayoutGateway,
    API: QueryAPI,
> App<Guesses, Claims, Payouts, API>
{
    /// Handle the next query, or stop once `interrupt` resolves.
    pub async fn run(
        &mut self,
        interrupt: impl Future<Output = ()>,
    ) -> anyhow::Result<RunState> {
        let query = tokio::select! {
            query = self.api.query() => query?,
            _ = interrupt => return Ok(RunState::Exit),
        };
        self.handle_query(query).await;
        Ok(RunState::Continue)
    }

    async fn handle_query(&self, query: Query) {
        match query {
            Query::Evaluate(EvaluateQuery {
                user_id,
                current_round,
                sender,
            }) => {
                let result = match current_round {
                    Some(round_id) => self.coordinator.evaluate(&user_id, Some(round_id)),
                    None => self.coordinator.evaluate_now(&user_id),
                };
                if let Err(err) = &result {
                    tracing::warn!("Evaluating {} failed: {}", user_id, err);
                }
                if sender.send(result).is_err() {
                    tracing::debug!("Evaluate requester for {} went away", user_id);
                }
            }
            Query::Claim(ClaimQuery {
                user_id,
                candidate,
                sender,
            }) => {
                let result = self.coordinator.claim(&user_id, &candidate).await;
                match &result {
                    Ok(outcome) => {
                        tracing::info!("Claim by {}: {}", user_id, outcome.message())
                    }
                    Err(err) => tracing::warn!("Claim by {} failed: {}", user_id, err),
                }
                if sender.send(result).is_err() {
                    // the outcome is already durable; only the reply is lost
                    tracing::warn!("Claim requester for {} went away", user_id);
                }
            }
            Query::OpenRound(OpenRoundQuery { round_id, sender }) => {
                let result = self.coordinator.guesses().open_round(round_id);
                if sender.send(result).is_err() {
                    tracing::debug!("Open round requester went away");
                }
            }
            Query::SettleRound(SettleRoundQuery {
                round_id,
                guesses,
                sender,
            }) => {
                let result = self.coordinator.guesses().settle_round(round_id, &guesses);
                if sender.send(result).is_err() {
                    tracing::debug!("Settle round requester went away");
                }
            }
        }
    }
}
