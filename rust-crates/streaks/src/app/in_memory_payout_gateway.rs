use crate::{
    app::payout_gateway::PayoutGateway,
    records::{
        ClaimKey,
        UserId,
    },
};
use anyhow::{
    anyhow,
    bail,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub user_id: UserId,
    pub amount: u64,
}

/// Keeps credits in process memory. Credits are keyed by claim, so paying the same claim
/// twice leaves a single credit behind.
#[derive(Clone, Default)]
pub struct InMemoryPayoutGateway {
    credits: Arc<Mutex<HashMap<String, Credit>>>,
    attempts: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryPayoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every credit attempt fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn credits(&self) -> Arc<Mutex<HashMap<String, Credit>>> {
        self.credits.clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn total_credited(&self, user_id: &UserId) -> u64 {
        self.credits
            .lock()
            .map(|credits| {
                credits
                    .values()
                    .filter(|credit| &credit.user_id == user_id)
                    .map(|credit| credit.amount)
                    .sum()
            })
            .unwrap_or_default()
    }
}

impl PayoutGateway for InMemoryPayoutGateway {
    async fn credit(
        &self,
        user_id: &UserId,
        amount: u64,
        claim_key: &ClaimKey,
    ) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("wallet unavailable");
        }
        let mut credits = self
            .credits
            .lock()
            .map_err(|_| anyhow!("in-memory payout lock poisoned"))?;
        credits.entry(claim_key.to_string()).or_insert_with(|| {
            tracing::info!("Crediting {} coins to {}", amount, user_id);
            Credit {
                user_id: user_id.clone(),
                amount,
            }
        });
        Ok(())
    }
}
