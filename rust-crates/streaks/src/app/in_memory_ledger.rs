use crate::{
    app::ledger::{
        ClaimInsert,
        ClaimLedger,
        GuessLedger,
        RoundSettlement,
        SettlementError,
        ensure_unique_participants,
    },
    records::{
        ClaimKey,
        ClaimedStreak,
        GuessRecord,
        RoundId,
        RoundMeta,
        RoundStatus,
        SettledGuess,
        UserId,
    },
};
use anyhow::anyhow;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

#[derive(Default)]
struct GuessState {
    rounds: BTreeMap<RoundId, RoundMeta>,
    guesses: HashMap<UserId, BTreeMap<RoundId, GuessRecord>>,
}

#[derive(Clone, Default)]
pub struct InMemoryGuessLedger {
    state: Arc<Mutex<GuessState>>,
}

impl InMemoryGuessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger with `records` already settled for `user_id`. Every round is marked resolved.
    pub fn with_history(user_id: &UserId, records: &[GuessRecord]) -> Self {
        let ledger = Self::new();
        if let Ok(mut state) = ledger.state.lock() {
            for record in records {
                state.rounds.insert(
                    record.round_id,
                    RoundMeta {
                        round_id: record.round_id,
                        status: RoundStatus::Resolved,
                    },
                );
                state
                    .guesses
                    .entry(user_id.clone())
                    .or_default()
                    .insert(record.round_id, record.clone());
            }
        }
        ledger
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, GuessState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory guess ledger lock poisoned"))
    }
}

impl GuessLedger for InMemoryGuessLedger {
    fn history(&self, user_id: &UserId) -> anyhow::Result<Vec<GuessRecord>> {
        let state = self.lock()?;
        Ok(state
            .guesses
            .get(user_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn latest_round_id(&self) -> anyhow::Result<Option<RoundId>> {
        let state = self.lock()?;
        Ok(state
            .rounds
            .values()
            .rev()
            .find(|meta| meta.status == RoundStatus::Resolved)
            .map(|meta| meta.round_id))
    }
}

impl RoundSettlement for InMemoryGuessLedger {
    fn round(&self, round_id: RoundId) -> anyhow::Result<Option<RoundMeta>> {
        let state = self.lock()?;
        Ok(state.rounds.get(&round_id).cloned())
    }

    fn open_round(&self, round_id: RoundId) -> anyhow::Result<()> {
        let mut state = self.lock()?;
        match state.rounds.get(&round_id) {
            Some(meta) if meta.status == RoundStatus::Resolved => {
                Err(SettlementError::RoundAlreadySettled(round_id).into())
            }
            Some(_) => Ok(()),
            None => {
                state.rounds.insert(
                    round_id,
                    RoundMeta {
                        round_id,
                        status: RoundStatus::Open,
                    },
                );
                Ok(())
            }
        }
    }

    fn settle_round(
        &self,
        round_id: RoundId,
        guesses: &[SettledGuess],
    ) -> anyhow::Result<()> {
        ensure_unique_participants(round_id, guesses)?;
        let mut state = self.lock()?;
        if matches!(
            state.rounds.get(&round_id),
            Some(meta) if meta.status == RoundStatus::Resolved
        ) {
            return Err(SettlementError::RoundAlreadySettled(round_id).into());
        }
        state.rounds.insert(
            round_id,
            RoundMeta {
                round_id,
                status: RoundStatus::Resolved,
            },
        );
        for guess in guesses {
            state.guesses.entry(guess.user_id.clone()).or_default().insert(
                round_id,
                GuessRecord::new(round_id, guess.is_correct, guess.reward),
            );
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryClaimLedger {
    claims: Arc<Mutex<HashMap<ClaimKey, ClaimedStreak>>>,
}

impl InMemoryClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, HashMap<ClaimKey, ClaimedStreak>>> {
        self.claims
            .lock()
            .map_err(|_| anyhow!("in-memory claim ledger lock poisoned"))
    }
}

impl ClaimLedger for InMemoryClaimLedger {
    fn last_claim(&self, user_id: &UserId) -> anyhow::Result<Option<ClaimedStreak>> {
        Ok(self.claims(user_id)?.pop())
    }

    fn claimed(&self, key: &ClaimKey) -> anyhow::Result<Option<ClaimedStreak>> {
        let guard = self.lock()?;
        Ok(guard.get(key).cloned())
    }

    fn claims(&self, user_id: &UserId) -> anyhow::Result<Vec<ClaimedStreak>> {
        let guard = self.lock()?;
        let mut claims: Vec<ClaimedStreak> = guard
            .values()
            .filter(|claim| &claim.user_id == user_id)
            .cloned()
            .collect();
        claims.sort_by_key(|claim| (claim.end_round, claim.start_round));
        Ok(claims)
    }

    fn claim_if_absent(&self, claim: &ClaimedStreak) -> anyhow::Result<ClaimInsert> {
        let mut guard = self.lock()?;
        let key = claim.key();
        if guard.contains_key(&key) {
            return Ok(ClaimInsert::AlreadyExists);
        }
        let overlapping_end = guard
            .values()
            .filter(|existing| existing.user_id == claim.user_id)
            .map(|existing| existing.end_round)
            .max()
            .filter(|end| *end >= claim.start_round);
        if let Some(claimed_end) = overlapping_end {
            return Ok(ClaimInsert::Overlaps { claimed_end });
        }
        guard.insert(key, claim.clone());
        Ok(ClaimInsert::Recorded)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::records::StreakCandidate;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::thread;

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn settled(user_id: &UserId, is_correct: bool) -> SettledGuess {
        SettledGuess {
            user_id: user_id.clone(),
            is_correct,
            reward: Decimal::ONE,
        }
    }

    fn claim(user_id: &UserId, start_round: RoundId, end_round: RoundId) -> ClaimedStreak {
        let candidate = StreakCandidate {
            start_round,
            end_round,
            round_count: (end_round - start_round + 1) as u32,
            total_reward: Decimal::TEN,
        };
        ClaimedStreak::new(user_id.clone(), &candidate, Utc::now())
    }

    #[test]
    fn settle_round__records_guesses_per_participant() {
        // given
        let ledger = InMemoryGuessLedger::new();
        let alice = user("alice");
        let bob = user("bob");
        ledger.open_round(1).unwrap();

        // when
        ledger
            .settle_round(1, &[settled(&alice, true), settled(&bob, false)])
            .unwrap();
        ledger.settle_round(2, &[settled(&alice, false)]).unwrap();

        // then
        let alice_history = ledger.history(&alice).unwrap();
        assert_eq!(
            alice_history,
            vec![
                GuessRecord::new(1, true, Decimal::ONE),
                GuessRecord::new(2, false, Decimal::ONE),
            ]
        );
        assert_eq!(ledger.history(&bob).unwrap().len(), 1);
        assert_eq!(ledger.round(1).unwrap().unwrap().status, RoundStatus::Resolved);
        assert_eq!(ledger.latest_round_id().unwrap(), Some(2));
    }

    #[test]
    fn settle_round__twice__is_rejected() {
        // given
        let ledger = InMemoryGuessLedger::new();
        let alice = user("alice");
        ledger.settle_round(4, &[settled(&alice, true)]).unwrap();

        // when
        let result = ledger.settle_round(4, &[settled(&alice, false)]);

        // then
        let err = result.unwrap_err();
        assert_eq!(
            err.downcast_ref::<SettlementError>(),
            Some(&SettlementError::RoundAlreadySettled(4))
        );
        assert!(ledger.history(&alice).unwrap()[0].is_correct);
    }

    #[test]
    fn settle_round__duplicate_participant__is_rejected() {
        // given
        let ledger = InMemoryGuessLedger::new();
        let alice = user("alice");

        // when
        let result =
            ledger.settle_round(1, &[settled(&alice, true), settled(&alice, false)]);

        // then
        assert!(result.is_err());
        assert!(ledger.round(1).unwrap().is_none());
    }

    #[test]
    fn latest_round_id__open_round__is_not_counted_until_settled() {
        // given
        let ledger = InMemoryGuessLedger::new();
        ledger.settle_round(1, &[]).unwrap();

        // when
        ledger.open_round(2).unwrap();
        let while_open = ledger.latest_round_id().unwrap();
        ledger.settle_round(2, &[]).unwrap();

        // then
        assert_eq!(while_open, Some(1));
        assert_eq!(ledger.latest_round_id().unwrap(), Some(2));
    }

    #[test]
    fn latest_round_id__only_open_rounds__is_none() {
        // given
        let ledger = InMemoryGuessLedger::new();

        // when
        ledger.open_round(7).unwrap();

        // then
        assert_eq!(ledger.latest_round_id().unwrap(), None);
        assert_eq!(ledger.round(7).unwrap().unwrap().status, RoundStatus::Open);
    }

    #[test]
    fn last_claim__returns_claim_with_greatest_end_round() {
        // given
        let ledger = InMemoryClaimLedger::new();
        let alice = user("alice");
        ledger.claim_if_absent(&claim(&alice, 1, 3)).unwrap();
        ledger.claim_if_absent(&claim(&alice, 5, 8)).unwrap();
        ledger.claim_if_absent(&claim(&user("bob"), 10, 12)).unwrap();

        // when
        let last = ledger.last_claim(&alice).unwrap().unwrap();

        // then
        assert_eq!((last.start_round, last.end_round), (5, 8));
        assert_eq!(ledger.claims(&alice).unwrap().len(), 2);
    }

    #[test]
    fn claim_if_absent__overlapping_earlier_claim__is_rejected() {
        // given
        let ledger = InMemoryClaimLedger::new();
        let alice = user("alice");
        ledger.claim_if_absent(&claim(&alice, 1, 3)).unwrap();

        // when
        let longer = ledger.claim_if_absent(&claim(&alice, 1, 4)).unwrap();
        let later = ledger.claim_if_absent(&claim(&alice, 3, 6)).unwrap();
        let other_player = ledger.claim_if_absent(&claim(&user("bob"), 1, 4)).unwrap();

        // then
        assert_eq!(longer, ClaimInsert::Overlaps { claimed_end: 3 });
        assert_eq!(later, ClaimInsert::Overlaps { claimed_end: 3 });
        assert_eq!(other_player, ClaimInsert::Recorded);
        assert_eq!(ledger.claims(&alice).unwrap().len(), 1);
    }

    #[test]
    fn claim_if_absent__racing_overlapping_claims__exactly_one_records() {
        // given
        let ledger = InMemoryClaimLedger::new();
        let alice = user("alice");

        // when
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                let record = claim(&alice, 1, 3 + i);
                thread::spawn(move || ledger.claim_if_absent(&record).unwrap())
            })
            .collect();
        let results: Vec<ClaimInsert> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // then
        let recorded = results
            .iter()
            .filter(|r| **r == ClaimInsert::Recorded)
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(ledger.claims(&alice).unwrap().len(), 1);
    }

    #[test]
    fn claim_if_absent__concurrent_callers__exactly_one_records() {
        // given
        let ledger = InMemoryClaimLedger::new();
        let alice = user("alice");

        // when
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let record = claim(&alice, 1, 3);
                thread::spawn(move || ledger.claim_if_absent(&record).unwrap())
            })
            .collect();
        let results: Vec<ClaimInsert> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // then
        let recorded = results
            .iter()
            .filter(|r| **r == ClaimInsert::Recorded)
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(ledger.claims(&alice).unwrap().len(), 1);
    }
}
