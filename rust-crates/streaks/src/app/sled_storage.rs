// Sled-backed implementations of the guess and claim ledgers.
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
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Db,
    Transactional,
    Tree,
    transaction::{
        ConflictableTransactionError,
        TransactionError,
    },
};
use std::{
    convert::TryInto,
    path::Path,
};

#[derive(Clone)]
pub struct SledGuessLedger {
    rounds_tree: Tree,
    guesses_tree: Tree,
}

#[derive(Clone)]
pub struct SledClaimLedger {
    claims_tree: Tree,
    // user id -> end round of the player's latest claim
    claim_floors_tree: Tree,
}

/// Opens (or creates) the database at `path` and returns both ledgers backed by it.
pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<(SledGuessLedger, SledClaimLedger)> {
    let config = Config::default().path(path);
    let db = config.open().context("open sled database")?;
    let guesses = SledGuessLedger::new(&db)?;
    let claims = SledClaimLedger::new(&db)?;
    Ok((guesses, claims))
}

impl SledGuessLedger {
    pub fn new(db: &Db) -> anyhow::Result<Self> {
        let rounds_tree = db.open_tree("rounds").context("open rounds tree")?;
        let guesses_tree = db.open_tree("guesses").context("open guesses tree")?;
        Ok(Self {
            rounds_tree,
            guesses_tree,
        })
    }

    fn round_key(round_id: RoundId) -> [u8; 8] {
        round_id.to_be_bytes()
    }

    fn user_prefix(user_id: &UserId) -> Vec<u8> {
        format!("{user_id}|").into_bytes()
    }

    // zero padded so lexicographic order is round order
    fn guess_key(user_id: &UserId, round_id: RoundId) -> Vec<u8> {
        format!("{user_id}|{round_id:020}").into_bytes()
    }

    fn persist_round(&self, meta: &RoundMeta) -> anyhow::Result<()> {
        let bytes = serialize_record(meta, "round metadata")?;
        self.rounds_tree
            .insert(Self::round_key(meta.round_id), bytes)
            .context("persist round metadata")?;
        self.rounds_tree.flush().context("flush rounds tree")?;
        Ok(())
    }
}

impl GuessLedger for SledGuessLedger {
    fn history(&self, user_id: &UserId) -> anyhow::Result<Vec<GuessRecord>> {
        let mut records = Vec::new();
        for entry in self.guesses_tree.scan_prefix(Self::user_prefix(user_id)) {
            let (_, value) = entry.context("iterate guess records")?;
            records.push(deserialize::<GuessRecord>(value.as_ref())?);
        }
        Ok(records)
    }

    fn latest_round_id(&self) -> anyhow::Result<Option<RoundId>> {
        for entry in self.rounds_tree.iter().rev() {
            let (_, value) = entry.context("iterate rounds")?;
            let meta = deserialize::<RoundMeta>(value.as_ref())?;
            if meta.status == RoundStatus::Resolved {
                return Ok(Some(meta.round_id));
            }
        }
        Ok(None)
    }
}

impl RoundSettlement for SledGuessLedger {
    fn round(&self, round_id: RoundId) -> anyhow::Result<Option<RoundMeta>> {
        let value = match self.rounds_tree.get(Self::round_key(round_id))? {
            Some(value) => value,
            None => return Ok(None),
        };
        Ok(Some(deserialize::<RoundMeta>(value.as_ref())?))
    }

    fn open_round(&self, round_id: RoundId) -> anyhow::Result<()> {
        match self.round(round_id)? {
            Some(meta) if meta.status == RoundStatus::Resolved => {
                Err(SettlementError::RoundAlreadySettled(round_id).into())
            }
            Some(_) => Ok(()),
            None => {
                tracing::info!("Opening round {}", round_id);
                self.persist_round(&RoundMeta {
                    round_id,
                    status: RoundStatus::Open,
                })
            }
        }
    }

    fn settle_round(
        &self,
        round_id: RoundId,
        guesses: &[SettledGuess],
    ) -> anyhow::Result<()> {
        ensure_unique_participants(round_id, guesses)?;
        let round_key = Self::round_key(round_id);
        let resolved = serialize_record(
            &RoundMeta {
                round_id,
                status: RoundStatus::Resolved,
            },
            "round metadata",
        )?;
        let mut entries = Vec::with_capacity(guesses.len());
        for guess in guesses {
            let record = GuessRecord::new(round_id, guess.is_correct, guess.reward);
            entries.push((
                Self::guess_key(&guess.user_id, round_id),
                serialize_record(&record, "guess record")?,
            ));
        }

        let outcome = (&self.rounds_tree, &self.guesses_tree).transaction(
            |(rounds, guesses_tx)| {
                if let Some(existing) = rounds.get(round_key)? {
                    let meta = serde_json::from_slice::<RoundMeta>(existing.as_ref())
                        .map_err(|_| ConflictableTransactionError::Abort(None))?;
                    if meta.status == RoundStatus::Resolved {
                        return Err(ConflictableTransactionError::Abort(Some(
                            SettlementError::RoundAlreadySettled(round_id),
                        )));
                    }
                }
                rounds.insert(round_key.as_slice(), resolved.clone())?;
                for (key, value) in &entries {
                    guesses_tx.insert(key.as_slice(), value.clone())?;
                }
                Ok(())
            },
        );
        match outcome {
            Ok(()) => {}
            Err(TransactionError::Abort(Some(err))) => return Err(err.into()),
            Err(TransactionError::Abort(None)) => {
                return Err(anyhow!("corrupt metadata for round {round_id}"));
            }
            Err(TransactionError::Storage(err)) => {
                return Err(err).context("settle round transaction");
            }
        }
        self.rounds_tree.flush().context("flush rounds tree")?;
        self.guesses_tree.flush().context("flush guesses tree")?;
        tracing::info!(
            "Settled round {} with {} participants",
            round_id,
            guesses.len()
        );
        Ok(())
    }
}

impl SledClaimLedger {
    pub fn new(db: &Db) -> anyhow::Result<Self> {
        let claims_tree = db.open_tree("claims").context("open claims tree")?;
        let claim_floors_tree = db
            .open_tree("claim_floors")
            .context("open claim floors tree")?;
        Ok(Self {
            claims_tree,
            claim_floors_tree,
        })
    }

    fn claim_key(key: &ClaimKey) -> Vec<u8> {
        format!(
            "{}|{:020}|{:020}",
            key.user_id, key.start_round, key.end_round
        )
        .into_bytes()
    }
}

impl ClaimLedger for SledClaimLedger {
    fn last_claim(&self, user_id: &UserId) -> anyhow::Result<Option<ClaimedStreak>> {
        Ok(self.claims(user_id)?.pop())
    }

    fn claimed(&self, key: &ClaimKey) -> anyhow::Result<Option<ClaimedStreak>> {
        let value = match self.claims_tree.get(Self::claim_key(key))? {
            Some(value) => value,
            None => return Ok(None),
        };
        Ok(Some(deserialize::<ClaimedStreak>(value.as_ref())?))
    }

    fn claims(&self, user_id: &UserId) -> anyhow::Result<Vec<ClaimedStreak>> {
        let prefix = format!("{user_id}|").into_bytes();
        let mut claims = Vec::new();
        for entry in self.claims_tree.scan_prefix(prefix) {
            let (_, value) = entry.context("iterate claims")?;
            claims.push(deserialize::<ClaimedStreak>(value.as_ref())?);
        }
        claims.sort_by_key(|claim| (claim.end_round, claim.start_round));
        Ok(claims)
    }

    fn claim_if_absent(&self, claim: &ClaimedStreak) -> anyhow::Result<ClaimInsert> {
        let key = Self::claim_key(&claim.key());
        let floor_key = claim.user_id.as_str().as_bytes();
        let bytes = serialize_record(claim, "claimed streak")?;
        let end_round = claim.end_round.to_be_bytes();

        let outcome = (&self.claims_tree, &self.claim_floors_tree).transaction(
            |(claims, floors)| {
                if claims.get(key.as_slice())?.is_some() {
                    return Ok(ClaimInsert::AlreadyExists);
                }
                if let Some(stored) = floors.get(floor_key)? {
                    let claimed_end = round_from_bytes(stored.as_ref())
                        .map_err(|_| ConflictableTransactionError::Abort(()))?;
                    if claimed_end >= claim.start_round {
                        return Ok(ClaimInsert::Overlaps { claimed_end });
                    }
                }
                claims.insert(key.as_slice(), bytes.clone())?;
                floors.insert(floor_key, end_round.as_slice())?;
                Ok(ClaimInsert::Recorded)
            },
        );
        let inserted = match outcome {
            Ok(inserted) => inserted,
            Err(TransactionError::Abort(())) => {
                return Err(anyhow!("corrupt claim floor for {}", claim.user_id));
            }
            Err(TransactionError::Storage(err)) => {
                return Err(err).context("record claimed streak");
            }
        };
        if inserted == ClaimInsert::Recorded {
            self.claims_tree.flush().context("flush claims tree")?;
            self.claim_floors_tree
                .flush()
                .context("flush claim floors tree")?;
        }
        Ok(inserted)
    }
}

fn round_from_bytes(bytes: &[u8]) -> anyhow::Result<RoundId> {
    let bytes: [u8; 8] = bytes.try_into().context("round id should be 8 bytes")?;
    Ok(RoundId::from_be_bytes(bytes))
}

fn serialize_record<T: Serialize>(value: &T, label: &str) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(value).with_context(|| format!("serialize {label}"))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(bytes).context("deserialize sled record")
}
