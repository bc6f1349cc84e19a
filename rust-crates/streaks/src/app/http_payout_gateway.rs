use crate::{
    app::payout_gateway::PayoutGateway,
    records::{
        ClaimKey,
        UserId,
    },
};
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;
use url::Url;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditRequestDto {
    pub user_id: String,
    pub amount: u64,
}

/// Talks to the wallet service's `POST /credit` endpoint.
#[derive(Clone)]
pub struct HttpPayoutGateway {
    credit_url: Url,
    http: reqwest::Client,
}

impl HttpPayoutGateway {
    pub fn new(wallet_url: &Url, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = wallet_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let credit_url = base
            .join("credit")
            .with_context(|| format!("build credit url from {wallet_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for wallet")?;
        Ok(Self { credit_url, http })
    }

    pub fn credit_url(&self) -> &Url {
        &self.credit_url
    }
}

impl PayoutGateway for HttpPayoutGateway {
    async fn credit(
        &self,
        user_id: &UserId,
        amount: u64,
        claim_key: &ClaimKey,
    ) -> anyhow::Result<()> {
        let body = CreditRequestDto {
            user_id: user_id.to_string(),
            amount,
        };
        let res = self
            .http
            .post(self.credit_url.clone())
            .header(IDEMPOTENCY_KEY_HEADER, claim_key.to_string())
            .json(&body)
            .send()
            .await
            .context("wallet request failed")?;
        let status = res.status();
        if !status.is_success() {
            let bytes = res
                .bytes()
                .await
                .context("failed to read wallet response body")?;
            let body = String::from_utf8_lossy(&bytes);
            return Err(anyhow!(
                "wallet responded with {status} when crediting {amount} to {user_id}: {body}"
            ));
        }
        tracing::debug!("Wallet credited {} to {} ({})", amount, user_id, claim_key);
        Ok(())
    }
}
