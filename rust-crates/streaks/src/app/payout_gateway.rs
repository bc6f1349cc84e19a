use crate::records::{
    ClaimKey,
    UserId,
};

pub trait PayoutGateway {
    /// Credit `amount` whole coins to the player. `claim_key` identifies the claim being
    /// paid so a gateway can refuse to pay the same claim twice.
    fn credit(
        &self,
        user_id: &UserId,
        amount: u64,
        claim_key: &ClaimKey,
    ) -> impl Future<Output = anyhow::Result<()>>;
}
