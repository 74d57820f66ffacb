//! Fee policy administration.

use super::{MarketplaceService, ServiceError};
use marketplace_core::actor::Actor;
use marketplace_core::error::DomainError;
use marketplace_core::split::FeePolicy;

impl MarketplaceService {
    /// The fee policy in force
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn fee_policy(&self) -> Result<FeePolicy, ServiceError> {
        Ok(self.policy().await?)
    }

    /// Replace the fee policy. Applies to splits computed from now on;
    /// captured payments keep the split they were charged with.
    ///
    /// # Errors
    ///
    /// Forbidden for non-admins; validation for rates above 100%.
    #[tracing::instrument(skip(self), fields(admin_id = %actor.user_id))]
    pub async fn update_fee_policy(&self, actor: Actor, policy: FeePolicy) -> Result<FeePolicy, ServiceError> {
        if !actor.is_admin() {
            return Err(DomainError::forbidden("only admins may change the fee policy").into());
        }
        policy.validate().map_err(DomainError::from)?;
        let previous = self.policy().await?;
        self.store.save_fee_policy(policy).await?;
        tracing::info!(
            previous_fee_bps = previous.starter_fee_bps,
            fee_bps = policy.starter_fee_bps,
            gst_bps = policy.gst_bps,
            minimum_charge = policy.minimum_charge.cents(),
            currency = policy.currency.code(),
            "Fee policy updated"
        );
        Ok(policy)
    }
}
