//! Payment gateway collaborator.
//!
//! The charge call is external to this service; the trait is the whole
//! contract the checkout flow depends on.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::Result;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the user and return the gateway's transaction reference.
    async fn charge(&self, user_id: Uuid, amount: Decimal, token: &str) -> Result<String>;
}

/// Gateway used when no processor is configured: accepts every charge and
/// issues a local transaction reference.
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn charge(&self, user_id: Uuid, amount: Decimal, _token: &str) -> Result<String> {
        let txn_ref = format!("OFF-{:08}", rand::random::<u32>());
        tracing::info!(user = %user_id, %amount, %txn_ref, "recorded offline charge");
        Ok(txn_ref)
    }
}
