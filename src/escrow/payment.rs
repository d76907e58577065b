use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, PaymentError};

/// Proof that the payer's funding source accepted the charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub authorization_id: String,
}

/// External payment-authorization capability.
///
/// The ledger only needs the terminal outcome of an authorization attempt;
/// idempotency keys and the charge/capture split live behind this seam.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        payer_id: Uuid,
        amount: Decimal,
    ) -> AppResult<PaymentAuthorization>;
}

/// Development gateway: approves every charge up to a configurable cap.
/// The cap gives the decline path a deterministic trigger without a real
/// payment processor.
pub struct AutoApproveGateway {
    max_charge: Decimal,
}

impl AutoApproveGateway {
    pub fn new(max_charge: Decimal) -> Self {
        Self { max_charge }
    }
}

impl Default for AutoApproveGateway {
    fn default() -> Self {
        Self::new(dec!(10000))
    }
}

#[async_trait]
impl PaymentGateway for AutoApproveGateway {
    async fn authorize(
        &self,
        payer_id: Uuid,
        amount: Decimal,
    ) -> AppResult<PaymentAuthorization> {
        if amount > self.max_charge {
            return Err(PaymentError::AuthorizationFailed(format!(
                "charge {} exceeds the funding source limit",
                amount
            ))
            .into());
        }

        let authorization_id = format!("auth_{}", Uuid::new_v4().simple());
        info!(%payer_id, %amount, %authorization_id, "payment authorized");
        Ok(PaymentAuthorization { authorization_id })
    }
}

#[derive(Serialize)]
struct AuthorizeRequest {
    payer_id: Uuid,
    amount: Decimal,
    /// Lets the processor dedupe a retried create
    idempotency_key: Uuid,
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    approved: bool,
    authorization_id: Option<String>,
    decline_reason: Option<String>,
}

/// Gateway backed by an external HTTP payment processor. Selected when
/// `PAYMENT_GATEWAY_URL` is configured.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn authorize(
        &self,
        payer_id: Uuid,
        amount: Decimal,
    ) -> AppResult<PaymentAuthorization> {
        let url = format!("{}/authorizations", self.base_url.trim_end_matches('/'));
        let request = AuthorizeRequest {
            payer_id,
            amount,
            idempotency_key: Uuid::new_v4(),
        };

        let response: AuthorizeResponse = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.approved {
            return Err(PaymentError::AuthorizationFailed(
                response
                    .decline_reason
                    .unwrap_or_else(|| "declined by funding source".to_string()),
            )
            .into());
        }

        let authorization_id = response.authorization_id.ok_or_else(|| {
            PaymentError::GatewayUnreachable("approved without an authorization id".to_string())
        })?;

        Ok(PaymentAuthorization { authorization_id })
    }
}
