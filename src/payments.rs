//! Credit pack checkout and capture.
//!
//! Credits are granted at most once per order token: the store's
//! `record_payment_and_credit` writes the payment record and raises the
//! ceiling in one transaction, and the unique token column turns a second
//! attempt into a [`PaymentInsert::Duplicate`] instead of a second credit.

use serde::Serialize;
use uuid::Uuid;

use crate::credits::{find_pack, CreditPack};
use crate::errors::AppError;
use crate::models::{CheckoutResponse, NewPayment, PaymentInsert, PaymentRecord};
use crate::paypal::{is_valid_order_token, OrderRequest, PayPalClient};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// Credits were added by this call.
    Captured,
    /// The order had been credited before; nothing was added.
    AlreadyProcessed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub status: CaptureStatus,
    pub pack_id: String,
    pub pack_label: String,
    pub pack_credits: i32,
    /// The user's `credits_total` after this call.
    pub credits_total: i32,
}

impl CaptureResult {
    pub fn added_credits(&self) -> i32 {
        match self.status {
            CaptureStatus::Captured => self.pack_credits,
            CaptureStatus::AlreadyProcessed => 0,
        }
    }
}

fn security_violation() -> AppError {
    AppError::SecurityViolation("Security check failed: order does not belong to your user.".to_string())
}

async fn current_total(store: &dyn Store, user_id: Uuid) -> Result<i32, AppError> {
    store
        .get_user(user_id)
        .await?
        .map(|user| user.credits_total)
        .ok_or_else(|| AppError::NotFound("User profile not found".to_string()))
}

/// Replays a stored record owned by `user_id` as an already-processed capture.
async fn replay(
    store: &dyn Store,
    record: PaymentRecord,
    user_id: Uuid,
) -> Result<CaptureResult, AppError> {
    let pack_label = find_pack(&record.pack_id)
        .map(|pack| pack.label.to_string())
        .unwrap_or_else(|| record.pack_id.clone());

    Ok(CaptureResult {
        status: CaptureStatus::AlreadyProcessed,
        pack_id: record.pack_id,
        pack_label,
        pack_credits: record.credits_added,
        credits_total: current_total(store, user_id).await?,
    })
}

/// Captures an approved order and credits the pack to `user_id` once.
pub async fn capture_order(
    store: &dyn Store,
    paypal: &PayPalClient,
    order_token: &str,
    user_id: Uuid,
) -> Result<CaptureResult, AppError> {
    if !is_valid_order_token(order_token) {
        tracing::warn!("Rejected malformed order token from user {}", user_id);
        return Err(AppError::BadRequest("Invalid order token.".to_string()));
    }

    let capture = paypal.capture_order(order_token).await?;

    if !capture.is_completed() {
        if capture.is_already_captured() {
            return match store.find_payment(order_token).await? {
                Some(record) if record.user_id == user_id => {
                    tracing::info!("Order {} already captured and credited", order_token);
                    replay(store, record, user_id).await
                }
                Some(record) => {
                    tracing::warn!(
                        "User {} tried to replay order {} owned by {}",
                        user_id,
                        order_token,
                        record.user_id
                    );
                    Err(security_violation())
                }
                None => {
                    tracing::error!(
                        "Order {} captured upstream but has no payment record (user {})",
                        order_token,
                        user_id
                    );
                    Err(AppError::ReconciliationRequired(
                        "Order was captured but not credited. Please contact support.".to_string(),
                    ))
                }
            };
        }

        if capture.is_declined() {
            return Err(AppError::ExternalApiError(
                "Payment instrument was declined.".to_string(),
            ));
        }

        return Err(AppError::ExternalApiError(capture.failure_message()));
    }

    let metadata = capture.metadata();
    if metadata.user_id != user_id.to_string() {
        tracing::warn!(
            "Order {} metadata names user '{}', caller is {}",
            order_token,
            metadata.user_id,
            user_id
        );
        return Err(security_violation());
    }

    let pack = find_pack(&metadata.pack_id).ok_or_else(|| {
        AppError::BadRequest("Invalid credit pack detected in order.".to_string())
    })?;

    let payment = NewPayment {
        order_token: order_token.to_string(),
        user_id,
        pack_id: pack.id.to_string(),
        credits_added: pack.amount,
    };

    match store.record_payment_and_credit(&payment).await? {
        PaymentInsert::Inserted { credits_total } => {
            tracing::info!(
                "Credited {} ({} credits) to user {} for order {}",
                pack.id,
                pack.amount,
                user_id,
                order_token
            );
            Ok(CaptureResult {
                status: CaptureStatus::Captured,
                pack_id: pack.id.to_string(),
                pack_label: pack.label.to_string(),
                pack_credits: pack.amount,
                credits_total,
            })
        }
        PaymentInsert::Duplicate(record) if record.user_id != user_id => {
            tracing::error!(
                "Order {} already recorded for user {}, not {}",
                order_token,
                record.user_id,
                user_id
            );
            Err(AppError::Conflict(
                "Order was already processed for another account.".to_string(),
            ))
        }
        PaymentInsert::Duplicate(_) => {
            tracing::info!("Order {} replayed; no credit added", order_token);
            Ok(CaptureResult {
                status: CaptureStatus::AlreadyProcessed,
                pack_id: pack.id.to_string(),
                pack_label: pack.label.to_string(),
                pack_credits: pack.amount,
                credits_total: current_total(store, user_id).await?,
            })
        }
    }
}

fn resolve_pack(pack_id: Option<&str>) -> Result<&'static CreditPack, AppError> {
    pack_id
        .and_then(find_pack)
        .ok_or_else(|| AppError::BadRequest("Invalid pack".to_string()))
}

/// Creates a PayPal order for the pack and returns the approval URL.
pub async fn create_checkout(
    paypal: &PayPalClient,
    app_url: &str,
    user_id: Uuid,
    pack_id: Option<&str>,
) -> Result<CheckoutResponse, AppError> {
    let pack = resolve_pack(pack_id)?;
    let base = app_url.trim_end_matches('/');

    let order = OrderRequest {
        pack,
        user_id,
        return_url: format!("{}/billing/success", base),
        cancel_url: format!("{}/settings#credits", base),
    };

    let checkout_url = paypal.create_order(&order).await?;
    Ok(CheckoutResponse { checkout_url })
}

/// Card checkout entry point. No pack carries a card price yet.
pub fn card_checkout(pack_id: Option<&str>) -> Result<CheckoutResponse, AppError> {
    let pack = resolve_pack(pack_id)?;
    match pack.stripe_price_id {
        Some(price_id) => Err(AppError::NotImplemented(format!(
            "Card checkout for price {} is not available",
            price_id
        ))),
        None => Err(AppError::NotImplemented(
            "Card checkout is not configured. Use PayPal checkout instead.".to_string(),
        )),
    }
}

/// What the billing success page shows after a capture attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i32>,
    pub added_credits: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_total: Option<i32>,
}

impl BillingOutcome {
    pub fn from_capture(result: &Result<CaptureResult, AppError>) -> Self {
        match result {
            Ok(capture) => {
                let message = match capture.status {
                    CaptureStatus::Captured => format!(
                        "You've successfully added {} AI credits to your account.",
                        capture.pack_credits
                    ),
                    CaptureStatus::AlreadyProcessed => {
                        "Order was already processed successfully.".to_string()
                    }
                };
                Self {
                    success: true,
                    message,
                    pack_label: Some(capture.pack_label.clone()),
                    credits: Some(capture.pack_credits),
                    added_credits: capture.added_credits(),
                    credits_total: Some(capture.credits_total),
                }
            }
            Err(e) => Self {
                success: false,
                message: e.user_message(),
                pack_label: None,
                credits: None,
                added_credits: 0,
                credits_total: None,
            },
        }
    }
}
