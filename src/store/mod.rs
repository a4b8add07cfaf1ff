//! Persistence seam for users, campaigns, leads and payments.
//!
//! [`PgStore`] backs the running service. [`MemoryStore`] keeps everything in
//! process and is what the test-suite drives the workflows against. Both must
//! honour the same atomicity contracts:
//!
//! - [`Store::create_campaign_charging_credit`] inserts the campaign and
//!   charges one credit together, or does neither.
//! - [`Store::record_payment_and_credit`] writes the payment record and raises
//!   `credits_total` together, and never credits a token twice.
//! - [`Store::apply_score`] updates the five scoring fields of one lead at once.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Campaign, CampaignCharge, CampaignStatus, Lead, LeadCounts, LeadScoreUpdate,
    LeadWithCampaign, NewCampaign, NewLead, NewPayment, PaymentInsert, PaymentRecord,
    UserProfile,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // ── Users ─────────────────────────────────────────────────────────────

    async fn find_user_by_api_key(&self, key_hash: &str)
        -> Result<Option<UserProfile>, AppError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError>;

    async fn create_user(
        &self,
        email: &str,
        credits_total: i32,
        key_hash: &str,
    ) -> Result<UserProfile, AppError>;

    // ── Campaigns ─────────────────────────────────────────────────────────

    /// Inserts a `generating` campaign and charges one credit in one step.
    ///
    /// The charge only applies while `credits_used < credits_total`; otherwise
    /// the insert is undone and [`CampaignCharge::InsufficientCredits`] is
    /// returned.
    async fn create_campaign_charging_credit(
        &self,
        user_id: Uuid,
        fields: &NewCampaign,
    ) -> Result<CampaignCharge, AppError>;

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), AppError>;

    /// Campaign owned by `user_id`; another user's campaign is `None`.
    async fn get_campaign(
        &self,
        user_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Option<Campaign>, AppError>;

    /// Newest first.
    async fn list_campaigns(&self, user_id: Uuid) -> Result<Vec<Campaign>, AppError>;

    // ── Leads ─────────────────────────────────────────────────────────────

    async fn insert_leads(&self, leads: &[NewLead]) -> Result<u64, AppError>;

    /// Leads of the campaign whose score is still null.
    async fn unscored_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>, AppError>;

    /// Score descending, unscored last.
    async fn campaign_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>, AppError>;

    /// Every lead across the user's campaigns, score descending, unscored last.
    async fn user_leads(&self, user_id: Uuid) -> Result<Vec<LeadWithCampaign>, AppError>;

    async fn recent_leads(&self, user_id: Uuid, limit: i64) -> Result<Vec<Lead>, AppError>;

    async fn lead_counts(&self, user_id: Uuid) -> Result<LeadCounts, AppError>;

    /// Lead plus its campaign, scoped to the campaign owner.
    async fn get_lead_with_campaign(
        &self,
        user_id: Uuid,
        lead_id: Uuid,
    ) -> Result<Option<(Lead, Campaign)>, AppError>;

    async fn apply_score(&self, lead_id: Uuid, update: &LeadScoreUpdate) -> Result<(), AppError>;

    // ── Payments ──────────────────────────────────────────────────────────

    async fn find_payment(&self, order_token: &str) -> Result<Option<PaymentRecord>, AppError>;

    /// Writes the payment record, then credits the user, as one unit.
    ///
    /// An existing record for the token is reported as
    /// [`PaymentInsert::Duplicate`] and leaves the ledger untouched.
    async fn record_payment_and_credit(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentInsert, AppError>;
}
