use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// ============ Database Models ============

/// Profile row holding the two credit counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    /// Ceiling; grows only through purchases.
    pub credits_total: i32,
    /// Monotonic; one increment per campaign creation.
    pub credits_used: i32,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a campaign while it is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Generating,
    Active,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Generating => "generating",
            CampaignStatus::Active => "active",
        }
    }
}

/// Raised when a status column holds a value this build does not know.
#[derive(Debug)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown campaign status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl TryFrom<String> for CampaignStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "generating" => Ok(CampaignStatus::Generating),
            "active" => Ok(CampaignStatus::Active),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// A user-defined prospecting run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: Uuid,
    pub niche: String,
    pub country: String,
    pub target_role: String,
    pub value_proposition: String,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields a user supplies when creating a campaign.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCampaign {
    #[serde(default)]
    pub niche: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub target_role: String,
    #[serde(default)]
    pub value_proposition: String,
}

impl NewCampaign {
    /// Names of the required fields left blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("niche", &self.niche),
            ("country", &self.country),
            ("target_role", &self.target_role),
            ("value_proposition", &self.value_proposition),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// A prospective business contact discovered for a campaign.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub business_name: String,
    pub contact_name: Option<String>,
    pub role: String,
    pub website: Option<String>,
    /// E.164 phone number when the place listing carried one.
    pub phone: Option<String>,
    pub address: Option<String>,
    pub source: String,
    pub niche: String,
    pub country: String,
    /// 0-100, `None` until scored.
    pub score: Option<i32>,
    pub confidence_level: Option<i32>,
    pub score_reasoning: Option<String>,
    /// Always `score >= 80`.
    pub is_high_priority: bool,
    pub last_scored_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Lead row to insert in bulk after a places search.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub campaign_id: Uuid,
    pub business_name: String,
    pub role: String,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub source: String,
    pub niche: String,
    pub country: String,
    pub status: String,
}

/// The five fields written by one scoring call, applied as one update.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadScoreUpdate {
    pub score: i32,
    pub confidence_level: i32,
    pub score_reasoning: String,
    pub is_high_priority: bool,
    pub last_scored_at: DateTime<Utc>,
}

/// Lead row joined with the niche/country of its campaign.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LeadWithCampaign {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub lead: Lead,
    pub campaign_niche: String,
    pub campaign_country: String,
}

/// Idempotency record: at most one per order token.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_token: String,
    pub user_id: Uuid,
    pub pack_id: String,
    pub credits_added: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_token: String,
    pub user_id: Uuid,
    pub pack_id: String,
    pub credits_added: i32,
}

/// Result of the atomic insert-then-credit step.
#[derive(Debug, Clone)]
pub enum PaymentInsert {
    /// Record written and `credits_total` raised to the contained value.
    Inserted { credits_total: i32 },
    /// A record for this token already exists; nothing was credited.
    Duplicate(PaymentRecord),
}

/// Result of the atomic insert-campaign-and-charge step.
#[derive(Debug, Clone)]
pub enum CampaignCharge {
    Charged(Campaign),
    /// The conditional charge matched nothing; the insert was rolled back.
    InsufficientCredits,
}

/// Aggregate counters shown on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct LeadCounts {
    pub campaigns: i64,
    pub leads: i64,
    pub high_priority_leads: i64,
}

// ============ API Models ============

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub campaign_id: Option<Uuid>,
}

/// Outreach channel for generated copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Email,
    Linkedin,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub lead_id: Option<Uuid>,
    #[serde(default, rename = "type", deserialize_with = "message_kind_or_linkedin")]
    pub kind: MessageKind,
}

/// Anything other than `"email"` (or no value) selects LinkedIn copy.
fn message_kind_or_linkedin<'de, D>(deserializer: D) -> Result<MessageKind, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        None | Some("email") => MessageKind::Email,
        Some(_) => MessageKind::Linkedin,
    })
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackRequest {
    pub pack_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BillingQuery {
    pub token: Option<String>,
    #[serde(rename = "PayerID")]
    pub payer_id: Option<String>,
}

/// Error body returned by every failing route.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
