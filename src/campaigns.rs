//! Campaign creation: charge one credit, discover places, store them as leads.
//!
//! The flow never raises: every ending is a [`CampaignOutcome`] the form
//! handler turns into a redirect.

use crate::credits::credit_status;
use crate::models::{Campaign, CampaignCharge, CampaignStatus, NewCampaign, NewLead, UserProfile};
use crate::places::{Place, PlacesClient};
use crate::store::Store;
use crate::views::ViewCache;

/// Places requested per campaign.
pub const PLACES_RESULT_LIMIT: u32 = 20;

pub const LEAD_SOURCE: &str = "Google Places API";
pub const LEAD_STATUS_NEW: &str = "new";
pub const UNKNOWN_BUSINESS: &str = "Unknown Business";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignFailure {
    MissingFields,
    NoCredits,
    DbError,
    ServerError,
}

impl CampaignFailure {
    /// Code carried in the `error` query parameter of the redirect.
    pub fn code(&self) -> &'static str {
        match self {
            CampaignFailure::MissingFields => "missing_fields",
            CampaignFailure::NoCredits => "no_credits",
            CampaignFailure::DbError => "db_error",
            CampaignFailure::ServerError => "server_error",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CampaignOutcome {
    Created {
        campaign: Campaign,
        leads_found: usize,
    },
    Failed {
        kind: CampaignFailure,
        message: String,
    },
}

impl CampaignOutcome {
    fn failed(kind: CampaignFailure, message: impl Into<String>) -> Self {
        CampaignOutcome::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn redirect_path(&self) -> String {
        match self {
            CampaignOutcome::Created { campaign, .. } => format!("/campaigns/{}", campaign.id),
            CampaignOutcome::Failed { kind, .. } => {
                format!("/campaigns/new?error={}", kind.code())
            }
        }
    }
}

/// Maps one place to a lead row for `campaign`.
pub fn lead_from_place(campaign: &Campaign, place: &Place) -> NewLead {
    NewLead {
        campaign_id: campaign.id,
        business_name: place.name().unwrap_or(UNKNOWN_BUSINESS).to_string(),
        role: campaign.target_role.clone(),
        website: place.website_uri.clone(),
        phone: place
            .e164_phone()
            .or_else(|| place.national_phone_number.clone()),
        address: place.formatted_address.clone(),
        source: LEAD_SOURCE.to_string(),
        niche: campaign.niche.clone(),
        country: campaign.country.clone(),
        status: LEAD_STATUS_NEW.to_string(),
    }
}

/// Runs the whole creation flow for `user`.
///
/// Nothing is charged when the balance is exhausted or the campaign insert
/// fails. Once charged, a places failure only means zero leads, while a
/// failing lead insert or status update ends in `ServerError`.
pub async fn create_campaign(
    store: &dyn Store,
    places: &PlacesClient,
    views: &ViewCache,
    user: &UserProfile,
    fields: &NewCampaign,
) -> CampaignOutcome {
    let missing = fields.missing_fields();
    if !missing.is_empty() {
        return CampaignOutcome::failed(
            CampaignFailure::MissingFields,
            format!("Missing fields: {}", missing.join(", ")),
        );
    }

    let credits = credit_status(user.credits_total.into(), user.credits_used.into());
    if credits.available <= 0 {
        tracing::info!("User {} has no credits left, campaign not created", user.id);
        return CampaignOutcome::failed(CampaignFailure::NoCredits, credits.label);
    }

    let campaign = match store.create_campaign_charging_credit(user.id, fields).await {
        Ok(CampaignCharge::Charged(campaign)) => campaign,
        Ok(CampaignCharge::InsufficientCredits) => {
            tracing::info!("User {} ran out of credits while creating a campaign", user.id);
            return CampaignOutcome::failed(CampaignFailure::NoCredits, "No credits left");
        }
        Err(e) => {
            tracing::error!("Failed to insert campaign for user {}: {}", user.id, e);
            return CampaignOutcome::failed(CampaignFailure::DbError, e.user_message());
        }
    };

    // The charge landed; cached balances are stale from here on.
    views.invalidate_user(user.id).await;

    tracing::info!(
        "Campaign {} created for user {}: {} in {}",
        campaign.id,
        user.id,
        campaign.niche,
        campaign.country
    );

    let query = format!("{} in {}", campaign.niche, campaign.country);
    let found = places.search_best_effort(&query, PLACES_RESULT_LIMIT).await;
    let leads: Vec<NewLead> = found
        .iter()
        .map(|place| lead_from_place(&campaign, place))
        .collect();

    if let Err(e) = store.insert_leads(&leads).await {
        tracing::error!("Failed to store leads for campaign {}: {}", campaign.id, e);
        return CampaignOutcome::failed(CampaignFailure::ServerError, e.user_message());
    }

    if let Err(e) = store
        .set_campaign_status(campaign.id, CampaignStatus::Active)
        .await
    {
        tracing::error!("Failed to activate campaign {}: {}", campaign.id, e);
        return CampaignOutcome::failed(CampaignFailure::ServerError, e.user_message());
    }

    views.invalidate_user(user.id).await;

    tracing::info!(
        "Campaign {} active with {} leads",
        campaign.id,
        leads.len()
    );

    let campaign = Campaign {
        status: CampaignStatus::Active,
        ..campaign
    };
    CampaignOutcome::Created {
        campaign,
        leads_found: leads.len(),
    }
}
