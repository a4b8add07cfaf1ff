//! Lead scoring against the text-generation model.
//!
//! [`score_campaign`] walks a campaign's unscored leads in fixed batches of
//! [`BATCH_SIZE`]: every lead of a batch is scored concurrently and the next
//! batch starts only once all calls of the current one have settled, so at
//! most five model calls are ever in flight. A failing lead is counted and
//! keeps a null score, which makes it eligible again on the next run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::gemini::{parse_model_json, GeminiClient, GenerationSettings};
use crate::models::{Campaign, Lead, LeadScoreUpdate};
use crate::store::Store;

pub const BATCH_SIZE: usize = 5;

/// Leads at or above this score are flagged high priority.
pub const HIGH_PRIORITY_THRESHOLD: i32 = 80;

pub const SCORING_SETTINGS: GenerationSettings = GenerationSettings {
    temperature: 0.2,
    max_output_tokens: 200,
    error_body_limit: 150,
};

/// Raw reply shape; numbers may arrive as floats or out of range.
#[derive(Debug, Deserialize)]
struct ModelScore {
    score: f64,
    confidence_level: f64,
    #[serde(default)]
    score_reasoning: String,
    #[serde(default)]
    #[allow(dead_code)]
    is_high_priority: Option<bool>,
}

/// A validated score for one lead.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: i32,
    pub confidence_level: i32,
    pub score_reasoning: String,
}

impl ScoreOutcome {
    /// Derived from the clamped score; the model's own flag is ignored.
    pub fn is_high_priority(&self) -> bool {
        self.score >= HIGH_PRIORITY_THRESHOLD
    }

    pub fn to_update(&self, scored_at: DateTime<Utc>) -> LeadScoreUpdate {
        LeadScoreUpdate {
            score: self.score,
            confidence_level: self.confidence_level,
            score_reasoning: self.score_reasoning.clone(),
            is_high_priority: self.is_high_priority(),
            last_scored_at: scored_at,
        }
    }
}

/// Rounds first, then clamps into 0..=100.
pub fn clamp_percent(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as i32
}

/// Parses a cleaned model reply into a [`ScoreOutcome`].
pub fn parse_score_reply(text: &str) -> Result<ScoreOutcome, AppError> {
    let raw: ModelScore = parse_model_json(text)?;
    Ok(ScoreOutcome {
        score: clamp_percent(raw.score),
        confidence_level: clamp_percent(raw.confidence_level),
        score_reasoning: raw.score_reasoning,
    })
}

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("Unknown")
}

/// Builds the scoring prompt. Output depends only on the two records.
pub fn build_scoring_prompt(lead: &Lead, campaign: &Campaign) -> String {
    format!(
        r#"You are a skeptical B2B sales analyst. Judge how well this business fits the campaign below and do not inflate the number.

CAMPAIGN
- Target niche: {campaign_niche}
- Target country: {campaign_country}
- Decision maker sought: {target_role}
- Offer: {value_proposition}

LEAD
- Business name: {business_name}
- Website: {website}
- Contact role: {role}
- Niche: {lead_niche}
- Country: {lead_country}

Score out of 100 using these weighted criteria:
1. Niche match (25 points): does the business operate in the target niche?
2. Company size signals (20 points): is it large enough to buy the offer?
3. Decision maker reachability (20 points): is the sought role likely present and reachable?
4. Pain point alignment (25 points): would the offer solve a problem this business has?
5. Geography and digital presence (10 points): right country, and a working online footprint?

Read the total as:
- 90-100: ideal fit, contact now
- 70-89: strong fit
- 50-69: workable fit with gaps
- 30-49: weak fit
- 0-29: not a fit

confidence_level (0-100) says how sure you are given the limited data.

Reply with JSON only, no prose and no code fences:
{{"score": <0-100>, "confidence_level": <0-100>, "score_reasoning": "<two sentences at most>", "is_high_priority": <true|false>}}"#,
        campaign_niche = campaign.niche,
        campaign_country = campaign.country,
        target_role = campaign.target_role,
        value_proposition = campaign.value_proposition,
        business_name = lead.business_name,
        website = or_unknown(lead.website.as_deref()),
        role = or_unknown(Some(lead.role.as_str())),
        lead_niche = or_unknown(Some(lead.niche.as_str())),
        lead_country = or_unknown(Some(lead.country.as_str())),
    )
}

/// Scores one lead and persists the result.
#[async_trait]
pub trait LeadScorer: Send + Sync {
    async fn score_lead(&self, lead: &Lead, campaign: &Campaign) -> Result<ScoreOutcome, AppError>;
}

/// Production scorer: one model call, then one atomic update of the lead.
pub struct ModelLeadScorer {
    gemini: GeminiClient,
    store: Arc<dyn Store>,
}

impl ModelLeadScorer {
    pub fn new(gemini: GeminiClient, store: Arc<dyn Store>) -> Self {
        Self { gemini, store }
    }
}

#[async_trait]
impl LeadScorer for ModelLeadScorer {
    async fn score_lead(&self, lead: &Lead, campaign: &Campaign) -> Result<ScoreOutcome, AppError> {
        let prompt = build_scoring_prompt(lead, campaign);
        let reply = self.gemini.generate(&prompt, &SCORING_SETTINGS).await?;
        let outcome = parse_score_reply(&reply)?;

        self.store
            .apply_score(lead.id, &outcome.to_update(Utc::now()))
            .await?;

        tracing::debug!(
            "Scored lead {} ({}): {} (confidence {})",
            lead.id,
            lead.business_name,
            outcome.score,
            outcome.confidence_level
        );
        Ok(outcome)
    }
}

/// Result of one scoring run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScoreRun {
    /// Nothing was left to score; no model calls were made.
    AlreadyScored { scored: usize, message: String },
    Completed {
        scored: usize,
        errors: usize,
        total: usize,
        #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
    },
}

impl ScoreRun {
    fn already_scored() -> Self {
        ScoreRun::AlreadyScored {
            scored: 0,
            message: "All leads already scored".to_string(),
        }
    }
}

/// Scores every lead of the caller's campaign that has no score yet.
pub async fn score_campaign(
    store: &dyn Store,
    scorer: &dyn LeadScorer,
    user_id: Uuid,
    campaign_id: Uuid,
) -> Result<ScoreRun, AppError> {
    let campaign = store
        .get_campaign(user_id, campaign_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Campaign not found".to_string()))?;

    let leads = store.unscored_leads(campaign.id).await?;
    if leads.is_empty() {
        tracing::info!("Campaign {} has no unscored leads", campaign.id);
        return Ok(ScoreRun::already_scored());
    }

    let total = leads.len();
    let mut scored = 0;
    let mut errors = 0;
    let mut last_error = None;

    tracing::info!(
        "Scoring {} leads for campaign {} in batches of {}",
        total,
        campaign.id,
        BATCH_SIZE
    );

    for batch in leads.chunks(BATCH_SIZE) {
        let results = join_all(batch.iter().map(|lead| scorer.score_lead(lead, &campaign))).await;

        for (lead, result) in batch.iter().zip(results) {
            match result {
                Ok(_) => scored += 1,
                Err(e) => {
                    tracing::warn!("Scoring lead {} failed: {}", lead.id, e);
                    errors += 1;
                    last_error = Some(e.user_message());
                }
            }
        }
    }

    tracing::info!(
        "Campaign {} scoring finished: {} scored, {} errors of {}",
        campaign.id,
        scored,
        errors,
        total
    );

    Ok(ScoreRun::Completed {
        scored,
        errors,
        total,
        last_error,
    })
}
