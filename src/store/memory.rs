use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::Store;
use crate::errors::AppError;
use crate::models::{
    Campaign, CampaignCharge, CampaignStatus, Lead, LeadCounts, LeadScoreUpdate,
    LeadWithCampaign, NewCampaign, NewLead, NewPayment, PaymentInsert, PaymentRecord,
    UserProfile,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserProfile>,
    api_keys: HashMap<String, Uuid>,
    campaigns: Vec<Campaign>,
    leads: Vec<Lead>,
    payments: HashMap<String, PaymentRecord>,
}

/// In-process store. Every operation holds one lock for its whole duration,
/// which gives the same all-or-nothing behaviour as the Postgres transactions.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrites both credit counters of an existing user.
    pub fn set_credits(&self, user_id: Uuid, credits_total: i32, credits_used: i32) {
        if let Some(user) = self.tables().users.get_mut(&user_id) {
            user.credits_total = credits_total;
            user.credits_used = credits_used;
        }
    }

    /// Snapshot of one lead, for assertions.
    pub fn lead(&self, lead_id: Uuid) -> Option<Lead> {
        self.tables().leads.iter().find(|l| l.id == lead_id).cloned()
    }

    pub fn payment_count(&self) -> usize {
        self.tables().payments.len()
    }

    pub fn campaign_count(&self) -> usize {
        self.tables().campaigns.len()
    }
}

fn by_score_desc_nulls_last(a: &Lead, b: &Lead) -> std::cmp::Ordering {
    match (a.score, b.score) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

fn owned_campaign_ids(tables: &Tables, user_id: Uuid) -> Vec<Uuid> {
    tables
        .campaigns
        .iter()
        .filter(|c| c.user_id == user_id)
        .map(|c| c.id)
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_api_key(
        &self,
        key_hash: &str,
    ) -> Result<Option<UserProfile>, AppError> {
        let tables = self.tables();
        Ok(tables
            .api_keys
            .get(key_hash)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
        Ok(self.tables().users.get(&user_id).cloned())
    }

    async fn create_user(
        &self,
        email: &str,
        credits_total: i32,
        key_hash: &str,
    ) -> Result<UserProfile, AppError> {
        let mut tables = self.tables();
        if tables.api_keys.contains_key(key_hash) {
            return Err(AppError::Conflict("API key already issued".to_string()));
        }

        let user = UserProfile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            credits_total,
            credits_used: 0,
            created_at: Utc::now(),
        };
        tables.api_keys.insert(key_hash.to_string(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn create_campaign_charging_credit(
        &self,
        user_id: Uuid,
        fields: &NewCampaign,
    ) -> Result<CampaignCharge, AppError> {
        let mut tables = self.tables();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("User profile not found".to_string()))?;

        if user.credits_used >= user.credits_total {
            return Ok(CampaignCharge::InsufficientCredits);
        }
        user.credits_used += 1;

        let campaign = Campaign {
            id: Uuid::new_v4(),
            user_id,
            niche: fields.niche.clone(),
            country: fields.country.clone(),
            target_role: fields.target_role.clone(),
            value_proposition: fields.value_proposition.clone(),
            status: CampaignStatus::Generating,
            created_at: Utc::now(),
        };
        tables.campaigns.push(campaign.clone());
        Ok(CampaignCharge::Charged(campaign))
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), AppError> {
        if let Some(campaign) = self
            .tables()
            .campaigns
            .iter_mut()
            .find(|c| c.id == campaign_id)
        {
            campaign.status = status;
        }
        Ok(())
    }

    async fn get_campaign(
        &self,
        user_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Option<Campaign>, AppError> {
        Ok(self
            .tables()
            .campaigns
            .iter()
            .find(|c| c.id == campaign_id && c.user_id == user_id)
            .cloned())
    }

    async fn list_campaigns(&self, user_id: Uuid) -> Result<Vec<Campaign>, AppError> {
        let mut campaigns: Vec<Campaign> = self
            .tables()
            .campaigns
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn insert_leads(&self, leads: &[NewLead]) -> Result<u64, AppError> {
        let mut tables = self.tables();
        let now = Utc::now();
        for new in leads {
            tables.leads.push(Lead {
                id: Uuid::new_v4(),
                campaign_id: new.campaign_id,
                business_name: new.business_name.clone(),
                contact_name: None,
                role: new.role.clone(),
                website: new.website.clone(),
                phone: new.phone.clone(),
                address: new.address.clone(),
                source: new.source.clone(),
                niche: new.niche.clone(),
                country: new.country.clone(),
                score: None,
                confidence_level: None,
                score_reasoning: None,
                is_high_priority: false,
                last_scored_at: None,
                status: new.status.clone(),
                created_at: now,
            });
        }
        Ok(leads.len() as u64)
    }

    async fn unscored_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>, AppError> {
        Ok(self
            .tables()
            .leads
            .iter()
            .filter(|l| l.campaign_id == campaign_id && l.score.is_none())
            .cloned()
            .collect())
    }

    async fn campaign_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .tables()
            .leads
            .iter()
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect();
        leads.sort_by(by_score_desc_nulls_last);
        Ok(leads)
    }

    async fn user_leads(&self, user_id: Uuid) -> Result<Vec<LeadWithCampaign>, AppError> {
        let tables = self.tables();
        let mut leads: Vec<LeadWithCampaign> = tables
            .leads
            .iter()
            .filter_map(|lead| {
                tables
                    .campaigns
                    .iter()
                    .find(|c| c.id == lead.campaign_id && c.user_id == user_id)
                    .map(|c| LeadWithCampaign {
                        lead: lead.clone(),
                        campaign_niche: c.niche.clone(),
                        campaign_country: c.country.clone(),
                    })
            })
            .collect();
        leads.sort_by(|a, b| by_score_desc_nulls_last(&a.lead, &b.lead));
        Ok(leads)
    }

    async fn recent_leads(&self, user_id: Uuid, limit: i64) -> Result<Vec<Lead>, AppError> {
        let tables = self.tables();
        let owned = owned_campaign_ids(&tables, user_id);
        let mut leads: Vec<Lead> = tables
            .leads
            .iter()
            .filter(|l| owned.contains(&l.campaign_id))
            .cloned()
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads.truncate(limit.max(0) as usize);
        Ok(leads)
    }

    async fn lead_counts(&self, user_id: Uuid) -> Result<LeadCounts, AppError> {
        let tables = self.tables();
        let owned = owned_campaign_ids(&tables, user_id);
        let leads: Vec<&Lead> = tables
            .leads
            .iter()
            .filter(|l| owned.contains(&l.campaign_id))
            .collect();
        Ok(LeadCounts {
            campaigns: owned.len() as i64,
            leads: leads.len() as i64,
            high_priority_leads: leads.iter().filter(|l| l.is_high_priority).count() as i64,
        })
    }

    async fn get_lead_with_campaign(
        &self,
        user_id: Uuid,
        lead_id: Uuid,
    ) -> Result<Option<(Lead, Campaign)>, AppError> {
        let tables = self.tables();
        let Some(lead) = tables.leads.iter().find(|l| l.id == lead_id) else {
            return Ok(None);
        };
        Ok(tables
            .campaigns
            .iter()
            .find(|c| c.id == lead.campaign_id && c.user_id == user_id)
            .map(|c| (lead.clone(), c.clone())))
    }

    async fn apply_score(&self, lead_id: Uuid, update: &LeadScoreUpdate) -> Result<(), AppError> {
        let mut tables = self.tables();
        let lead = tables
            .leads
            .iter_mut()
            .find(|l| l.id == lead_id)
            .ok_or_else(|| AppError::NotFound(format!("Lead {} no longer exists", lead_id)))?;

        lead.score = Some(update.score);
        lead.confidence_level = Some(update.confidence_level);
        lead.score_reasoning = Some(update.score_reasoning.clone());
        lead.is_high_priority = update.is_high_priority;
        lead.last_scored_at = Some(update.last_scored_at);
        Ok(())
    }

    async fn find_payment(&self, order_token: &str) -> Result<Option<PaymentRecord>, AppError> {
        Ok(self.tables().payments.get(order_token).cloned())
    }

    async fn record_payment_and_credit(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentInsert, AppError> {
        let mut tables = self.tables();
        if let Some(existing) = tables.payments.get(&payment.order_token) {
            return Ok(PaymentInsert::Duplicate(existing.clone()));
        }
        if !tables.users.contains_key(&payment.user_id) {
            return Err(AppError::NotFound("User profile not found".to_string()));
        }

        tables.payments.insert(
            payment.order_token.clone(),
            PaymentRecord {
                id: Uuid::new_v4(),
                order_token: payment.order_token.clone(),
                user_id: payment.user_id,
                pack_id: payment.pack_id.clone(),
                credits_added: payment.credits_added,
                created_at: Utc::now(),
            },
        );

        let user = tables
            .users
            .get_mut(&payment.user_id)
            .ok_or_else(|| AppError::NotFound("User profile not found".to_string()))?;
        user.credits_total += payment.credits_added;
        Ok(PaymentInsert::Inserted {
            credits_total: user.credits_total,
        })
    }
}
