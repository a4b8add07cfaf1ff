use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::credits::{credit_status, CreditStatus};
use crate::errors::AppError;
use crate::models::{Campaign, Lead, UserProfile};
use crate::store::Store;

pub const VIEW_TTL: Duration = Duration::from_secs(60);

/// How many leads the dashboard lists.
pub const RECENT_LEADS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub credits: CreditStatus,
    pub campaign_count: i64,
    pub lead_count: i64,
    pub high_priority_count: i64,
    pub recent_leads: Vec<Lead>,
}

/// Per-user cached read views, dropped whenever the user's data changes.
#[derive(Clone)]
pub struct ViewCache {
    campaigns: Cache<Uuid, Arc<Vec<Campaign>>>,
    dashboard: Cache<Uuid, Arc<DashboardView>>,
}

impl ViewCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            campaigns: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(10_000)
                .build(),
            dashboard: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(10_000)
                .build(),
        }
    }

    pub async fn campaigns(
        &self,
        store: &dyn Store,
        user_id: Uuid,
    ) -> Result<Arc<Vec<Campaign>>, AppError> {
        if let Some(cached) = self.campaigns.get(&user_id).await {
            tracing::debug!("Campaign list cache hit for {}", user_id);
            return Ok(cached);
        }

        let campaigns = Arc::new(store.list_campaigns(user_id).await?);
        self.campaigns.insert(user_id, campaigns.clone()).await;
        Ok(campaigns)
    }

    pub async fn dashboard(
        &self,
        store: &dyn Store,
        user: &UserProfile,
    ) -> Result<Arc<DashboardView>, AppError> {
        if let Some(cached) = self.dashboard.get(&user.id).await {
            tracing::debug!("Dashboard cache hit for {}", user.id);
            return Ok(cached);
        }

        let counts = store.lead_counts(user.id).await?;
        let recent_leads = store.recent_leads(user.id, RECENT_LEADS).await?;

        let view = Arc::new(DashboardView {
            credits: credit_status(user.credits_total.into(), user.credits_used.into()),
            campaign_count: counts.campaigns,
            lead_count: counts.leads,
            high_priority_count: counts.high_priority_leads,
            recent_leads,
        });
        self.dashboard.insert(user.id, view.clone()).await;
        Ok(view)
    }

    pub async fn invalidate_user(&self, user_id: Uuid) {
        self.campaigns.invalidate(&user_id).await;
        self.dashboard.invalidate(&user_id).await;
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(VIEW_TTL)
    }
}
