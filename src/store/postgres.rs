use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::Store;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    Campaign, CampaignCharge, CampaignStatus, Lead, LeadCounts, LeadScoreUpdate,
    LeadWithCampaign, NewCampaign, NewLead, NewPayment, PaymentInsert, PaymentRecord,
    UserProfile,
};

const USER_COLUMNS: &str = "id, email, credits_total, credits_used, created_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user_by_api_key(
        &self,
        key_hash: &str,
    ) -> Result<Option<UserProfile>, AppError> {
        let user = sqlx::query_as::<_, UserProfile>(&format!(
            "SELECT {} FROM users WHERE api_key_hash = $1",
            USER_COLUMNS
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
        let user = sqlx::query_as::<_, UserProfile>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_user(
        &self,
        email: &str,
        credits_total: i32,
        key_hash: &str,
    ) -> Result<UserProfile, AppError> {
        let user = sqlx::query_as::<_, UserProfile>(&format!(
            r#"
            INSERT INTO users (email, credits_total, credits_used, api_key_hash)
            VALUES ($1, $2, 0, $3)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(email)
        .bind(credits_total)
        .bind(key_hash)
        .fetch_one(&self.pool)
        .await
        .context("creating user profile")?;

        Ok(user)
    }

    async fn create_campaign_charging_credit(
        &self,
        user_id: Uuid,
        fields: &NewCampaign,
    ) -> Result<CampaignCharge, AppError> {
        let mut tx = self.pool.begin().await?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (user_id, niche, country, target_role, value_proposition, status)
            VALUES ($1, $2, $3, $4, $5, 'generating')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&fields.niche)
        .bind(&fields.country)
        .bind(&fields.target_role)
        .bind(&fields.value_proposition)
        .fetch_one(&mut *tx)
        .await
        .context("inserting campaign")?;

        // Conditional charge: matches nothing once the balance is exhausted.
        let charged = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET credits_used = credits_used + 1
            WHERE id = $1 AND credits_used < credits_total
            RETURNING credits_used
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("charging campaign credit")?;

        match charged {
            Some(used) => {
                tx.commit().await?;
                tracing::debug!("Charged 1 credit to user {} (used now {})", user_id, used);
                Ok(CampaignCharge::Charged(campaign))
            }
            None => {
                tx.rollback().await?;
                Ok(CampaignCharge::InsufficientCredits)
            }
        }
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE campaigns SET status = $2 WHERE id = $1")
            .bind(campaign_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_campaign(
        &self,
        user_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Option<Campaign>, AppError> {
        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE id = $1 AND user_id = $2",
        )
        .bind(campaign_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }

    async fn list_campaigns(&self, user_id: Uuid) -> Result<Vec<Campaign>, AppError> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    async fn insert_leads(&self, leads: &[NewLead]) -> Result<u64, AppError> {
        if leads.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO leads (campaign_id, business_name, role, website, phone, address, source, niche, country, status) ",
        );
        builder.push_values(leads, |mut row, lead| {
            row.push_bind(lead.campaign_id)
                .push_bind(&lead.business_name)
                .push_bind(&lead.role)
                .push_bind(&lead.website)
                .push_bind(&lead.phone)
                .push_bind(&lead.address)
                .push_bind(&lead.source)
                .push_bind(&lead.niche)
                .push_bind(&lead.country)
                .push_bind(&lead.status);
        });

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .context("bulk inserting leads")?;

        Ok(result.rows_affected())
    }

    async fn unscored_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>, AppError> {
        let leads = sqlx::query_as::<_, Lead>(
            "SELECT * FROM leads WHERE campaign_id = $1 AND score IS NULL ORDER BY created_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(leads)
    }

    async fn campaign_leads(&self, campaign_id: Uuid) -> Result<Vec<Lead>, AppError> {
        let leads = sqlx::query_as::<_, Lead>(
            "SELECT * FROM leads WHERE campaign_id = $1 ORDER BY score DESC NULLS LAST, created_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(leads)
    }

    async fn user_leads(&self, user_id: Uuid) -> Result<Vec<LeadWithCampaign>, AppError> {
        let leads = sqlx::query_as::<_, LeadWithCampaign>(
            r#"
            SELECT l.*, c.niche AS campaign_niche, c.country AS campaign_country
            FROM leads l
            JOIN campaigns c ON c.id = l.campaign_id
            WHERE c.user_id = $1
            ORDER BY l.score DESC NULLS LAST, l.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(leads)
    }

    async fn recent_leads(&self, user_id: Uuid, limit: i64) -> Result<Vec<Lead>, AppError> {
        let leads = sqlx::query_as::<_, Lead>(
            r#"
            SELECT l.*
            FROM leads l
            JOIN campaigns c ON c.id = l.campaign_id
            WHERE c.user_id = $1
            ORDER BY l.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(leads)
    }

    async fn lead_counts(&self, user_id: Uuid) -> Result<LeadCounts, AppError> {
        let (campaigns, leads, high_priority_leads) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM campaigns WHERE user_id = $1),
                (SELECT COUNT(*) FROM leads l JOIN campaigns c ON c.id = l.campaign_id
                  WHERE c.user_id = $1),
                (SELECT COUNT(*) FROM leads l JOIN campaigns c ON c.id = l.campaign_id
                  WHERE c.user_id = $1 AND l.is_high_priority)
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LeadCounts {
            campaigns,
            leads,
            high_priority_leads,
        })
    }

    async fn get_lead_with_campaign(
        &self,
        user_id: Uuid,
        lead_id: Uuid,
    ) -> Result<Option<(Lead, Campaign)>, AppError> {
        let lead = sqlx::query_as::<_, Lead>(
            r#"
            SELECT l.*
            FROM leads l
            JOIN campaigns c ON c.id = l.campaign_id
            WHERE l.id = $1 AND c.user_id = $2
            "#,
        )
        .bind(lead_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(lead) = lead else {
            return Ok(None);
        };

        let campaign = self.get_campaign(user_id, lead.campaign_id).await?;
        Ok(campaign.map(|campaign| (lead, campaign)))
    }

    async fn apply_score(&self, lead_id: Uuid, update: &LeadScoreUpdate) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET score = $2,
                confidence_level = $3,
                score_reasoning = $4,
                is_high_priority = $5,
                last_scored_at = $6
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(update.score)
        .bind(update.confidence_level)
        .bind(&update.score_reasoning)
        .bind(update.is_high_priority)
        .bind(update.last_scored_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("storing score for lead {}", lead_id))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Lead {} no longer exists", lead_id)));
        }
        Ok(())
    }

    async fn find_payment(&self, order_token: &str) -> Result<Option<PaymentRecord>, AppError> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE order_token = $1",
        )
        .bind(order_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn record_payment_and_credit(
        &self,
        payment: &NewPayment,
    ) -> Result<PaymentInsert, AppError> {
        let mut tx = self.pool.begin().await?;

        // The unique index on order_token is the idempotency gate.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO payments (order_token, user_id, pack_id, credits_added)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_token) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&payment.order_token)
        .bind(payment.user_id)
        .bind(&payment.pack_id)
        .bind(payment.credits_added)
        .fetch_optional(&mut *tx)
        .await
        .context("recording payment")?;

        if inserted.is_none() {
            tx.rollback().await?;
            let existing = self.find_payment(&payment.order_token).await?.ok_or_else(|| {
                AppError::InternalError(format!(
                    "payment {} conflicted but could not be read back",
                    payment.order_token
                ))
            })?;
            return Ok(PaymentInsert::Duplicate(existing));
        }

        let credits_total = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET credits_total = credits_total + $2
            WHERE id = $1
            RETURNING credits_total
            "#,
        )
        .bind(payment.user_id)
        .bind(payment.credits_added)
        .fetch_optional(&mut *tx)
        .await
        .context("crediting purchased pack")?
        .ok_or_else(|| AppError::NotFound("User profile not found".to_string()))?;

        tx.commit().await?;
        Ok(PaymentInsert::Inserted { credits_total })
    }
}
