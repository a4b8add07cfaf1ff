use crate::config::Config;
use crate::credits::CreditPack;
use crate::errors::{truncate_chars, AppError};
use moka::future::Cache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Brand shown on the PayPal approval page.
pub const BRAND_NAME: &str = "AI Prospect Engine";

const TOKEN_CACHE_KEY: &str = "client_credentials";
const TOKEN_TTL: Duration = Duration::from_secs(300);

static ORDER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{1,64}$").expect("order token pattern is valid"));

/// PayPal order ids are short upper-case alphanumerics.
pub fn is_valid_order_token(token: &str) -> bool {
    ORDER_TOKEN.is_match(token)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Metadata embedded in an order's `custom_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    #[serde(default)]
    pub pack_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl OrderMetadata {
    /// Unparseable metadata yields empty fields instead of an error.
    pub fn parse(custom_id: Option<&str>) -> Self {
        custom_id
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueDetail {
    pub issue: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capture {
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Payments {
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseUnit {
    pub custom_id: Option<String>,
    pub payments: Option<Payments>,
}

/// Capture response; error payloads share the same envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureResponse {
    pub status: Option<String>,
    pub name: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<IssueDetail>,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
}

impl CaptureResponse {
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("COMPLETED")
    }

    fn has_issue(&self, issue: &str) -> bool {
        self.details
            .first()
            .and_then(|d| d.issue.as_deref())
            .is_some_and(|i| i == issue)
            || self.message.as_deref().is_some_and(|m| m.contains(issue))
    }

    pub fn is_already_captured(&self) -> bool {
        self.has_issue("ORDER_ALREADY_CAPTURED")
    }

    pub fn is_declined(&self) -> bool {
        self.name.as_deref() == Some("INSTRUMENT_DECLINED") || self.has_issue("INSTRUMENT_DECLINED")
    }

    /// `custom_id` of the first capture, falling back to the purchase unit's.
    pub fn custom_id(&self) -> Option<&str> {
        let unit = self.purchase_units.first()?;
        unit.payments
            .as_ref()
            .and_then(|p| p.captures.first())
            .and_then(|c| c.custom_id.as_deref())
            .or(unit.custom_id.as_deref())
    }

    pub fn metadata(&self) -> OrderMetadata {
        OrderMetadata::parse(self.custom_id())
    }

    /// Best human-readable reason the processor gave.
    pub fn failure_message(&self) -> String {
        self.details
            .first()
            .and_then(|d| d.description.clone())
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Payment not completed or pending.".to_string())
    }
}

/// Order parameters for one credit pack purchase.
#[derive(Debug, Clone)]
pub struct OrderRequest<'a> {
    pub pack: &'a CreditPack,
    pub user_id: Uuid,
    pub return_url: String,
    pub cancel_url: String,
}

impl OrderRequest<'_> {
    pub fn reference_id(&self, now_millis: i64) -> String {
        format!("{}_{}_{}", self.pack.id, self.user_id, now_millis)
    }

    pub fn body(&self, now_millis: i64) -> serde_json::Value {
        let custom_id = json!({
            "packId": self.pack.id,
            "userId": self.user_id.to_string(),
        })
        .to_string();

        json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": self.reference_id(now_millis),
                "custom_id": custom_id,
                "amount": {
                    "currency_code": "USD",
                    "value": format!("{}.00", self.pack.price_usd),
                },
                "description": format!(
                    "{} - {} ({} Credits)",
                    BRAND_NAME, self.pack.label, self.pack.amount
                ),
            }],
            "payment_source": {
                "paypal": {
                    "experience_context": {
                        "brand_name": BRAND_NAME,
                        "user_action": "PAY_NOW",
                        "return_url": self.return_url,
                        "cancel_url": self.cancel_url,
                    }
                }
            }
        })
    }
}

/// PayPal Orders v2 client with a cached OAuth2 token.
#[derive(Clone)]
pub struct PayPalClient {
    client: reqwest::Client,
    base_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_cache: Cache<&'static str, String>,
}

impl PayPalClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.paypal_base_url.clone(),
            client_id: config.paypal_client_id.clone(),
            client_secret: config.paypal_client_secret.clone(),
            token_cache: Cache::builder()
                .time_to_live(TOKEN_TTL)
                .max_capacity(1)
                .build(),
        }
    }

    async fn access_token(&self) -> Result<String, AppError> {
        if let Some(token) = self.token_cache.get(TOKEN_CACHE_KEY).await {
            return Ok(token);
        }

        let (Some(client_id), Some(client_secret)) =
            (self.client_id.as_deref(), self.client_secret.as_deref())
        else {
            return Err(AppError::InternalError(
                "PayPal credentials not configured".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("PayPal token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("PayPal token request rejected ({}): {}", status, truncate_chars(&body, 200));
            return Err(AppError::ExternalApiError(
                "Failed to retrieve PayPal access token".to_string(),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse PayPal token response: {}", e))
        })?;

        self.token_cache
            .insert(TOKEN_CACHE_KEY, token.access_token.clone())
            .await;
        tracing::debug!("PayPal access token refreshed");

        Ok(token.access_token)
    }

    /// Creates an order and returns the buyer approval URL.
    pub async fn create_order(&self, order: &OrderRequest<'_>) -> Result<String, AppError> {
        let token = self.access_token().await?;
        let now_millis = chrono::Utc::now().timestamp_millis();

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(&token)
            .json(&order.body(now_millis))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("PayPal order request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError(format!(
                "PayPal order creation failed ({}): {}",
                status.as_u16(),
                truncate_chars(&body, 200)
            )));
        }

        let created: CreatedOrder = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse PayPal order: {}", e))
        })?;

        let link = created
            .links
            .into_iter()
            .find(|l| l.rel == "payer-action" || l.rel == "approve")
            .ok_or_else(|| {
                AppError::ExternalApiError("PayPal order has no approval link".to_string())
            })?;

        tracing::info!(
            "Created PayPal order {} for user {} ({})",
            created.id.as_deref().unwrap_or("?"),
            order.user_id,
            order.pack.id
        );

        Ok(link.href)
    }

    /// `{base}/v2/checkout/orders/{token}/capture` with the token as one
    /// encoded path segment.
    fn capture_url(&self, order_token: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::InternalError(format!("Invalid PayPal base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::InternalError("PayPal base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v2", "checkout", "orders", order_token, "capture"]);
        Ok(url)
    }

    /// Captures an approved order. Processor-side failures such as
    /// `ORDER_ALREADY_CAPTURED` come back as a parsed response, not an error.
    pub async fn capture_order(&self, order_token: &str) -> Result<CaptureResponse, AppError> {
        let token = self.access_token().await?;

        let url = self.capture_url(order_token)?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("PayPal capture request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        serde_json::from_str(&body).map_err(|_| {
            AppError::ExternalApiError(format!(
                "PayPal capture returned {}: {}",
                status.as_u16(),
                truncate_chars(&body, 200)
            ))
        })
    }
}
