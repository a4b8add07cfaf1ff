use crate::circuit_breaker::{create_places_circuit_breaker, PlacesBreaker};
use crate::config::Config;
use crate::errors::{truncate_chars, AppError};
use failsafe::futures::CircuitBreaker;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Hard abort for a single places search.
pub const PLACES_TIMEOUT: Duration = Duration::from_secs(15);

const FIELD_MASK: &str = "places.displayName,places.formattedAddress,places.websiteUri,\
places.nationalPhoneNumber,places.internationalPhoneNumber,places.businessStatus,places.types";

#[derive(Debug, Clone, Deserialize)]
pub struct LocalizedText {
    pub text: String,
}

/// One place record as returned by text search.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub display_name: Option<LocalizedText>,
    pub formatted_address: Option<String>,
    pub website_uri: Option<String>,
    pub national_phone_number: Option<String>,
    pub international_phone_number: Option<String>,
    pub business_status: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

impl Place {
    pub fn name(&self) -> Option<&str> {
        self.display_name
            .as_ref()
            .map(|n| n.text.trim())
            .filter(|n| !n.is_empty())
    }

    /// The international number in E.164 form, if it parses as a valid number.
    pub fn e164_phone(&self) -> Option<String> {
        self.international_phone_number
            .as_deref()
            .and_then(normalize_phone)
    }
}

#[derive(Debug, Deserialize)]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<Place>,
}

/// Normalizes an international phone number (`+44 121 234 5678`) to E.164.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let number = phonenumber::parse(None, raw.trim()).ok()?;
    if !phonenumber::is_valid(&number) {
        return None;
    }
    Some(number.format().mode(phonenumber::Mode::E164).to_string())
}

#[derive(Clone)]
pub struct PlacesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    breaker: PlacesBreaker,
}

impl PlacesClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(PLACES_TIMEOUT)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build places client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.places_base_url.clone(),
            api_key: config.google_maps_api_key.clone(),
            breaker: create_places_circuit_breaker(),
        })
    }

    /// Text search through the circuit breaker.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<Place>, AppError> {
        match self.breaker.call(self.search_text(query, limit)).await {
            Ok(places) => Ok(places),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::ExternalApiError(
                "Places search skipped: circuit open".to_string(),
            )),
        }
    }

    /// Best-effort search: any failure is logged and yields no places.
    pub async fn search_best_effort(&self, query: &str, limit: u32) -> Vec<Place> {
        match self.search(query, limit).await {
            Ok(places) => places,
            Err(e) => {
                tracing::warn!("Places search for '{}' failed, continuing without leads: {}", query, e);
                Vec::new()
            }
        }
    }

    async fn search_text(&self, query: &str, limit: u32) -> Result<Vec<Place>, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::InternalError("GOOGLE_MAPS_API_KEY not configured".to_string())
        })?;

        tracing::debug!("Places text search: '{}' (limit {})", query, limit);

        let response = self
            .client
            .post(format!("{}/v1/places:searchText", self.base_url))
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&json!({
                "textQuery": query,
                "pageSize": limit,
                "languageCode": "en",
            }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Places request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError(format!(
                "Places {}: {}",
                status.as_u16(),
                truncate_chars(&body, 150)
            )));
        }

        let data: SearchTextResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse places response: {}", e))
        })?;

        tracing::info!("Places search for '{}' returned {} results", query, data.places.len());
        Ok(data.places)
    }
}
