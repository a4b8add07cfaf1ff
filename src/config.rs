use serde::Deserialize;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PLACES_BASE_URL: &str = "https://places.googleapis.com";
pub const PAYPAL_LIVE_URL: &str = "https://api-m.paypal.com";
pub const PAYPAL_SANDBOX_URL: &str = "https://api-m.sandbox.paypal.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Public origin used to build PayPal return/cancel URLs.
    pub app_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub google_maps_api_key: Option<String>,
    pub places_base_url: String,
    pub paypal_client_id: Option<String>,
    pub paypal_client_secret: Option<String>,
    pub paypal_base_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            app_url: std::env::var("APP_URL")
                .or_else(|_| std::env::var("NEXT_PUBLIC_APP_URL"))
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            gemini_api_key: optional_var("GEMINI_API_KEY"),
            gemini_base_url: http_url_var("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL)?,
            gemini_model: optional_var("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            google_maps_api_key: optional_var("GOOGLE_MAPS_API_KEY"),
            places_base_url: http_url_var("PLACES_BASE_URL", DEFAULT_PLACES_BASE_URL)?,
            paypal_client_id: optional_var("PAYPAL_CLIENT_ID"),
            paypal_client_secret: optional_var("PAYPAL_CLIENT_SECRET"),
            paypal_base_url: {
                let default = if std::env::var("PAYPAL_ENV").as_deref() == Ok("production") {
                    PAYPAL_LIVE_URL
                } else {
                    PAYPAL_SANDBOX_URL
                };
                http_url_var("PAYPAL_BASE_URL", default)?
            },
        };

        url::Url::parse(&config.app_url)
            .map_err(|e| anyhow::anyhow!("APP_URL is not a valid URL: {}", e))?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database host: {}", database_host(&config.database_url));
        tracing::debug!("App URL: {}", config.app_url);
        tracing::debug!(
            "Gemini: {} (model {}, key configured: {})",
            config.gemini_base_url,
            config.gemini_model,
            config.gemini_api_key.is_some()
        );
        if config.google_maps_api_key.is_none() {
            tracing::warn!("GOOGLE_MAPS_API_KEY not set, campaigns will start with zero leads");
        }
        tracing::debug!("PayPal API: {}", config.paypal_base_url);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Configuration with every external endpoint pointed at `base_url`.
    ///
    /// Used by tests that stand up a single mock server for all upstream APIs.
    pub fn for_base_url(base_url: &str) -> Self {
        Self {
            database_url: "postgresql://localhost/prospect_engine_test".to_string(),
            port: 0,
            app_url: "http://localhost:3000".to_string(),
            gemini_api_key: Some("test-gemini-key".to_string()),
            gemini_base_url: base_url.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            google_maps_api_key: Some("test-maps-key".to_string()),
            places_base_url: base_url.to_string(),
            paypal_client_id: Some("test-client".to_string()),
            paypal_client_secret: Some("test-secret".to_string()),
            paypal_base_url: base_url.to_string(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let url = optional_var(name).unwrap_or_else(|| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Host part of a connection URL, for logs. Credentials are never included.
pub fn database_host(database_url: &str) -> String {
    url::Url::parse(database_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "<unparseable>".to_string())
}
