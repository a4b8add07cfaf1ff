use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Upper bound for any message shown to a caller.
pub const USER_MESSAGE_LIMIT: usize = 200;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found (campaign, lead, pack, user).
    NotFound(String),
    /// Bad request error (missing or invalid input).
    BadRequest(String),
    /// Non-2xx or malformed response from an upstream API.
    ExternalApiError(String),
    /// Model reply that is not JSON of the expected shape.
    ParseError(String),
    /// Order metadata does not belong to the requesting user.
    SecurityViolation(String),
    /// The operation collides with an already reconciled record.
    Conflict(String),
    /// Processor says the order was captured but no local record exists.
    ReconciliationRequired(String),
    /// The user has no credits left.
    InsufficientCredits(String),
    /// Route exists but the backing integration is not configured.
    NotImplemented(String),
    /// Internal server error.
    InternalError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::SecurityViolation(msg) => write!(f, "Security violation: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ReconciliationRequired(msg) => {
                write!(f, "Reconciliation required: {}", msg)
            }
            AppError::InsufficientCredits(msg) => write!(f, "Insufficient credits: {}", msg),
            AppError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// HTTP status the error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalApiError(_) | AppError::ParseError(_) => StatusCode::BAD_GATEWAY,
            AppError::SecurityViolation(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::ReconciliationRequired(_) => StatusCode::CONFLICT,
            AppError::InsufficientCredits(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }

    /// Short message that is safe to show to the caller.
    ///
    /// Database and internal failures never leak their details; everything
    /// else is truncated to [`USER_MESSAGE_LIMIT`] characters.
    pub fn user_message(&self) -> String {
        let message = match self {
            AppError::DatabaseError(_) => "Database error".to_string(),
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ExternalApiError(msg)
            | AppError::ParseError(msg)
            | AppError::SecurityViolation(msg)
            | AppError::Conflict(msg)
            | AppError::ReconciliationRequired(msg)
            | AppError::InsufficientCredits(msg)
            | AppError::NotImplemented(msg) => msg.clone(),
            AppError::WithContext { source, .. } => return source.user_message(),
        };
        truncate_chars(&message, USER_MESSAGE_LIMIT)
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        match &self {
            AppError::DatabaseError(e) => tracing::error!("Database error: {:?}", e),
            AppError::InternalError(msg) => tracing::error!("Internal error: {}", msg),
            AppError::ExternalApiError(msg) => tracing::error!("External API error: {}", msg),
            AppError::ParseError(msg) => tracing::warn!("Model reply rejected: {}", msg),
            AppError::SecurityViolation(msg) => tracing::warn!("Security violation: {}", msg),
            AppError::ReconciliationRequired(msg) => {
                tracing::error!("Payment needs manual reconciliation: {}", msg)
            }
            AppError::Unauthorized(msg) => tracing::warn!("Unauthorized access: {}", msg),
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
            }
            _ => {}
        }

        let body = Json(json!({
            "error": self.user_message(),
        }));

        (self.status_code(), body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<JsonRejection> for AppError {
    /// Malformed or mistyped JSON bodies become a 400 with the usual error body.
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Cuts `text` to at most `limit` characters on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
