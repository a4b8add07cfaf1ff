use crate::auth::AuthUser;
use crate::campaigns::{self, CampaignOutcome};
use crate::config::Config;
use crate::credits::{credit_status, CreditPack, CreditStatus, CREDIT_PACKS};
use crate::errors::AppError;
use crate::gemini::GeminiClient;
use crate::messaging::{self, GeneratedMessage};
use crate::models::*;
use crate::payments::{self, BillingOutcome};
use crate::paypal::PayPalClient;
use crate::places::PlacesClient;
use crate::scoring::{self, LeadScorer, ModelLeadScorer, ScoreRun};
use crate::store::Store;
use crate::views::{DashboardView, ViewCache};
use axum::{
    extract::{FromRequest, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// `Json` whose rejection answers with the `{ "error": .. }` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 1024 * 1024;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for users, campaigns, leads and payments.
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub gemini: GeminiClient,
    pub places: PlacesClient,
    pub paypal: PayPalClient,
    /// Scores one lead per call; swapped out in tests.
    pub scorer: Arc<dyn LeadScorer>,
    /// Per-user campaign list and dashboard views (60s TTL).
    pub views: ViewCache,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, AppError> {
        let gemini = GeminiClient::new(&config);
        let places = PlacesClient::new(&config)?;
        let paypal = PayPalClient::new(&config);
        let scorer: Arc<dyn LeadScorer> =
            Arc::new(ModelLeadScorer::new(gemini.clone(), store.clone()));

        Ok(Self {
            store,
            config,
            gemini,
            places,
            paypal,
            scorer,
            views: ViewCache::default(),
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn LeadScorer>) -> Self {
        self.scorer = scorer;
        self
    }
}

/// Health check endpoint.
#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "prospect-engine",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/score
///
/// Scores every unscored lead of one campaign, five at a time.
#[utoipa::path(
    post,
    path = "/api/score",
    request_body = ScoreRequest,
    responses(
        (status = 200, description = "Run summary: scored, errors, total and lastError when errors > 0"),
        (status = 400, description = "campaignId missing", body = ErrorBody),
        (status = 401, description = "No valid API key", body = ErrorBody),
        (status = 404, description = "Campaign not found", body = ErrorBody)
    )
)]
pub async fn score_leads(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<ScoreRequest>,
) -> Result<Json<ScoreRun>, AppError> {
    let campaign_id = payload
        .campaign_id
        .ok_or_else(|| AppError::BadRequest("campaignId required".to_string()))?;

    if !state.gemini.is_configured() {
        return Err(AppError::InternalError(
            "Gemini API key not configured".to_string(),
        ));
    }

    tracing::info!("POST /api/score - campaign {} (user {})", campaign_id, user.id);

    let run = scoring::score_campaign(
        state.store.as_ref(),
        state.scorer.as_ref(),
        user.id,
        campaign_id,
    )
    .await?;

    state.views.invalidate_user(user.id).await;
    Ok(Json(run))
}

/// POST /api/message
///
/// Generates email or LinkedIn copy for one lead.
#[utoipa::path(
    post,
    path = "/api/message",
    request_body = MessageRequest,
    responses(
        (status = 200, description = "{type, lead, subject/body or connection_note/follow_up}"),
        (status = 400, description = "leadId missing", body = ErrorBody),
        (status = 404, description = "Lead not found", body = ErrorBody),
        (status = 502, description = "Model call failed", body = ErrorBody)
    )
)]
pub async fn generate_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<MessageRequest>,
) -> Result<Json<GeneratedMessage>, AppError> {
    let lead_id = payload
        .lead_id
        .ok_or_else(|| AppError::BadRequest("leadId required".to_string()))?;

    if !state.gemini.is_configured() {
        return Err(AppError::InternalError(
            "Gemini API key not configured".to_string(),
        ));
    }

    tracing::info!("POST /api/message - lead {} ({:?})", lead_id, payload.kind);

    let message = messaging::generate_message(
        state.store.as_ref(),
        &state.gemini,
        user.id,
        lead_id,
        payload.kind,
    )
    .await?;

    Ok(Json(message))
}

#[derive(Debug, Serialize)]
pub struct CreditsOverview {
    pub credits: CreditStatus,
    pub packs: &'static [CreditPack],
}

/// GET /api/credits
#[utoipa::path(
    get,
    path = "/api/credits",
    responses((status = 200, description = "Credit status and the pack catalog"))
)]
pub async fn get_credits(AuthUser(user): AuthUser) -> Json<CreditsOverview> {
    Json(CreditsOverview {
        credits: credit_status(user.credits_total.into(), user.credits_used.into()),
        packs: &CREDIT_PACKS,
    })
}

/// POST /api/credits
///
/// Card checkout placeholder; never grants credit.
#[utoipa::path(
    post,
    path = "/api/credits",
    request_body = PackRequest,
    responses(
        (status = 400, description = "Invalid pack", body = ErrorBody),
        (status = 501, description = "Card checkout not configured", body = ErrorBody)
    )
)]
pub async fn request_credits(
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<PackRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    tracing::info!(
        "POST /api/credits - pack {:?} (user {})",
        payload.pack_id,
        user.id
    );
    payments::card_checkout(payload.pack_id.as_deref()).map(Json)
}

/// POST /api/paypal/create-order
#[utoipa::path(
    post,
    path = "/api/paypal/create-order",
    request_body = PackRequest,
    responses(
        (status = 200, description = "Approval URL", body = CheckoutResponse),
        (status = 400, description = "Invalid pack", body = ErrorBody),
        (status = 502, description = "PayPal failure", body = ErrorBody)
    )
)]
pub async fn create_paypal_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<PackRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    tracing::info!(
        "POST /api/paypal/create-order - pack {:?} (user {})",
        payload.pack_id,
        user.id
    );

    let checkout = payments::create_checkout(
        &state.paypal,
        &state.config.app_url,
        user.id,
        payload.pack_id.as_deref(),
    )
    .await?;

    Ok(Json(checkout))
}

/// GET /billing/success?token=..
///
/// PayPal returns the buyer here; the capture runs as part of the request.
#[utoipa::path(
    get,
    path = "/billing/success",
    params(BillingQuery),
    responses(
        (status = 200, description = "Billing outcome"),
        (status = 303, description = "No token; back to the credits page")
    )
)]
pub async fn billing_success(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<BillingQuery>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Redirect::to("/settings#credits").into_response();
    };

    tracing::info!("GET /billing/success - order {} (user {})", token, user.id);

    let result =
        payments::capture_order(state.store.as_ref(), &state.paypal, &token, user.id).await;

    let status = match &result {
        Ok(_) => {
            state.views.invalidate_user(user.id).await;
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!("Capture of order {} failed: {}", token, e);
            e.status_code()
        }
    };

    (status, Json(BillingOutcome::from_capture(&result))).into_response()
}

/// POST /campaigns
///
/// Form submission; always answers with a 303 redirect.
#[utoipa::path(
    post,
    path = "/campaigns",
    request_body(content = NewCampaign, content_type = "application/x-www-form-urlencoded"),
    responses((status = 303, description = "To the campaign page, or back to the form with ?error=<code>"))
)]
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Form(fields): Form<NewCampaign>,
) -> Redirect {
    let outcome = campaigns::create_campaign(
        state.store.as_ref(),
        &state.places,
        &state.views,
        &user,
        &fields,
    )
    .await;

    match &outcome {
        CampaignOutcome::Created {
            campaign,
            leads_found,
        } => tracing::info!(
            "POST /campaigns - created {} with {} leads",
            campaign.id,
            leads_found
        ),
        CampaignOutcome::Failed { kind, message } => tracing::warn!(
            "POST /campaigns - {} for user {}: {}",
            kind.code(),
            user.id,
            message
        ),
    }

    Redirect::to(&outcome.redirect_path())
}

/// GET /api/campaigns
#[utoipa::path(
    get,
    path = "/api/campaigns",
    responses((status = 200, description = "Campaigns, newest first", body = [Campaign]))
)]
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Campaign>>, AppError> {
    let campaigns = state.views.campaigns(state.store.as_ref(), user.id).await?;
    Ok(Json(campaigns.as_ref().clone()))
}

#[derive(Debug, Serialize)]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub leads: Vec<Lead>,
}

/// GET /api/campaigns/:id
#[utoipa::path(
    get,
    path = "/api/campaigns/{id}",
    params(("id" = Uuid, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign with leads, best score first"),
        (status = 404, description = "Campaign not found", body = ErrorBody)
    )
)]
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignDetail>, AppError> {
    let campaign = state
        .store
        .get_campaign(user.id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))?;

    let leads = state.store.campaign_leads(campaign.id).await?;
    Ok(Json(CampaignDetail { campaign, leads }))
}

/// GET /api/leads
#[utoipa::path(
    get,
    path = "/api/leads",
    responses((status = 200, description = "All leads of the caller, best score first"))
)]
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<LeadWithCampaign>>, AppError> {
    Ok(Json(state.store.user_leads(user.id).await?))
}

/// GET /api/dashboard
#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses((status = 200, description = "Credit status, counters and recent leads"))
)]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<DashboardView>, AppError> {
    let view = state.views.dashboard(state.store.as_ref(), &user).await?;
    Ok(Json(view.as_ref().clone()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        score_leads,
        generate_message,
        get_credits,
        request_credits,
        create_paypal_order,
        billing_success,
        create_campaign,
        list_campaigns,
        get_campaign,
        list_leads,
        dashboard,
    ),
    components(schemas(
        ScoreRequest,
        MessageRequest,
        MessageKind,
        PackRequest,
        CheckoutResponse,
        NewCampaign,
        Campaign,
        CampaignStatus,
        Lead,
        CreditStatus,
        ErrorBody,
    )),
    info(title = "AI Prospect Engine API")
)]
pub struct ApiDoc;

/// Routes that need an authenticated caller.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/score", post(score_leads))
        .route("/api/message", post(generate_message))
        .route("/api/credits", get(get_credits).post(request_credits))
        .route("/api/paypal/create-order", post(create_paypal_order))
        .route("/api/campaigns", get(list_campaigns))
        .route("/api/campaigns/:id", get(get_campaign))
        .route("/api/leads", get(list_leads))
        .route("/api/dashboard", get(dashboard))
        .route("/campaigns", post(create_campaign))
        .route("/billing/success", get(billing_success))
}

/// Swagger UI under `/docs`.
pub fn docs() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

/// Full router without rate limiting.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes().layer(RequestBodyLimitLayer::new(BODY_LIMIT)))
        .merge(docs())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
