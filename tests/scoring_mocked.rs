/// Batch scorer tests with the text-generation API mocked by wiremock
/// and persistence held in the in-memory store.
use async_trait::async_trait;
use prospect_engine::config::Config;
use prospect_engine::errors::AppError;
use prospect_engine::gemini::GeminiClient;
use prospect_engine::models::{Campaign, CampaignCharge, Lead, NewCampaign, NewLead};
use prospect_engine::scoring::{
    score_campaign, LeadScorer, ModelLeadScorer, ScoreOutcome, ScoreRun, BATCH_SIZE,
};
use prospect_engine::store::{MemoryStore, Store};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

fn model_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    })
}

/// One user with one campaign holding `lead_count` unscored leads.
async fn seed(store: &MemoryStore, lead_count: usize) -> (Uuid, Campaign) {
    let user = store
        .create_user(&format!("{}@example.com", Uuid::new_v4()), 20, &Uuid::new_v4().to_string())
        .await
        .unwrap();

    let fields = NewCampaign {
        niche: "Boutique hotels".into(),
        country: "Italy".into(),
        target_role: "General manager".into(),
        value_proposition: "Direct bookings without OTA fees".into(),
    };
    let CampaignCharge::Charged(campaign) = store
        .create_campaign_charging_credit(user.id, &fields)
        .await
        .unwrap()
    else {
        panic!("fresh user should have credits");
    };

    let leads: Vec<NewLead> = (0..lead_count)
        .map(|i| NewLead {
            campaign_id: campaign.id,
            business_name: format!("Hotel {}", i),
            role: campaign.target_role.clone(),
            website: Some(format!("https://hotel{}.example.com", i)),
            phone: None,
            address: None,
            source: "Google Places API".into(),
            niche: campaign.niche.clone(),
            country: campaign.country.clone(),
            status: "new".into(),
        })
        .collect();
    store.insert_leads(&leads).await.unwrap();

    (user.id, campaign)
}

#[tokio::test]
async fn test_out_of_range_score_is_clamped_and_flagged() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-gemini-key"))
        .and(body_partial_json(serde_json::json!({
            "generationConfig": { "thinkingConfig": { "thinkingBudget": 0 } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_reply(
            "```json\n{\"score\": 133, \"confidence_level\": 64.6, \"score_reasoning\": \"Exact niche\", \"is_high_priority\": false}\n```",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (user_id, campaign) = seed(&store, 1).await;
    let lead_id = store.unscored_leads(campaign.id).await.unwrap()[0].id;

    let gemini = GeminiClient::new(&Config::for_base_url(&mock_server.uri()));
    let scorer = ModelLeadScorer::new(gemini, store.clone());

    let run = score_campaign(store.as_ref(), &scorer, user_id, campaign.id)
        .await
        .unwrap();
    assert_eq!(
        run,
        ScoreRun::Completed {
            scored: 1,
            errors: 0,
            total: 1,
            last_error: None
        }
    );

    let lead = store.lead(lead_id).unwrap();
    assert_eq!(lead.score, Some(100));
    assert_eq!(lead.confidence_level, Some(65));
    assert!(lead.is_high_priority);
    assert_eq!(lead.score_reasoning.as_deref(), Some("Exact niche"));
    assert!(lead.last_scored_at.is_some());
}

#[tokio::test]
async fn test_failed_lead_keeps_null_score_and_is_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("model overloaded, retry later"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (user_id, campaign) = seed(&store, 2).await;

    let gemini = GeminiClient::new(&Config::for_base_url(&mock_server.uri()));
    let scorer = ModelLeadScorer::new(gemini, store.clone());

    let run = score_campaign(store.as_ref(), &scorer, user_id, campaign.id)
        .await
        .unwrap();
    let ScoreRun::Completed {
        scored,
        errors,
        total,
        last_error,
    } = run
    else {
        panic!("expected a completed run");
    };
    assert_eq!((scored, errors, total), (0, 2, 2));
    assert!(last_error.unwrap().contains("Gemini 503"));

    for lead in store.campaign_leads(campaign.id).await.unwrap() {
        assert_eq!(lead.score, None);
    }

    // Still selected by the unscored filter on the next run.
    let rerun = score_campaign(store.as_ref(), &scorer, user_id, campaign.id)
        .await
        .unwrap();
    assert!(matches!(rerun, ScoreRun::Completed { total: 2, errors: 2, .. }));
}

#[tokio::test]
async fn test_unparseable_reply_counts_as_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(model_reply("I think this lead is great!")),
        )
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (user_id, campaign) = seed(&store, 1).await;

    let gemini = GeminiClient::new(&Config::for_base_url(&mock_server.uri()));
    let scorer = ModelLeadScorer::new(gemini, store.clone());

    let run = score_campaign(store.as_ref(), &scorer, user_id, campaign.id)
        .await
        .unwrap();
    assert!(matches!(run, ScoreRun::Completed { scored: 0, errors: 1, total: 1, .. }));
}

#[tokio::test]
async fn test_fully_scored_campaign_makes_no_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (user_id, campaign) = seed(&store, 0).await;

    let gemini = GeminiClient::new(&Config::for_base_url(&mock_server.uri()));
    let scorer = ModelLeadScorer::new(gemini, store.clone());

    let run = score_campaign(store.as_ref(), &scorer, user_id, campaign.id)
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&run).unwrap(),
        serde_json::json!({"scored": 0, "message": "All leads already scored"})
    );
}

#[tokio::test]
async fn test_other_users_campaign_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let (_owner, campaign) = seed(&store, 1).await;

    let gemini = GeminiClient::new(&Config::for_base_url("http://127.0.0.1:9"));
    let scorer = ModelLeadScorer::new(gemini, store.clone());

    let err = score_campaign(store.as_ref(), &scorer, Uuid::new_v4(), campaign.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

/// Records how many calls overlap and fails leads whose name ends in 3.
struct CountingScorer {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingScorer {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LeadScorer for CountingScorer {
    async fn score_lead(&self, lead: &Lead, _campaign: &Campaign) -> Result<ScoreOutcome, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if lead.business_name.ends_with('3') {
            return Err(AppError::ExternalApiError(format!(
                "Gemini 500: {}",
                lead.business_name
            )));
        }
        Ok(ScoreOutcome {
            score: 50,
            confidence_level: 50,
            score_reasoning: "ok".into(),
        })
    }
}

#[tokio::test]
async fn test_batches_never_exceed_five_in_flight() {
    let store = MemoryStore::new();
    let (user_id, campaign) = seed(&store, 12).await;
    let scorer = CountingScorer::new();

    let run = score_campaign(&store, &scorer, user_id, campaign.id)
        .await
        .unwrap();

    assert_eq!(scorer.calls.load(Ordering::SeqCst), 12);
    assert_eq!(scorer.max_in_flight.load(Ordering::SeqCst), BATCH_SIZE);

    let ScoreRun::Completed {
        scored,
        errors,
        total,
        last_error,
    } = run
    else {
        panic!("expected a completed run");
    };
    assert_eq!(total, 12);
    assert_eq!(errors, 1); // "Hotel 3"
    assert_eq!(scored + errors, total);
    assert!(last_error.unwrap().contains("Hotel 3"));
}

struct StorageFailingScorer;

#[async_trait]
impl LeadScorer for StorageFailingScorer {
    async fn score_lead(&self, lead: &Lead, _campaign: &Campaign) -> Result<ScoreOutcome, AppError> {
        Err(AppError::WithContext {
            source: Box::new(AppError::DatabaseError(sqlx::Error::PoolTimedOut)),
            context: format!("storing score for lead {}", lead.id),
        })
    }
}

#[tokio::test]
async fn test_run_summary_hides_storage_details() {
    let store = MemoryStore::new();
    let (user_id, campaign) = seed(&store, 2).await;

    let run = score_campaign(&store, &StorageFailingScorer, user_id, campaign.id)
        .await
        .unwrap();

    assert_eq!(
        run,
        ScoreRun::Completed {
            scored: 0,
            errors: 2,
            total: 2,
            last_error: Some("Database error".to_string()),
        }
    );
}
