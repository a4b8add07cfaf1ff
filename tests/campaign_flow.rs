/// Campaign creation flow with the places search mocked by wiremock.
use prospect_engine::campaigns::{
    create_campaign, CampaignFailure, CampaignOutcome, LEAD_SOURCE, UNKNOWN_BUSINESS,
};
use prospect_engine::circuit_breaker::PLACES_FAILURE_THRESHOLD;
use prospect_engine::config::Config;
use prospect_engine::models::{CampaignStatus, NewCampaign, UserProfile};
use prospect_engine::places::PlacesClient;
use prospect_engine::store::{MemoryStore, Store};
use prospect_engine::views::ViewCache;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEARCH_PATH: &str = "/v1/places:searchText";

fn fields() -> NewCampaign {
    NewCampaign {
        niche: "Dental clinics".into(),
        country: "Portugal".into(),
        target_role: "Clinic owner".into(),
        value_proposition: "Online booking that fills empty chairs".into(),
    }
}

async fn user(store: &MemoryStore, total: i32, used: i32) -> UserProfile {
    let user = store
        .create_user("owner@example.com", total, "owner-key")
        .await
        .unwrap();
    store.set_credits(user.id, total, used);
    store.get_user(user.id).await.unwrap().unwrap()
}

fn places_client(mock_server: &MockServer) -> PlacesClient {
    PlacesClient::new(&Config::for_base_url(&mock_server.uri())).unwrap()
}

async fn mount_empty_search(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_campaign_created_with_discovered_leads() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .and(header("X-Goog-Api-Key", "test-maps-key"))
        .and(body_partial_json(serde_json::json!({
            "textQuery": "Dental clinics in Portugal",
            "pageSize": 20,
            "languageCode": "en"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "places": [
                {
                    "displayName": { "text": "Clinica Sorriso", "languageCode": "pt" },
                    "formattedAddress": "Rua Augusta 10, Lisboa",
                    "websiteUri": "https://sorriso.example.pt",
                    "internationalPhoneNumber": "+44 121 234 5678",
                    "businessStatus": "OPERATIONAL",
                    "types": ["dentist", "health"]
                },
                { "formattedAddress": "Porto" }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let user = user(&store, 20, 5).await;
    let views = ViewCache::default();

    // Prime the cached list so the flow has something to invalidate.
    assert!(views.campaigns(&store, user.id).await.unwrap().is_empty());

    let outcome = create_campaign(&store, &places_client(&mock_server), &views, &user, &fields()).await;
    let CampaignOutcome::Created {
        ref campaign,
        leads_found,
    } = outcome
    else {
        panic!("expected a created campaign, got {:?}", outcome);
    };
    assert_eq!(leads_found, 2);
    assert_eq!(outcome.redirect_path(), format!("/campaigns/{}", campaign.id));

    let stored = store.get_campaign(user.id, campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Active);

    let leads = store.campaign_leads(campaign.id).await.unwrap();
    assert_eq!(leads.len(), 2);
    let named = leads
        .iter()
        .find(|l| l.business_name == "Clinica Sorriso")
        .unwrap();
    assert_eq!(named.phone.as_deref(), Some("+441212345678"));
    assert_eq!(named.website.as_deref(), Some("https://sorriso.example.pt"));
    assert_eq!(named.source, LEAD_SOURCE);
    assert_eq!(named.status, "new");
    assert!(leads.iter().any(|l| l.business_name == UNKNOWN_BUSINESS));

    let user = store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(user.credits_used, 6);
    assert_eq!(views.campaigns(&store, user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_places_failure_still_creates_campaign() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let user = user(&store, 20, 0).await;

    let outcome = create_campaign(
        &store,
        &places_client(&mock_server),
        &ViewCache::default(),
        &user,
        &fields(),
    )
    .await;

    let CampaignOutcome::Created {
        campaign,
        leads_found,
    } = outcome
    else {
        panic!("places failure must not fail the campaign");
    };
    assert_eq!(leads_found, 0);
    assert_eq!(campaign.status, CampaignStatus::Active);
    assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits_used, 1);
}

#[tokio::test]
async fn test_open_breaker_skips_places_calls() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(PLACES_FAILURE_THRESHOLD as u64)
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let user = user(&store, 20, 0).await;
    let places = places_client(&mock_server);
    let views = ViewCache::default();

    for _ in 0..PLACES_FAILURE_THRESHOLD + 2 {
        let current = store.get_user(user.id).await.unwrap().unwrap();
        let outcome = create_campaign(&store, &places, &views, &current, &fields()).await;
        assert!(matches!(outcome, CampaignOutcome::Created { leads_found: 0, .. }));
    }
}

#[tokio::test]
async fn test_exhausted_balance_creates_nothing() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let user = user(&store, 20, 20).await;

    let outcome = create_campaign(
        &store,
        &places_client(&mock_server),
        &ViewCache::default(),
        &user,
        &fields(),
    )
    .await;

    assert!(matches!(
        outcome,
        CampaignOutcome::Failed {
            kind: CampaignFailure::NoCredits,
            ..
        }
    ));
    assert_eq!(outcome.redirect_path(), "/campaigns/new?error=no_credits");
    assert_eq!(store.campaign_count(), 0);
    assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits_used, 20);
}

#[tokio::test]
async fn test_missing_fields_are_rejected_before_charging() {
    let mock_server = MockServer::start().await;
    let store = MemoryStore::new();
    let user = user(&store, 20, 0).await;

    let mut incomplete = fields();
    incomplete.target_role = " ".into();

    let outcome = create_campaign(
        &store,
        &places_client(&mock_server),
        &ViewCache::default(),
        &user,
        &incomplete,
    )
    .await;

    assert_eq!(outcome.redirect_path(), "/campaigns/new?error=missing_fields");
    assert_eq!(store.campaign_count(), 0);
    assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits_used, 0);
}

#[tokio::test]
async fn test_concurrent_creations_cannot_overdraw() {
    let mock_server = MockServer::start().await;
    mount_empty_search(&mock_server).await;

    let store = MemoryStore::new();
    // One credit left; both requests pass the up-front balance check.
    let user = user(&store, 20, 19).await;
    let places = places_client(&mock_server);
    let views = ViewCache::default();

    let (fields_a, fields_b) = (fields(), fields());
    let (a, b) = tokio::join!(
        create_campaign(&store, &places, &views, &user, &fields_a),
        create_campaign(&store, &places, &views, &user, &fields_b),
    );

    let created = [&a, &b]
        .iter()
        .filter(|o| matches!(o, CampaignOutcome::Created { .. }))
        .count();
    let refused = [&a, &b]
        .iter()
        .filter(|o| {
            matches!(
                o,
                CampaignOutcome::Failed {
                    kind: CampaignFailure::NoCredits,
                    ..
                }
            )
        })
        .count();

    assert_eq!((created, refused), (1, 1));
    assert_eq!(store.campaign_count(), 1);

    let user = store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(user.credits_used, user.credits_total);
}
