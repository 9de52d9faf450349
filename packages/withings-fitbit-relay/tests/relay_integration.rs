mod common;

use axum::http::StatusCode;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::*;
use withings_fitbit_relay::{Provider, TokenStore};

const WEBHOOK: &str = "/withings-to-fitbit/webhook";
const JSON: &str = "application/json";
const NOTIFICATION: &str = r#"{"userId":"42","startDate":1700000000,"endDate":1700000100}"#;

async fn mock_refreshes(relay: &TestRelay) {
    mock_withings_token(&relay.server, "refresh_token", "w-access-2", "w-refresh-2").await;
    mock_fitbit_token(&relay.server, "refresh_token", "f-access-2", "f-refresh-2").await;
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let relay = TestRelay::start().await;
    mock_refreshes(&relay).await;

    let resp = relay
        .post(
            WEBHOOK,
            JSON,
            r#"{"userId":"999","startDate":1700000000,"endDate":1700000100}"#,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(relay.server.received_requests().await.unwrap_or_default().len(), 0);
}

#[tokio::test]
async fn test_weight_and_fat_are_posted() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_measures(
        &relay.server,
        serde_json::json!([
            { "value": 705, "type": 1, "unit": -1 },
            { "value": 2150, "type": 6, "unit": -2 },
            { "value": 5500, "type": 76, "unit": -2 }
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/1/user/-/body/log/weight.json"))
        .and(header("authorization", "Bearer f-access-2"))
        .and(body_string_contains("weight=70.50"))
        // 22:13:20 UTC, reported in the user's Europe/Paris zone
        .and(body_string_contains("date=2023-11-14"))
        .and(body_string_contains("time=23%3A13%3A20"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&relay.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/user/-/body/log/fat.json"))
        .and(body_string_contains("fat=21.50"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&relay.server)
        .await;

    let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "ok");
}

#[tokio::test]
async fn test_measures_fetched_with_refreshed_token() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_body_log(&relay.server, "weight").await;
    Mock::given(method("POST"))
        .and(path("/measure"))
        .and(header("authorization", "Bearer w-access-2"))
        .and(body_string_contains("action=getmeas"))
        .and(body_string_contains("meastypes=1%2C6"))
        .and(body_string_contains("category=1"))
        .and(body_string_contains("startdate=1700000000"))
        .and(body_string_contains("enddate=1700000100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {
                "measuregrps": [{
                    "grpid": 1,
                    "date": 1700000000,
                    "category": 1,
                    "measures": [{ "value": 80260, "type": 1, "unit": -3 }]
                }]
            }
        })))
        .expect(1)
        .mount(&relay.server)
        .await;

    let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(relay.hits("/1/user/-/body/log/weight.json").await, 1);
    assert_eq!(relay.hits("/1/user/-/body/log/fat.json").await, 0);
}

#[tokio::test]
async fn test_refresh_replaces_stored_records() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_measures(&relay.server, serde_json::json!([])).await;

    let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let withings = relay.store.get_token(Provider::Withings, WITHINGS_USER).unwrap();
    assert_eq!(withings.access_token, "w-access-2");
    assert_eq!(withings.refresh_token, "w-refresh-2");
    let fitbit = relay.store.get_token(Provider::Fitbit, FITBIT_USER).unwrap();
    assert_eq!(fitbit.access_token, "f-access-2");
    assert_eq!(fitbit.refresh_token, "f-refresh-2");

    // Nothing to post for a group without weight or fat
    assert_eq!(relay.hits("/1/user/-/body/log/weight.json").await, 0);
}

#[tokio::test]
async fn test_rotated_refresh_tokens_are_used_next_time() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_measures(&relay.server, serde_json::json!([])).await;

    // Each refresh token is accepted exactly once
    for (provider_path, sent, issued) in [
        ("/v2/oauth2", "w-refresh", "w-refresh-2"),
        ("/v2/oauth2", "w-refresh-2", "w-refresh-3"),
        ("/oauth2/token", "f-refresh", "f-refresh-2"),
        ("/oauth2/token", "f-refresh-2", "f-refresh-3"),
    ] {
        let token = serde_json::json!({
            "access_token": format!("{issued}-access"),
            "refresh_token": issued,
            "user_id": FITBIT_USER
        });
        let response = if provider_path == "/v2/oauth2" {
            serde_json::json!({ "status": 0, "body": token })
        } else {
            token
        };
        let field = format!("refresh_token={sent}");
        Mock::given(method("POST"))
            .and(path(provider_path))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(move |req: &wiremock::Request| {
                String::from_utf8_lossy(&req.body)
                    .split('&')
                    .any(|pair| pair == field)
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .expect(1)
            .mount(&relay.server)
            .await;
    }

    for _ in 0..2 {
        let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let withings = relay.store.get_token(Provider::Withings, WITHINGS_USER).unwrap();
    assert_eq!(withings.refresh_token, "w-refresh-3");
    let fitbit = relay.store.get_token(Provider::Fitbit, FITBIT_USER).unwrap();
    assert_eq!(fitbit.refresh_token, "f-refresh-3");
}

#[tokio::test]
async fn test_json_content_type_is_case_insensitive() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_measures(&relay.server, serde_json::json!([{ "value": 705, "type": 1, "unit": -1 }])).await;
    mock_body_log(&relay.server, "weight").await;

    let resp = relay
        .post(WEBHOOK, "Application/JSON; charset=utf-8", NOTIFICATION)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(relay.hits("/1/user/-/body/log/weight.json").await, 1);
}

#[tokio::test]
async fn test_empty_range_posts_nothing() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    Mock::given(method("POST"))
        .and(path("/measure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": { "measuregrps": [] }
        })))
        .mount(&relay.server)
        .await;

    let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(relay.hits("/1/user/-/body/log/weight.json").await, 0);
}

#[tokio::test]
async fn test_duplicate_notifications_post_twice() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_measures(
        &relay.server,
        serde_json::json!([
            { "value": 705, "type": 1, "unit": -1 },
            { "value": 2150, "type": 6, "unit": -2 }
        ]),
    )
    .await;
    mock_body_log(&relay.server, "weight").await;
    mock_body_log(&relay.server, "fat").await;

    for _ in 0..2 {
        let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    assert_eq!(relay.hits("/1/user/-/body/log/weight.json").await, 2);
    assert_eq!(relay.hits("/1/user/-/body/log/fat.json").await, 2);
}

#[tokio::test]
async fn test_withings_form_notification() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_measures(&relay.server, serde_json::json!([{ "value": 705, "type": 1, "unit": -1 }])).await;
    mock_body_log(&relay.server, "weight").await;

    let resp = relay
        .post(
            WEBHOOK,
            "application/x-www-form-urlencoded",
            "userid=42&startdate=1700000000&enddate=1700000100&appli=1",
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(relay.hits("/1/user/-/body/log/weight.json").await, 1);
}

#[tokio::test]
async fn test_failed_refresh_aborts_relay() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 401,
            "error": "invalid refresh_token"
        })))
        .mount(&relay.server)
        .await;

    let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let withings = relay.store.get_token(Provider::Withings, WITHINGS_USER).unwrap();
    assert_eq!(withings.access_token, "w-access");
    assert_eq!(relay.hits("/measure").await, 0);
    assert_eq!(relay.hits("/oauth2/token").await, 0);
}

#[tokio::test]
async fn test_fitbit_rejection_is_upstream_failure() {
    let relay = TestRelay::start().await;
    relay.seed_linked_accounts();
    mock_refreshes(&relay).await;
    mock_measures(&relay.server, serde_json::json!([{ "value": 705, "type": 1, "unit": -1 }])).await;
    Mock::given(method("POST"))
        .and(path("/1/user/-/body/log/weight.json"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired_token"))
        .mount(&relay.server)
        .await;

    let resp = relay.post(WEBHOOK, JSON, NOTIFICATION).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_webhook_probe() {
    let relay = TestRelay::start().await;

    let resp = relay.get(WEBHOOK).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "ok");
}
