use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::common::{TEST_ADMIN_TOKEN, setup_test_app, setup_test_app_no_auth};

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"));
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

async fn register(router: &Router, region: &str, url: &str) -> Response {
    send(
        router,
        "POST",
        "/v1/sources",
        Some(serde_json::json!({ "region_name": region, "url": url })),
    )
    .await
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/runs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_token_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/runs")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_admin_token_returns_403() {
    let app = setup_test_app_no_auth().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/runs")
                .header("authorization", "Bearer any-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json = json_body(response).await;
    assert_eq!(json["error"], "forbidden");
}

#[tokio::test]
async fn register_list_and_deactivate_sources() {
    let app = setup_test_app().await;

    let response = register(&app.router, "Seoul", "https://seoul.go.kr/notice/1").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["region_name"], "Seoul");
    assert_eq!(created["is_active"], true);
    let source_id = created["id"].as_str().unwrap().to_string();

    let response = register(&app.router, "Seoul", "https://seoul.go.kr/notice/1").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "duplicate_source");

    let response = register(&app.router, "Busan", "ftp://busan.go.kr/notice").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    register(&app.router, "Busan", "https://busan.go.kr/notice").await;

    let json = json_body(send(&app.router, "GET", "/v1/sources?region=Seoul", None).await).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["sources"][0]["url"], "https://seoul.go.kr/notice/1");

    let response = send(&app.router, "DELETE", &format!("/v1/sources/{source_id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["is_active"], false);

    let json = json_body(send(&app.router, "GET", "/v1/sources", None).await).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["sources"][0]["region_name"], "Busan");

    let json = json_body(
        send(&app.router, "GET", "/v1/sources?include_inactive=true", None).await,
    )
    .await;
    assert_eq!(json["total"], 2);
}

#[tokio::test]
async fn start_run_without_sources_returns_422() {
    let app = setup_test_app().await;

    let response = send(
        &app.router,
        "POST",
        "/v1/runs",
        Some(serde_json::json!({ "regions": ["Nowhere"] })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"], "empty_scope");

    let json = json_body(send(&app.router, "GET", "/v1/runs", None).await).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn unknown_ids_return_404() {
    let app = setup_test_app().await;
    let id = uuid::Uuid::new_v4();

    for (method, uri) in [
        ("GET", format!("/v1/runs/{id}")),
        ("GET", format!("/v1/runs/{id}/batches")),
        ("DELETE", format!("/v1/runs/{id}")),
        ("DELETE", format!("/v1/sources/{id}")),
        ("POST", format!("/v1/announcements/{id}/reanalyze")),
    ] {
        let response = send(&app.router, method, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {uri}");
    }
}

#[tokio::test]
async fn list_runs_rejects_unknown_status() {
    let app = setup_test_app().await;

    let response = send(&app.router, "GET", "/v1/runs?status=paused", None).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn run_over_blocked_source_records_url_error() {
    let app = setup_test_app().await;

    let response = register(&app.router, "Seoul", "http://127.0.0.1/notice").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let source_id = json_body(response).await["id"].as_str().unwrap().to_string();

    let response = send(
        &app.router,
        "POST",
        "/v1/runs",
        Some(serde_json::json!({ "regions": ["Seoul"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let run_id = json_body(response).await["run_id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut detail = serde_json::Value::Null;
    for _ in 0..100 {
        detail = json_body(send(&app.router, "GET", &format!("/v1/runs/{run_id}"), None).await)
            .await;
        if detail["run"]["finished_at"].is_string() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(detail["run"]["status"], "completed");
    assert_eq!(detail["run"]["regions"], serde_json::json!(["Seoul"]));
    assert_eq!(detail["run"]["totals"]["discovered"], 1);
    assert_eq!(detail["run"]["totals"]["processed"], 1);
    assert_eq!(detail["run"]["totals"]["errored"], 1);
    assert_eq!(detail["url_errors"].as_array().unwrap().len(), 1);
    assert_eq!(detail["url_errors"][0]["stage"], "fetch");
    assert_eq!(detail["errored_sources"][0]["source_id"], source_id.as_str());
    assert_eq!(detail["errored_sources"][0]["consecutive_failures"], 1);

    let json = json_body(
        send(&app.router, "GET", &format!("/v1/runs/{run_id}/batches"), None).await,
    )
    .await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["batches"][0]["batch_number"], 1);
    assert_eq!(json["batches"][0]["totals"]["errored"], 1);

    let stats = send(&app.router, "GET", "/v1/stats/regions?region=Seoul", None).await;
    let json = json_body(stats).await;
    assert_eq!(json["regions"][0]["region_name"], "Seoul");
    assert_eq!(json["regions"][0]["runs"], 1);
    assert_eq!(json["regions"][0]["errored"], 1);
    assert_eq!(json["regions"][0]["health"], "critical");

    let json = json_body(send(&app.router, "GET", "/v1/health/urls", None).await).await;
    assert_eq!(json["total"], 1);
    let json = json_body(
        send(&app.router, "GET", "/v1/health/urls?unhealthy_only=true", None).await,
    )
    .await;
    assert_eq!(json["total"], 0);

    let response = send(&app.router, "DELETE", &format!("/v1/runs/{run_id}"), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = json_body(send(&app.router, "GET", "/v1/runs?status=completed", None).await).await;
    assert_eq!(json["total"], 1);

    let json = json_body(send(&app.router, "GET", "/v1/verification-log", None).await).await;
    assert_eq!(json["total"], 0);
}
