mod common;

use std::net::SocketAddr;

use reqwest::StatusCode;
use serde_json::{Value, json};

use bulwark::server::create_router;
use common::{Harness, project_context, severity_rule_type, token};

struct Gateway {
    // Keeps the database directory alive while the server runs.
    _harness: Harness,
    addr: SocketAddr,
    client: reqwest::Client,
}

impl Gateway {
    async fn start() -> Self {
        let harness = Harness::new();
        let app = create_router(harness.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            _harness: harness,
            addr,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, method: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = self
            .client
            .post(format!("http://{}{}", self.addr, method))
            .json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_health() {
    let gw = Gateway::start().await;
    let resp = gw
        .client
        .get(format!("http://{}/health", gw.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "OK");

    let (status, body) = gw
        .post("/bulwark.v1.HealthService/CheckHealth", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "OK");
}

#[tokio::test]
async fn test_enrol_then_create_rule_type_without_provider() {
    let gw = Gateway::start().await;
    let alice = token("alice", json!({}));

    let (status, body) = gw
        .post("/bulwark.v1.UserService/CreateUser", Some(&alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].is_null());
    let project_id = body["data"]["project_id"].as_str().unwrap().to_string();

    // No provider yet.
    let (status, body) = gw
        .post(
            "/bulwark.v1.RuleTypeService/CreateRuleType",
            Some(&alice),
            json!({"context": project_context(&project_id), "rule_type": severity_rule_type("sev")}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_argument");
    assert_eq!(
        body["error"],
        "cannot infer provider, there are 0 providers available"
    );
    assert!(body["data"].is_null());

    let (status, body) = gw
        .post(
            "/bulwark.v1.ProjectService/ListChildProjects",
            Some(&alice),
            json!({"context": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["projects"], json!([]));
}

#[tokio::test]
async fn test_error_statuses() {
    let gw = Gateway::start().await;

    let (status, body) = gw
        .post("/bulwark.v1.UserService/GetUser", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let alice = token("alice", json!({}));
    let (status, _) = gw
        .post("/bulwark.v1.UserService/CreateUser", Some(&alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gw
        .post("/bulwark.v1.UserService/CreateUser", Some(&alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_exists");

    let (status, _) = gw
        .post("/bulwark.v1.AdminService/GetUserBySubject", Some(&alice), json!({"subject": "alice"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = gw
        .post(
            "/bulwark.v1.RuleTypeService/ListRuleTypes",
            Some(&alice),
            json!({"context": {"project": "not-a-uuid"}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed project ID");

    let (status, _) = gw
        .post("/bulwark.v1.NoSuchService/Nothing", Some(&alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let gw = Gateway::start().await;
    let alice = token("alice", json!({}));
    let resp = gw
        .client
        .post(format!("http://{}/bulwark.v1.UserService/GetUser", gw.addr))
        .bearer_auth(&alice)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_argument");
}
