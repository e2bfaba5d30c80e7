#![allow(dead_code)]

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tempfile::TempDir;
use uuid::Uuid;

use bulwark::auth::{JwtValidator, SigningKeys};
use bulwark::events::{EventPublisher, InMemoryPublisher};
use bulwark::rpc::{CallContext, Pipeline};
use bulwark::server::{AppState, dispatch};
use bulwark::service::Services;
use bulwark::status::Status;
use bulwark::store::{SqliteStore, Store};
use bulwark::types::{Provider, ProviderCapability, ProviderClass};

pub const ISSUER: &str = "https://id.example.com/realms/bulwark";
pub const SECRET: &[u8] = b"integration-test-secret";

pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<dyn Store>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_publisher(|_| Arc::new(InMemoryPublisher::new()) as Arc<dyn EventPublisher>)
    }

    /// Builds the harness around a publisher that may look at the store.
    pub fn with_publisher(
        publisher: impl FnOnce(Arc<dyn Store>) -> Arc<dyn EventPublisher>,
    ) -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let store = SqliteStore::new(temp.path().join("test.db")).expect("open store");
        store.initialize().expect("initialize store");
        let store: Arc<dyn Store> = Arc::new(store);

        let validator = Arc::new(JwtValidator::new(
            ISSUER,
            None,
            SigningKeys::Shared(SECRET.to_vec()),
        ));
        let services = Services::new(store.clone(), publisher(store.clone()));
        let state = Arc::new(AppState::new(
            Pipeline::new(validator, store.clone()),
            services,
        ));

        Self { temp, store, state }
    }

    /// Runs `method` with a JSON request, as the gateway does.
    pub fn call(&self, method: &str, token: Option<&str>, body: Value) -> Result<Value, Status> {
        let body = serde_json::to_vec(&body).unwrap();
        dispatch(&self.state, context(method, token), &body)
    }

    /// Enrols `subject` and returns its token and default project id.
    pub fn enroll(&self, subject: &str) -> (String, String) {
        let token = token(subject, json!({}));
        let resp = self
            .call(
                bulwark::rpc::methods::CREATE_USER,
                Some(&token),
                json!({}),
            )
            .expect("create user");
        let project_id = resp["project_id"].as_str().expect("project id").to_string();
        (token, project_id)
    }

    pub fn add_provider(&self, project_id: &str, name: &str) {
        self.store
            .querier()
            .create_provider(&Provider {
                id: Uuid::new_v4().to_string(),
                project_id: project_id.to_string(),
                name: name.to_string(),
                class: ProviderClass::Forge,
                implements: vec![ProviderCapability::Git, ProviderCapability::RepoLister],
                version: "v1".to_string(),
                config: Vec::new(),
                created_at: Utc::now(),
            })
            .expect("create provider");
    }
}

pub fn context(method: &str, token: Option<&str>) -> CallContext {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );
    }
    CallContext::new(method, headers)
}

/// Mints an HS256 token for `subject`; `extra` claims are merged in.
pub fn token(subject: &str, extra: Value) -> String {
    let mut claims = json!({
        "iss": ISSUER,
        "sub": subject,
        "preferred_username": subject,
        "exp": Utc::now().timestamp() + 600,
    });
    if let (Some(claims), Value::Object(extra)) = (claims.as_object_mut(), extra) {
        claims.extend(extra);
    }
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).expect("encode token")
}

pub fn superadmin_token(subject: &str) -> String {
    token(subject, json!({"realm_access": {"roles": ["superadmin"]}}))
}

pub fn project_context(project_id: &str) -> Value {
    json!({"project": project_id})
}

/// A repository rule type whose rule schema takes an optional severity.
pub fn severity_rule_type(name: &str) -> Value {
    json!({
        "name": name,
        "description": "Checks the severity threshold",
        "definition": {
            "in_entity": "repository",
            "rule_schema": {
                "type": "object",
                "properties": {
                    "severity": {"type": "string", "enum": ["low", "medium", "high"]}
                }
            },
            "ingest": {"type": "rest", "endpoint": "/repos/{owner}/{name}"},
            "eval": {"type": "jq"}
        },
        "guidance": "Raise the severity threshold in the repository settings."
    })
}

/// A profile applying `rule_type` to repositories.
pub fn profile(name: &str, rule_type: &str) -> Value {
    json!({
        "name": name,
        "alert": "on",
        "remediate": "off",
        "rules": {
            "repository": [{"type": rule_type, "def": {"severity": "low"}}]
        }
    })
}
