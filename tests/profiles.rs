mod common;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Value, json};

use bulwark::events::{
    EventPublisher, InMemoryPublisher, ProfileInitEvent, PublishError, TOPIC_PROFILE_INITIALISED,
};
use bulwark::rpc::methods;
use bulwark::status::{Code, Status};
use bulwark::store::Store;
use bulwark::types::{Artifact, EntityKind, EvalStatus, RuleEvaluationRecord};
use common::{Harness, profile, project_context, severity_rule_type};

/// Records, at publish time, how many profiles the event's project holds.
struct SnapshotPublisher {
    store: Arc<dyn Store>,
    seen: Mutex<Vec<(ProfileInitEvent, usize)>>,
}

impl EventPublisher for SnapshotPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        assert_eq!(topic, TOPIC_PROFILE_INITIALISED);
        let event: ProfileInitEvent = serde_json::from_slice(&payload).unwrap();
        let profiles = self
            .store
            .querier()
            .list_profiles_by_project(&event.project_id)
            .unwrap()
            .len();
        self.seen.lock().unwrap().push((event, profiles));
        Ok(())
    }
}

/// Refuses every event.
struct ClosedPublisher;

impl EventPublisher for ClosedPublisher {
    fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
        Err(PublishError::Closed)
    }
}

struct Fixture {
    h: Harness,
    token: String,
    project_id: String,
}

impl Fixture {
    fn with_harness(h: Harness) -> Self {
        let (token, project_id) = h.enroll("alice");
        h.add_provider(&project_id, "forge");
        let f = Self {
            h,
            token,
            project_id,
        };
        f.call(
            methods::CREATE_RULE_TYPE,
            json!({"rule_type": severity_rule_type("sev")}),
        )
        .unwrap();
        f.call(
            methods::CREATE_RULE_TYPE,
            json!({"rule_type": artifact_rule_type("signed")}),
        )
        .unwrap();
        f
    }

    fn new() -> Self {
        Self::with_harness(Harness::new())
    }

    fn call(&self, method: &str, mut body: Value) -> Result<Value, Status> {
        body["context"] = project_context(&self.project_id);
        self.h.call(method, Some(&self.token), body)
    }

    fn create_profile(&self, profile: Value) -> Result<Value, Status> {
        self.call(methods::CREATE_PROFILE, json!({"profile": profile}))
    }

    fn update_profile(&self, profile: Value) -> Result<Value, Status> {
        self.call(methods::UPDATE_PROFILE, json!({"profile": profile}))
    }

    fn rule_type_id(&self, name: &str) -> String {
        let rt = self
            .call(methods::GET_RULE_TYPE_BY_NAME, json!({"name": name}))
            .unwrap();
        rt["id"].as_str().unwrap().to_string()
    }

    fn record(
        &self,
        profile_id: &str,
        rule_type: &str,
        entity: EntityKind,
        entity_id: &str,
        status: EvalStatus,
    ) {
        let rule_name = rule_type;
        self.h
            .store
            .querier()
            .upsert_rule_evaluation(&RuleEvaluationRecord {
                profile_id: profile_id.to_string(),
                rule_type_id: self.rule_type_id(rule_type),
                rule_name: rule_name.to_string(),
                entity,
                entity_id: entity_id.to_string(),
                eval_status: status,
                eval_details: format!("{rule_name} evaluated"),
                remediation_status: None,
                alert_status: Some("off".to_string()),
            })
            .unwrap();
    }
}

fn artifact_rule_type(name: &str) -> Value {
    json!({
        "name": name,
        "description": "Artifacts must be signed",
        "definition": {
            "in_entity": "artifact",
            "rule_schema": {"type": "object", "properties": {"issuer": {"type": "string"}}},
            "param_schema": {"type": "object", "properties": {"tags": {"type": "array", "items": {"type": "string"}}}},
            "ingest": {"type": "artifact"},
            "eval": {"type": "rego"}
        },
        "guidance": "Sign the artifact with the release key."
    })
}

fn two_kind_profile(name: &str) -> Value {
    json!({
        "name": name,
        "alert": "on",
        "remediate": "dry_run",
        "rules": {
            "repository": [{"type": "sev", "def": {"severity": "high"}}],
            "artifact": [{"type": "signed", "def": {"issuer": "release"}, "params": {"tags": ["latest"]}}]
        }
    })
}

#[test]
fn test_create_and_read_profile() {
    let f = Fixture::new();
    let created = f.create_profile(two_kind_profile("baseline")).unwrap();
    assert_eq!(created["name"], "baseline");
    assert_eq!(created["provider_name"], "forge");
    assert_eq!(created["remediate"], "dry_run");

    let id = created["id"].as_str().unwrap();
    let fetched = f.call(methods::GET_PROFILE_BY_ID, json!({"id": id})).unwrap();
    assert_eq!(fetched["rules"]["repository"][0]["type"], "sev");
    assert_eq!(fetched["rules"]["artifact"][0]["params"], json!({"tags": ["latest"]}));

    let listed = f.call(methods::LIST_PROFILES, json!({})).unwrap();
    assert_eq!(listed["profiles"].as_array().unwrap().len(), 1);

    let err = f.create_profile(two_kind_profile("baseline")).unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
}

#[test]
fn test_create_profile_rejects_bad_rules() {
    let f = Fixture::new();

    let err = f.create_profile(profile("p", "ghost")).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.message().contains("cannot find rule type ghost"), "{}", err.message());

    let mut bad_def = profile("p", "sev");
    bad_def["rules"]["repository"][0]["def"] = json!({"severity": "extreme"});
    let err = f.create_profile(bad_def).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut bad_params = two_kind_profile("p");
    bad_params["rules"]["artifact"][0]["params"] = json!({"tags": "latest"});
    let err = f.create_profile(bad_params).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let wrong_kind = json!({
        "name": "p",
        "rules": {"artifact": [{"type": "sev", "def": {}}]}
    });
    let err = f.create_profile(wrong_kind).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let duplicate = json!({
        "name": "p",
        "rules": {"repository": [{"type": "sev", "def": {}}, {"type": "sev", "def": {}}]}
    });
    let err = f.create_profile(duplicate).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // Distinct names make repeated rule types acceptable.
    let named = json!({
        "name": "p",
        "rules": {"repository": [
            {"type": "sev", "name": "sev-low", "def": {"severity": "low"}},
            {"type": "sev", "name": "sev-high", "def": {"severity": "high"}}
        ]}
    });
    f.create_profile(named).unwrap();

    // Nothing from the failed attempts was left behind.
    let listed = f.call(methods::LIST_PROFILES, json!({})).unwrap();
    assert_eq!(listed["profiles"].as_array().unwrap().len(), 1);
}

#[test]
fn test_profile_without_provider() {
    let h = Harness::new();
    let (token, project_id) = h.enroll("alice");
    let err = h
        .call(
            methods::CREATE_PROFILE,
            Some(&token),
            json!({"context": project_context(&project_id), "profile": profile("p", "sev")}),
        )
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(
        err.message(),
        "cannot infer provider, there are 0 providers available"
    );
}

#[test]
fn test_events_follow_commit() {
    let snapshot = Arc::new(Mutex::new(None));
    let handle = snapshot.clone();
    let h = Harness::with_publisher(move |store| {
        let publisher = Arc::new(SnapshotPublisher {
            store,
            seen: Mutex::new(Vec::new()),
        });
        *handle.lock().unwrap() = Some(publisher.clone());
        publisher as Arc<dyn EventPublisher>
    });
    let f = Fixture::with_harness(h);
    let publisher = snapshot.lock().unwrap().clone().unwrap();

    f.create_profile(profile("baseline", "sev")).unwrap();
    f.update_profile(two_kind_profile("baseline")).unwrap();
    assert!(f.create_profile(profile("broken", "ghost")).is_err());

    let seen = publisher.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    for (event, profiles) in seen.iter() {
        assert_eq!(event.project_id, f.project_id);
        assert_eq!(event.provider_name, "forge");
        assert_eq!(*profiles, 1);
    }
}

#[test]
fn test_publish_failure_keeps_profile() {
    let f = Fixture::with_harness(Harness::with_publisher(|_| Arc::new(ClosedPublisher) as Arc<dyn EventPublisher>));
    f.create_profile(profile("baseline", "sev")).unwrap();
    let listed = f.call(methods::LIST_PROFILES, json!({})).unwrap();
    assert_eq!(listed["profiles"].as_array().unwrap().len(), 1);
}

#[test]
fn test_in_memory_publisher_sees_each_change() {
    let publisher = Arc::new(InMemoryPublisher::new());
    let handle = publisher.clone();
    let f = Fixture::with_harness(Harness::with_publisher(move |_| handle as Arc<dyn EventPublisher>));

    f.create_profile(profile("baseline", "sev")).unwrap();
    f.update_profile(profile("baseline", "sev")).unwrap();

    let messages = publisher.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.topic == TOPIC_PROFILE_INITIALISED));
}

#[test]
fn test_update_replaces_rules_and_drops_stale_statuses() {
    let f = Fixture::new();
    let created = f.create_profile(two_kind_profile("baseline")).unwrap();
    let profile_id = created["id"].as_str().unwrap().to_string();

    f.record(&profile_id, "sev", EntityKind::Repository, "repo-1", EvalStatus::Success);
    f.record(&profile_id, "signed", EntityKind::Artifact, "art-1", EvalStatus::Failure);

    // Drop the artifact rules; the repository rule stays.
    let mut update = profile("baseline", "sev");
    update["id"] = json!(profile_id);
    update["remediate"] = json!("on");
    let updated = f.update_profile(update).unwrap();
    assert_eq!(updated["remediate"], "on");
    assert!(updated["rules"].get("artifact").is_none());

    let status = f
        .call(methods::GET_PROFILE_STATUS_BY_NAME, json!({"name": "baseline"}))
        .unwrap();
    let evaluations = status["rule_evaluation_status"].as_array().unwrap();
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0]["rule_type_name"], "sev");
    assert_eq!(status["profile_status"]["status"], "success");

    // The artifact rule type is no longer in use and can go.
    let signed = f.rule_type_id("signed");
    f.call(methods::DELETE_RULE_TYPE, json!({"id": signed})).unwrap();
}

#[test]
fn test_update_cannot_rename() {
    let f = Fixture::new();
    let created = f.create_profile(profile("baseline", "sev")).unwrap();

    let mut renamed = profile("renamed", "sev");
    renamed["id"] = created["id"].clone();
    let err = f.update_profile(renamed).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = f.update_profile(profile("missing", "sev")).unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[test]
fn test_status_with_guidance_and_entity_details() {
    let f = Fixture::new();
    let created = f.create_profile(two_kind_profile("baseline")).unwrap();
    let profile_id = created["id"].as_str().unwrap().to_string();

    f.h.store
        .querier()
        .create_artifact(&Artifact {
            id: "art-1".to_string(),
            project_id: f.project_id.clone(),
            repository_id: None,
            name: "ghcr.io/acme/app".to_string(),
            artifact_type: "container".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();

    f.record(&profile_id, "sev", EntityKind::Repository, "repo-1", EvalStatus::Success);
    f.record(&profile_id, "signed", EntityKind::Artifact, "art-1", EvalStatus::Failure);

    let status = f
        .call(methods::GET_PROFILE_STATUS_BY_NAME, json!({"name": "baseline"}))
        .unwrap();
    assert_eq!(status["profile_status"]["status"], "failure");

    let evaluations = status["rule_evaluation_status"].as_array().unwrap();
    assert_eq!(evaluations.len(), 2);
    let failed = evaluations
        .iter()
        .find(|e| e["status"] == "failure")
        .unwrap();
    assert_eq!(failed["guidance"], "Sign the artifact with the release key.");
    assert_eq!(failed["entity_info"]["artifact_name"], "ghcr.io/acme/app");
    assert_eq!(failed["alert_status"], "off");

    let passed = evaluations
        .iter()
        .find(|e| e["status"] == "success")
        .unwrap();
    assert!(passed.get("guidance").is_none());

    let filtered = f
        .call(
            methods::GET_PROFILE_STATUS_BY_NAME,
            json!({"name": "baseline", "entity_kind": "artifact", "entity_id": "art-1"}),
        )
        .unwrap();
    assert_eq!(filtered["rule_evaluation_status"].as_array().unwrap().len(), 1);

    let err = f
        .call(
            methods::GET_PROFILE_STATUS_BY_NAME,
            json!({"name": "baseline", "entity_id": "art-1"}),
        )
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = f
        .call(methods::GET_PROFILE_STATUS_BY_NAME, json!({"name": "nope"}))
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[test]
fn test_status_of_unevaluated_profile_is_pending() {
    let f = Fixture::new();
    f.create_profile(profile("baseline", "sev")).unwrap();
    let status = f
        .call(methods::GET_PROFILE_STATUS_BY_NAME, json!({"name": "baseline"}))
        .unwrap();
    assert_eq!(status["profile_status"]["status"], "pending");
    assert_eq!(status["rule_evaluation_status"], json!([]));
}

#[test]
fn test_delete_profile() {
    let f = Fixture::new();
    let created = f.create_profile(profile("baseline", "sev")).unwrap();
    let id = created["id"].clone();

    f.call(methods::DELETE_PROFILE, json!({"id": id})).unwrap();
    let err = f.call(methods::GET_PROFILE_BY_ID, json!({"id": id})).unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    let err = f.call(methods::DELETE_PROFILE, json!({"id": id})).unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}
