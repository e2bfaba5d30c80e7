mod common;

use serde_json::{Value, json};

use bulwark::guidance::MAX_GUIDANCE_BYTES;
use bulwark::rpc::methods;
use bulwark::status::{Code, Status};
use common::{Harness, profile, project_context, severity_rule_type};

struct Fixture {
    h: Harness,
    token: String,
    project_id: String,
}

impl Fixture {
    fn new() -> Self {
        let h = Harness::new();
        let (token, project_id) = h.enroll("alice");
        h.add_provider(&project_id, "forge");
        Self {
            h,
            token,
            project_id,
        }
    }

    fn call(&self, method: &str, mut body: Value) -> Result<Value, Status> {
        body["context"] = project_context(&self.project_id);
        self.h.call(method, Some(&self.token), body)
    }

    fn create(&self, rule_type: Value) -> Result<Value, Status> {
        self.call(methods::CREATE_RULE_TYPE, json!({"rule_type": rule_type}))
    }

    fn update(&self, rule_type: Value) -> Result<Value, Status> {
        self.call(methods::UPDATE_RULE_TYPE, json!({"rule_type": rule_type}))
    }

    fn use_in_profile(&self, name: &str, rule_type: &str) {
        self.call(methods::CREATE_PROFILE, json!({"profile": profile(name, rule_type)}))
            .unwrap();
    }
}

#[test]
fn test_create_and_get() {
    let f = Fixture::new();
    let created = f.create(severity_rule_type("sev")).unwrap();
    let id = created["id"].as_str().unwrap();

    let by_name = f
        .call(methods::GET_RULE_TYPE_BY_NAME, json!({"name": "sev"}))
        .unwrap();
    assert_eq!(by_name["id"], id);
    assert_eq!(by_name["definition"]["in_entity"], "repository");

    let by_id = f.call(methods::GET_RULE_TYPE_BY_ID, json!({"id": id})).unwrap();
    assert_eq!(by_id["name"], "sev");

    let list = f.call(methods::LIST_RULE_TYPES, json!({})).unwrap();
    assert_eq!(list["rule_types"].as_array().unwrap().len(), 1);
}

#[test]
fn test_create_duplicate() {
    let f = Fixture::new();
    f.create(severity_rule_type("sev")).unwrap();
    let err = f.create(severity_rule_type("sev")).unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
}

#[test]
fn test_create_rejects_bad_definitions() {
    let f = Fixture::new();

    let mut unknown_entity = severity_rule_type("sev");
    unknown_entity["definition"]["in_entity"] = json!("mailbox");
    assert_eq!(f.create(unknown_entity).unwrap_err().code(), Code::InvalidArgument);

    let mut bad_schema = severity_rule_type("sev");
    bad_schema["definition"]["rule_schema"] = json!({"type": "object", "required": "severity"});
    assert_eq!(f.create(bad_schema).unwrap_err().code(), Code::InvalidArgument);

    let mut bad_name = severity_rule_type("sev");
    bad_name["name"] = json!("");
    assert_eq!(f.create(bad_name).unwrap_err().code(), Code::InvalidArgument);
}

#[test]
fn test_provider_cannot_be_inferred_without_providers() {
    let h = Harness::new();
    let (token, project_id) = h.enroll("alice");
    for (method, body) in [
        (
            methods::CREATE_RULE_TYPE,
            json!({"context": project_context(&project_id), "rule_type": severity_rule_type("sev")}),
        ),
        (
            methods::LIST_RULE_TYPES,
            json!({"context": project_context(&project_id)}),
        ),
    ] {
        let err = h.call(method, Some(&token), body).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument, "{method}");
        assert_eq!(
            err.message(),
            "cannot infer provider, there are 0 providers available"
        );
    }
}

#[test]
fn test_composite_keywords_are_enforced_on_profiles() {
    let f = Fixture::new();
    let mut rule_type = severity_rule_type("one-of");
    rule_type["definition"]["rule_schema"] = json!({
        "properties": {"severity": {"oneOf": [{"type": "string", "enum": ["low"]}]}}
    });
    f.create(rule_type).unwrap();

    let profile_with = |def: Value| {
        let mut p = profile("p", "one-of");
        p["rules"]["repository"][0]["def"] = def;
        json!({"profile": p})
    };
    let err = f
        .call(methods::CREATE_PROFILE, profile_with(json!({"severity": 42})))
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    f.call(methods::CREATE_PROFILE, profile_with(json!({"severity": "low"})))
        .unwrap();
}

#[test]
fn test_malformed_composite_schema_is_rejected() {
    let f = Fixture::new();
    for rule_schema in [
        json!({"anyOf": []}),
        json!({"properties": {"severity": {"$ref": "#/$defs/missing"}}}),
        json!({"not": "string"}),
    ] {
        let mut rule_type = severity_rule_type("sev");
        rule_type["definition"]["rule_schema"] = rule_schema.clone();
        let err = f.create(rule_type).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument, "{rule_schema}");
        assert!(err.message().starts_with("invalid rule schema"));
    }
}

#[test]
fn test_update_adding_unmodelled_keyword_is_refused_in_use() {
    let f = Fixture::new();
    f.create(severity_rule_type("sev")).unwrap();
    f.use_in_profile("uses-sev", "sev");

    let mut narrowed = severity_rule_type("sev");
    narrowed["definition"]["rule_schema"]["properties"]["severity"]["not"] =
        json!({"const": "low"});
    let err = f.update(narrowed).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.message().starts_with("Rule schema update is invalid"));
}

#[test]
fn test_guidance_too_long() {
    let f = Fixture::new();
    let mut rule_type = severity_rule_type("sev");
    rule_type["guidance"] = json!("g".repeat(MAX_GUIDANCE_BYTES + 1));
    let err = f.create(rule_type).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut rule_type = severity_rule_type("sev");
    rule_type["guidance"] = json!("g".repeat(MAX_GUIDANCE_BYTES));
    f.create(rule_type).unwrap();
}

#[test]
fn test_incompatible_update_of_used_rule_type() {
    let f = Fixture::new();
    f.create(severity_rule_type("sev")).unwrap();
    f.use_in_profile("baseline", "sev");

    let mut narrowed = severity_rule_type("sev");
    narrowed["definition"]["rule_schema"]["properties"]["severity"]["enum"] =
        json!(["medium", "high"]);
    let err = f.update(narrowed).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(
        err.message().contains("Rule schema update is invalid"),
        "{}",
        err.message()
    );

    let mut required = severity_rule_type("sev");
    required["definition"]["rule_schema"]["required"] = json!(["severity"]);
    let err = f.update(required).unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // The stored definition is untouched.
    let stored = f
        .call(methods::GET_RULE_TYPE_BY_NAME, json!({"name": "sev"}))
        .unwrap();
    assert_eq!(
        stored["definition"]["rule_schema"]["properties"]["severity"]["enum"],
        json!(["low", "medium", "high"])
    );
}

#[test]
fn test_compatible_update_of_used_rule_type() {
    let f = Fixture::new();
    f.create(severity_rule_type("sev")).unwrap();
    f.use_in_profile("baseline", "sev");

    let mut widened = severity_rule_type("sev");
    widened["definition"]["rule_schema"]["properties"]["severity"]["enum"] =
        json!(["low", "medium", "high", "critical"]);
    widened["description"] = json!("Now with critical findings");
    let updated = f.update(widened).unwrap();
    assert_eq!(updated["description"], "Now with critical findings");
}

#[test]
fn test_unused_rule_type_may_change_freely() {
    let f = Fixture::new();
    f.create(severity_rule_type("sev")).unwrap();

    let mut narrowed = severity_rule_type("sev");
    narrowed["definition"]["rule_schema"]["properties"]["severity"]["enum"] = json!(["high"]);
    narrowed["definition"]["in_entity"] = json!("artifact");
    let updated = f.update(narrowed).unwrap();
    assert_eq!(updated["definition"]["in_entity"], "artifact");
}

#[test]
fn test_entity_change_of_used_rule_type() {
    let f = Fixture::new();
    f.create(severity_rule_type("sev")).unwrap();
    f.use_in_profile("baseline", "sev");

    let mut moved = severity_rule_type("sev");
    moved["definition"]["in_entity"] = json!("artifact");
    let err = f.update(moved).unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
}

#[test]
fn test_update_missing_rule_type() {
    let f = Fixture::new();
    let err = f.update(severity_rule_type("ghost")).unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[test]
fn test_delete_rule_type_in_use() {
    let f = Fixture::new();
    let created = f.create(severity_rule_type("sev")).unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    f.use_in_profile("baseline", "sev");
    f.use_in_profile("strict", "sev");

    let err = f
        .call(methods::DELETE_RULE_TYPE, json!({"id": id}))
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(err.message().contains("baseline"), "{}", err.message());
    assert!(err.message().contains("strict"), "{}", err.message());

    let profiles = f.call(methods::LIST_PROFILES, json!({})).unwrap();
    for p in profiles["profiles"].as_array().unwrap() {
        f.call(methods::DELETE_PROFILE, json!({"id": p["id"]})).unwrap();
    }
    let deleted = f.call(methods::DELETE_RULE_TYPE, json!({"id": id})).unwrap();
    assert_eq!(deleted["id"], id.as_str());

    let err = f
        .call(methods::GET_RULE_TYPE_BY_ID, json!({"id": id}))
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[test]
fn test_rule_type_of_other_project_is_hidden() {
    let alice = Fixture::new();
    let created = alice.create(severity_rule_type("sev")).unwrap();
    let id = created["id"].clone();

    let (bob, bob_project) = alice.h.enroll("bob");
    alice.h.add_provider(&bob_project, "forge");
    let err = alice
        .h
        .call(
            methods::GET_RULE_TYPE_BY_ID,
            Some(&bob),
            json!({"context": project_context(&bob_project), "id": id}),
        )
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = alice
        .h
        .call(
            methods::DELETE_RULE_TYPE,
            Some(&bob),
            json!({"context": project_context(&bob_project), "id": id}),
        )
        .unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);
}
