use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub metadata: ProjectMetadata,
    pub created_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderClass {
    #[serde(rename = "forge")]
    Forge,
    #[serde(rename = "forge-app")]
    ForgeApp,
    #[serde(rename = "container-registry")]
    ContainerRegistry,
}

impl ProviderClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderClass::Forge => "forge",
            ProviderClass::ForgeApp => "forge-app",
            ProviderClass::ContainerRegistry => "container-registry",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderClass> {
        match s {
            "forge" => Some(ProviderClass::Forge),
            "forge-app" => Some(ProviderClass::ForgeApp),
            "container-registry" => Some(ProviderClass::ContainerRegistry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    RepoLister,
    Git,
    Rest,
    Forge,
    ImageLister,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub class: ProviderClass,
    pub implements: Vec<ProviderCapability>,
    pub version: String,
    /// Opaque provider configuration; never returned to callers.
    #[serde(skip)]
    pub config: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Provider {
    #[must_use]
    pub fn implements(&self, capability: ProviderCapability) -> bool {
        self.implements.contains(&capability)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub role: Role,
    pub organization_id: String,
}

impl RoleBinding {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A forge app installation waiting to be claimed by the user who installed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInstallation {
    pub installation_id: i64,
    pub organization_login: String,
    pub enrolling_forge_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    /// SHA-256 of the code handed to the invitee.
    #[serde(skip)]
    pub code_hash: String,
    pub email: String,
    pub project_id: String,
    pub role: Role,
    pub sponsor_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// `type` plus free-form configuration, used by the ingest/eval/remediate/alert
/// sections of a rule type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTypeDefinition {
    pub in_entity: String,
    pub rule_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_schema: Option<serde_json::Value>,
    pub ingest: ActionConfig,
    pub eval: ActionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediate: Option<ActionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<ActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleType {
    pub id: String,
    pub project_id: String,
    pub provider_name: String,
    pub name: String,
    pub description: String,
    pub definition: RuleTypeDefinition,
    pub guidance: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    On,
    Off,
    DryRun,
    #[default]
    Unset,
}

impl ActionMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ActionMode::On => "on",
            ActionMode::Off => "off",
            ActionMode::DryRun => "dry_run",
            ActionMode::Unset => "unset",
        }
    }

    pub fn parse(s: &str) -> Option<ActionMode> {
        match s {
            "on" => Some(ActionMode::On),
            "off" => Some(ActionMode::Off),
            "dry_run" => Some(ActionMode::DryRun),
            "unset" | "" => Some(ActionMode::Unset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub project_id: String,
    pub provider_name: String,
    pub name: String,
    pub remediate: ActionMode,
    pub alert: ActionMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One rule of a profile: the rule type it instantiates, its definition and
/// its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRef {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub def: serde_json::Value,
}

impl RuleRef {
    /// The rule's display name: its explicit name, or its rule type.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.rule_type
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProfile {
    pub id: String,
    pub profile_id: String,
    pub entity: EntityKind,
    pub rules: Vec<RuleRef>,
    pub created_at: DateTime<Utc>,
}

/// Link between a profile's per-entity rule list and a rule type it uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleInstantiation {
    pub entity_profile_id: String,
    pub entity: EntityKind,
    pub rule_type_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub project_id: String,
    pub provider_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<String>,
    pub name: String,
    pub artifact_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    Pending,
    Skipped,
    Success,
    Failure,
    Error,
}

impl EvalStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EvalStatus::Pending => "pending",
            EvalStatus::Skipped => "skipped",
            EvalStatus::Success => "success",
            EvalStatus::Failure => "failure",
            EvalStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<EvalStatus> {
        match s {
            "pending" => Some(EvalStatus::Pending),
            "skipped" => Some(EvalStatus::Skipped),
            "success" => Some(EvalStatus::Success),
            "failure" => Some(EvalStatus::Failure),
            "error" => Some(EvalStatus::Error),
            _ => None,
        }
    }

    /// Failed or errored evaluations carry the rule type's guidance.
    #[must_use]
    pub fn needs_guidance(self) -> bool {
        matches!(self, EvalStatus::Failure | EvalStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileStatus {
    pub profile_id: String,
    pub profile_name: String,
    pub status: EvalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// A rule evaluation row as stored. Columns coming from outer joins are
/// optional; incomplete rows are dropped by the status reader.
#[derive(Debug, Clone)]
pub struct RuleEvaluationRow {
    pub id: String,
    pub profile_id: String,
    pub rule_type_id: String,
    pub rule_type_name: Option<String>,
    pub rule_name: String,
    pub entity: EntityKind,
    pub entity_id: String,
    pub eval_status: Option<EvalStatus>,
    pub eval_details: Option<String>,
    pub eval_last_updated: Option<DateTime<Utc>>,
    pub remediation_status: Option<String>,
    pub remediation_details: Option<String>,
    pub alert_status: Option<String>,
    pub alert_details: Option<String>,
}

/// Input used by evaluators to record the outcome of a rule evaluation.
#[derive(Debug, Clone)]
pub struct RuleEvaluationRecord {
    pub profile_id: String,
    pub rule_type_id: String,
    pub rule_name: String,
    pub entity: EntityKind,
    pub entity_id: String,
    pub eval_status: EvalStatus,
    pub eval_details: String,
    pub remediation_status: Option<String>,
    pub alert_status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleEvaluationFilter {
    pub entity: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub rule_name: Option<String>,
}
