use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rpc::{RequestContext, RequestContextV2, RpcRequest};
use crate::types::{
    ActionMode, EntityInfo, EntityKind, EvalStatus, Profile, ProfileStatus, Project,
    ProjectMetadata, Provider, ProviderCapability, Role, RoleBinding, RuleRef, RuleType,
    RuleTypeDefinition, User,
};

// Health

#[derive(Debug, Default, Deserialize)]
pub struct CheckHealthRequest {}

#[derive(Debug, Serialize)]
pub struct CheckHealthResponse {
    pub status: &'static str,
}

// Users

#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: String,
    pub subject: String,
    pub project_id: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetUserRequest {}

#[derive(Debug, Serialize)]
pub struct GetUserResponse {
    pub user: User,
    pub projects: Vec<Project>,
    pub role_bindings: Vec<RoleBinding>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteUserRequest {}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    /// Top-level projects removed along with the user.
    pub deleted_projects: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveInvitationRequest {
    pub code: String,
    pub accept: bool,
}

#[derive(Debug, Serialize)]
pub struct ResolveInvitationResponse {
    pub project_id: String,
    pub role: Role,
    pub is_accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct GetUserBySubjectRequest {
    pub subject: String,
}

// Projects

#[derive(Debug, Default, Deserialize)]
pub struct ListProjectsRequest {}

#[derive(Debug, Serialize)]
pub struct ListProjectsResponse {
    pub projects: Vec<Project>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub name: String,
    #[serde(default)]
    pub metadata: ProjectMetadata,
}

#[derive(Debug, Deserialize)]
pub struct DeleteProjectRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
}

#[derive(Debug, Serialize)]
pub struct DeleteProjectResponse {
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListChildProjectsRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct CreateInvitationResponse {
    /// Returned once; only its hash is stored.
    pub code: String,
    pub email: String,
    pub project_id: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

// Providers

#[derive(Debug, Deserialize)]
pub struct ListProvidersRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    #[serde(default)]
    pub implements: Option<ProviderCapability>,
}

#[derive(Debug, Serialize)]
pub struct ListProvidersResponse {
    pub providers: Vec<Provider>,
}

#[derive(Debug, Deserialize)]
pub struct GetProviderRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub name: String,
}

// Rule types

#[derive(Debug, Clone, Deserialize)]
pub struct RuleTypeInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub definition: RuleTypeDefinition,
    #[serde(default)]
    pub guidance: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleTypeRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub rule_type: RuleTypeInput,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRuleTypeRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub rule_type: RuleTypeInput,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRuleTypeRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteRuleTypeResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListRuleTypesRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
}

#[derive(Debug, Serialize)]
pub struct ListRuleTypesResponse {
    pub rule_types: Vec<RuleType>,
}

#[derive(Debug, Deserialize)]
pub struct GetRuleTypeByNameRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct GetRuleTypeByIdRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub id: String,
}

// Profiles

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileInput {
    /// Selects the profile to update; updates fall back to `name` without it.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub remediate: ActionMode,
    #[serde(default)]
    pub alert: ActionMode,
    #[serde(default)]
    pub rules: BTreeMap<EntityKind, Vec<RuleRef>>,
}

/// A profile together with its per-entity rules.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: Profile,
    pub rules: BTreeMap<EntityKind, Vec<RuleRef>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub profile: ProfileInput,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub profile: ProfileInput,
}

#[derive(Debug, Deserialize)]
pub struct DeleteProfileRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteProfileResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListProfilesRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
}

#[derive(Debug, Serialize)]
pub struct ListProfilesResponse {
    pub profiles: Vec<ProfileView>,
}

#[derive(Debug, Deserialize)]
pub struct GetProfileByIdRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct GetProfileStatusByNameRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub context_v2: Option<RequestContextV2>,
    pub name: String,
    #[serde(default)]
    pub entity_kind: Option<EntityKind>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub rule_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RuleEvaluationStatus {
    pub profile_id: String,
    pub rule_type_id: String,
    pub rule_type_name: String,
    pub rule_name: String,
    pub entity: EntityKind,
    pub entity_id: String,
    #[serde(skip_serializing_if = "EntityInfo::is_empty")]
    pub entity_info: EntityInfo,
    pub status: EvalStatus,
    pub details: String,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_details: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub guidance: String,
}

#[derive(Debug, Serialize)]
pub struct GetProfileStatusByNameResponse {
    pub profile_status: ProfileStatus,
    pub rule_evaluation_status: Vec<RuleEvaluationStatus>,
}

impl RpcRequest for CheckHealthRequest {}
impl RpcRequest for CreateUserRequest {}
impl RpcRequest for GetUserRequest {}
impl RpcRequest for DeleteUserRequest {}
impl RpcRequest for ResolveInvitationRequest {}
impl RpcRequest for GetUserBySubjectRequest {}
impl RpcRequest for ListProjectsRequest {}

crate::project_scoped!(
    CreateRuleTypeRequest,
    UpdateRuleTypeRequest,
    DeleteRuleTypeRequest,
    ListRuleTypesRequest,
    GetRuleTypeByNameRequest,
    GetRuleTypeByIdRequest,
    CreateProfileRequest,
    UpdateProfileRequest,
    DeleteProfileRequest,
    ListProfilesRequest,
    GetProfileByIdRequest,
    GetProfileStatusByNameRequest,
);

crate::project_scoped!(
    without_provider: CreateProjectRequest,
    DeleteProjectRequest,
    ListChildProjectsRequest,
    CreateInvitationRequest,
    ListProvidersRequest,
    GetProviderRequest,
);
