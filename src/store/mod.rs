mod schema;
mod sqlite;

pub use sqlite::{SqliteStore, SqliteTransaction};

use crate::error::Result;
use crate::types::*;

/// Querier defines every read and write the control plane performs.
///
/// `get_*` lookups return `Ok(None)` when the row does not exist. Writes that
/// hit a unique key fail with [`crate::error::Error::UniqueViolation`].
pub trait Querier {
    // User operations
    fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>>;
    fn get_user_by_id(&self, id: &str) -> Result<Option<User>>;
    fn create_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    fn get_user_projects(&self, user_id: &str) -> Result<Vec<Project>>;
    fn get_user_roles(&self, user_id: &str) -> Result<Vec<RoleBinding>>;

    // Role binding operations
    fn upsert_role_binding(&self, binding: &RoleBinding) -> Result<()>;
    fn delete_role_binding(&self, user_id: &str, project_id: &str) -> Result<bool>;
    fn list_project_role_bindings(&self, project_id: &str) -> Result<Vec<RoleBinding>>;

    // Project operations (tree rooted at top-level projects)
    fn get_project_by_id(&self, id: &str) -> Result<Option<Project>>;
    fn get_project_by_name(&self, parent_id: Option<&str>, name: &str) -> Result<Option<Project>>;
    fn get_children_projects(&self, id: &str, recursive: bool) -> Result<Vec<Project>>;
    fn create_project(&self, project: &Project) -> Result<()>;
    fn delete_project(&self, id: &str) -> Result<bool>;

    // Provider operations
    fn list_providers_by_project_id(&self, project_id: &str) -> Result<Vec<Provider>>;
    fn get_provider_by_name(&self, project_id: &str, name: &str) -> Result<Option<Provider>>;
    fn get_provider_by_id(&self, id: &str) -> Result<Option<Provider>>;
    fn create_provider(&self, provider: &Provider) -> Result<()>;
    fn find_providers(
        &self,
        project_id: &str,
        name: Option<&str>,
        implements: Option<ProviderCapability>,
    ) -> Result<Vec<Provider>>;

    // Forge app installations
    fn create_pending_installation(&self, installation: &PendingInstallation) -> Result<()>;
    fn get_unclaimed_installations_by_forge_id(
        &self,
        forge_id: &str,
    ) -> Result<Vec<PendingInstallation>>;
    fn claim_installation(&self, installation_id: i64, project_id: &str) -> Result<()>;

    // Invitation operations
    fn create_invitation(&self, invitation: &Invitation) -> Result<()>;
    fn get_invitation_by_code_hash(&self, code_hash: &str) -> Result<Option<Invitation>>;
    fn delete_invitation(&self, code_hash: &str) -> Result<bool>;

    // Rule type operations
    fn create_rule_type(&self, rule_type: &RuleType) -> Result<()>;
    fn update_rule_type(&self, rule_type: &RuleType) -> Result<()>;
    fn delete_rule_type(&self, id: &str) -> Result<bool>;
    fn get_rule_type_by_id(&self, id: &str) -> Result<Option<RuleType>>;
    fn get_rule_type_by_name(&self, project_id: &str, name: &str) -> Result<Option<RuleType>>;
    fn list_rule_types_by_project(&self, project_id: &str) -> Result<Vec<RuleType>>;

    // Profile operations
    fn create_profile(&self, profile: &Profile) -> Result<()>;
    fn update_profile(&self, profile: &Profile) -> Result<()>;
    fn delete_profile(&self, id: &str) -> Result<bool>;
    fn get_profile_by_id(&self, project_id: &str, id: &str) -> Result<Option<Profile>>;
    fn get_profile_by_id_and_lock(&self, project_id: &str, id: &str) -> Result<Option<Profile>>;
    fn get_profile_by_name_and_lock(&self, project_id: &str, name: &str)
    -> Result<Option<Profile>>;
    fn list_profiles_by_project(&self, project_id: &str) -> Result<Vec<Profile>>;

    // Per-entity rule lists and rule instantiations
    fn list_profile_entities(&self, profile_id: &str) -> Result<Vec<EntityProfile>>;
    fn create_profile_for_entity(&self, entity_profile: &EntityProfile) -> Result<()>;
    /// Inserts or replaces the rule list; the returned row keeps the existing id.
    fn upsert_profile_for_entity(&self, entity_profile: &EntityProfile) -> Result<EntityProfile>;
    fn delete_profile_for_entity(&self, profile_id: &str, entity: EntityKind) -> Result<bool>;
    fn upsert_rule_instantiation(&self, entity_profile_id: &str, rule_type_id: &str) -> Result<()>;
    fn delete_rule_instantiation(&self, entity_profile_id: &str, rule_type_id: &str)
    -> Result<bool>;
    fn list_rule_instantiations(&self, profile_id: &str) -> Result<Vec<RuleInstantiation>>;
    /// Names of the profiles using the rule type, sorted.
    fn list_profiles_instantiating_rule_type(&self, rule_type_id: &str) -> Result<Vec<String>>;

    // Evaluation status
    fn get_profile_status_by_name_and_project(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<ProfileStatus>>;
    fn list_rule_evaluations_by_profile_id(
        &self,
        profile_id: &str,
        filter: &RuleEvaluationFilter,
    ) -> Result<Vec<RuleEvaluationRow>>;
    /// Records an evaluation outcome and returns the evaluation id.
    fn upsert_rule_evaluation(&self, record: &RuleEvaluationRecord) -> Result<String>;
    fn delete_rule_statuses_for_profile_and_rule_type(
        &self,
        profile_id: &str,
        rule_type_id: &str,
    ) -> Result<usize>;

    // Entities
    fn create_repository(&self, repo: &Repository) -> Result<()>;
    fn get_repository_by_id(&self, id: &str) -> Result<Option<Repository>>;
    fn create_artifact(&self, artifact: &Artifact) -> Result<()>;
    fn get_artifact_by_id(&self, id: &str) -> Result<Option<Artifact>>;
}

/// Store owns the database and hands out queriers.
///
/// Multi-row writes go through [`Store::begin_transaction`]; dropping a
/// transaction without committing rolls it back.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    /// Querier running each statement on its own.
    fn querier(&self) -> &dyn Querier;

    fn begin_transaction(&self) -> Result<Box<dyn Transaction + '_>>;
}

pub trait Transaction {
    /// Querier bound to this transaction.
    fn querier(&self) -> &dyn Querier;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
