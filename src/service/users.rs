use chrono::Utc;
use uuid::Uuid;

use super::dto::{
    CreateUserRequest, CreateUserResponse, DeleteUserRequest, DeleteUserResponse,
    GetUserRequest, GetUserResponse,
};
use super::{Services, admin_binding, commit, new_user};
use crate::auth::Claims;
use crate::projects::{create_project_with_unique_name, project_name_from};
use crate::providers::{ProviderLookup, lookup_provider};
use crate::rpc::CallContext;
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::store::Querier;
use crate::types::{
    PendingInstallation, Project, ProjectMetadata, Provider, ProviderCapability, ProviderClass,
    User,
};

/// Provider created for projects claimed from a forge app installation.
pub const FORGE_APP_PROVIDER_NAME: &str = "forge-app";

fn create_top_level_project(
    q: &dyn Querier,
    base: &str,
    metadata: ProjectMetadata,
) -> Result<Project, Status> {
    create_project_with_unique_name(q, None, &project_name_from(base), metadata)
        .status("failed to create project")?
        .ok_or_else(|| Status::resource_exhausted("failed to find an available project name"))
}

/// Turns one pending installation into a project owned by `user`.
fn claim_installation(
    q: &dyn Querier,
    user: &User,
    installation: &PendingInstallation,
) -> Result<Project, Status> {
    let project = create_top_level_project(
        q,
        &installation.organization_login,
        ProjectMetadata {
            display_name: Some(installation.organization_login.clone()),
            description: None,
        },
    )?;
    q.claim_installation(installation.installation_id, &project.id)
        .status("failed to claim installation")?;

    if let ProviderLookup::Provision =
        lookup_provider(q, &project.id, FORGE_APP_PROVIDER_NAME).status("failed to look up provider")?
    {
        let config = serde_json::json!({ "installation_id": installation.installation_id });
        q.create_provider(&Provider {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            name: FORGE_APP_PROVIDER_NAME.to_string(),
            class: ProviderClass::ForgeApp,
            implements: vec![
                ProviderCapability::Forge,
                ProviderCapability::Git,
                ProviderCapability::Rest,
                ProviderCapability::RepoLister,
            ],
            version: "v1".to_string(),
            config: config.to_string().into_bytes(),
            created_at: Utc::now(),
        })
        .status("failed to create provider")?;
    }

    q.upsert_role_binding(&admin_binding(&user.id, &project.id, &project.id))
        .status("failed to grant project role")?;
    Ok(project)
}

/// Projects for a newly enrolled user: one per pending installation the
/// user's forge identity started, or a default project named after them.
fn provision_projects(q: &dyn Querier, user: &User, claims: &Claims) -> Result<Vec<Project>, Status> {
    let installations = match &claims.forge_id {
        Some(forge_id) => q
            .get_unclaimed_installations_by_forge_id(forge_id)
            .status("failed to list pending installations")?,
        None => Vec::new(),
    };

    let mut projects = Vec::with_capacity(installations.len().max(1));
    for installation in &installations {
        projects.push(claim_installation(q, user, installation)?);
    }

    if projects.is_empty() {
        let project = create_top_level_project(q, claims.display_name(), ProjectMetadata::default())?;
        q.upsert_role_binding(&admin_binding(&user.id, &project.id, &project.id))
            .status("failed to grant project role")?;
        projects.push(project);
    }
    Ok(projects)
}

impl Services {
    pub fn create_user(
        &self,
        ctx: &CallContext,
        _req: CreateUserRequest,
    ) -> Result<CreateUserResponse, Status> {
        let claims = ctx.require_claims()?;

        let tx = self.begin()?;
        let q = tx.querier();

        if q.get_user_by_subject(&claims.subject)
            .status("failed to look up user")?
            .is_some()
        {
            return Err(Status::already_exists("user already exists"));
        }

        let user = new_user(claims);
        q.create_user(&user).map_err(|e| {
            if e.is_unique_violation() {
                Status::already_exists("user already exists")
            } else {
                Status::from(e)
            }
        })?;

        let projects = provision_projects(q, &user, claims)?;
        let first = projects
            .into_iter()
            .next()
            .ok_or_else(|| Status::internal("failed to create user", "no project provisioned"))?;

        commit(ctx, tx)?;
        tracing::info!("Enrolled user {} with project {}", user.subject, first.name);

        Ok(CreateUserResponse {
            id: user.id,
            subject: user.subject,
            project_id: first.id,
            project_name: first.name,
            created_at: user.created_at,
        })
    }

    pub fn get_user(&self, ctx: &CallContext, _req: GetUserRequest) -> Result<GetUserResponse, Status> {
        let claims = ctx.require_claims()?;
        self.user_details(&claims.subject)
    }

    /// The user row with its projects and role bindings.
    pub(super) fn user_details(&self, subject: &str) -> Result<GetUserResponse, Status> {
        let q = self.store.querier();
        let user = q
            .get_user_by_subject(subject)
            .status("failed to get user")?
            .or_not_found("user not found")?;
        let projects = q
            .get_user_projects(&user.id)
            .status("failed to get user projects")?;
        let role_bindings = q
            .get_user_roles(&user.id)
            .status("failed to get user roles")?;
        Ok(GetUserResponse {
            user,
            projects,
            role_bindings,
        })
    }

    /// Removes the caller. Top-level projects nobody else administers go
    /// with them.
    pub fn delete_user(
        &self,
        ctx: &CallContext,
        _req: DeleteUserRequest,
    ) -> Result<DeleteUserResponse, Status> {
        let claims = ctx.require_claims()?;

        let tx = self.begin()?;
        let q = tx.querier();

        let user = q
            .get_user_by_subject(&claims.subject)
            .status("failed to get user")?
            .or_not_found("user not found")?;

        let mut deleted_projects = Vec::new();
        for binding in q.get_user_roles(&user.id).status("failed to get user roles")? {
            let Some(project_id) = binding.project_id.as_deref().filter(|_| binding.is_admin()) else {
                continue;
            };
            let Some(project) = q
                .get_project_by_id(project_id)
                .status("failed to get project")?
            else {
                continue;
            };
            if !project.is_top_level() {
                continue;
            }
            let other_admins = q
                .list_project_role_bindings(project_id)
                .status("failed to list project roles")?
                .iter()
                .any(|b| b.is_admin() && b.user_id != user.id);
            if !other_admins {
                q.delete_project(project_id)
                    .status("failed to delete project")?;
                deleted_projects.push(project.id);
            }
        }

        q.delete_user(&user.id).status("failed to delete user")?;

        commit(ctx, tx)?;
        tracing::info!(
            "Deleted user {} and {} project(s)",
            user.subject,
            deleted_projects.len()
        );
        Ok(DeleteUserResponse { deleted_projects })
    }
}
