use chrono::Utc;
use uuid::Uuid;

use super::dto::{
    CreateProjectRequest, DeleteProjectRequest, DeleteProjectResponse, ListChildProjectsRequest,
    ListProjectsRequest, ListProjectsResponse,
};
use super::validation::validate_project_name;
use super::{Services, admin_binding, commit};
use crate::projects::{ensure_no_cycle, root_of};
use crate::rpc::CallContext;
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::types::Project;

impl Services {
    pub fn list_projects(
        &self,
        ctx: &CallContext,
        _req: ListProjectsRequest,
    ) -> Result<ListProjectsResponse, Status> {
        let permissions = ctx.require_permissions()?;
        let projects = match &permissions.user_id {
            Some(user_id) => self
                .store
                .querier()
                .get_user_projects(user_id)
                .status("failed to list projects")?,
            None => Vec::new(),
        };
        Ok(ListProjectsResponse { projects })
    }

    /// Creates a child of the context project; the caller administers it.
    pub fn create_project(
        &self,
        ctx: &CallContext,
        req: CreateProjectRequest,
    ) -> Result<Project, Status> {
        let entity = ctx.require_entity_context()?;
        let permissions = ctx.require_permissions()?;
        validate_project_name(&req.name)?;

        let tx = self.begin()?;
        let q = tx.querier();

        let root = root_of(q, &entity.project.id)
            .status("failed to load project")?
            .or_not_found("project not found")?;

        let project = Project {
            id: Uuid::new_v4().to_string(),
            parent_id: Some(entity.project.id.clone()),
            name: req.name,
            metadata: req.metadata,
            created_at: Utc::now(),
        };
        ensure_no_cycle(q, &project.id, &entity.project.id)
            .status("invalid project parent")?;
        q.create_project(&project).map_err(|e| {
            if e.is_unique_violation() {
                Status::already_exists(format!("project {} already exists", project.name))
            } else {
                Status::from(e)
            }
        })?;

        if let Some(user_id) = &permissions.user_id {
            q.upsert_role_binding(&admin_binding(user_id, &project.id, &root.id))
                .status("failed to grant project role")?;
        }

        commit(ctx, tx)?;
        tracing::info!("Created project {} under {}", project.name, entity.project.id);
        Ok(project)
    }

    pub fn list_child_projects(
        &self,
        ctx: &CallContext,
        req: ListChildProjectsRequest,
    ) -> Result<ListProjectsResponse, Status> {
        let entity = ctx.require_entity_context()?;
        let projects = self
            .store
            .querier()
            .get_children_projects(&entity.project.id, req.recursive)
            .status("failed to list child projects")?;
        Ok(ListProjectsResponse { projects })
    }

    /// Deletes the context project and its descendants. Top-level projects
    /// are only removed along with their last administrator.
    pub fn delete_project(
        &self,
        ctx: &CallContext,
        _req: DeleteProjectRequest,
    ) -> Result<DeleteProjectResponse, Status> {
        let entity = ctx.require_entity_context()?;

        let tx = self.begin()?;
        let q = tx.querier();

        let project = q
            .get_project_by_id(&entity.project.id)
            .status("failed to load project")?
            .or_not_found("project not found")?;
        if project.is_top_level() {
            return Err(Status::failed_precondition(
                "cannot delete a top-level project",
            ));
        }
        q.delete_project(&project.id)
            .status("failed to delete project")?;

        commit(ctx, tx)?;
        tracing::info!("Deleted project {} ({})", project.name, project.id);
        Ok(DeleteProjectResponse {
            project_id: project.id,
        })
    }
}
