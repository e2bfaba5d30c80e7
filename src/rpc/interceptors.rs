//! The interceptor chain every unary call runs through:
//! Authenticate, then Resolve Entity Context, then Authorize.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use super::context::{
    CallContext, EntityContext, HasProjectContext, ProjectRef, ProviderRef, RpcRequest,
};
use super::policy::{PolicyIndex, TargetResource, policy_index};
use crate::auth::{TokenValidator, UserPermissions, bearer_token, resolve_permissions};
use crate::providers::select_provider;
use crate::status::{Status, StoreResultExt};
use crate::store::Store;

/// One stage of the pipeline. A stage either enriches the context or fails
/// the call.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, ctx: &mut CallContext, request: &dyn RpcRequest) -> Result<(), Status>;
}

/// Validates the bearer token and attaches claims and permissions.
pub struct Authenticate {
    validator: Arc<dyn TokenValidator>,
    store: Arc<dyn Store>,
}

impl Authenticate {
    pub fn new(validator: Arc<dyn TokenValidator>, store: Arc<dyn Store>) -> Self {
        Self { validator, store }
    }
}

impl Interceptor for Authenticate {
    fn intercept(&self, ctx: &mut CallContext, _request: &dyn RpcRequest) -> Result<(), Status> {
        let policy = ctx.policy();
        if policy.anonymous {
            return Ok(());
        }

        let token = bearer_token(ctx.metadata()).map_err(|e| {
            tracing::debug!("Rejected credentials for {}: {}", ctx.method(), e);
            Status::unauthenticated("no valid authentication provided")
        })?;
        let claims = self.validator.parse_and_validate(token).map_err(|e| {
            tracing::debug!("Rejected token for {}: {}", ctx.method(), e);
            Status::unauthenticated("invalid auth token")
        })?;

        let permissions = resolve_permissions(self.store.querier(), &claims)
            .status("failed to load user permissions")?;

        if policy.root_admin_only && !permissions.is_superadmin {
            return Err(Status::permission_denied(
                "user is not authorized to perform this operation",
            ));
        }

        ctx.set_claims(claims);
        ctx.set_permissions(permissions);
        Ok(())
    }
}

/// Picks the project and provider a project-scoped call operates on.
pub struct ResolveEntityContext {
    store: Arc<dyn Store>,
}

impl ResolveEntityContext {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Interceptor for ResolveEntityContext {
    fn intercept(&self, ctx: &mut CallContext, request: &dyn RpcRequest) -> Result<(), Status> {
        if ctx.policy().target_resource != TargetResource::Project {
            return Ok(());
        }

        let scoped = request.project_context().ok_or_else(|| {
            Status::internal(
                "cannot resolve request context",
                format!("{} targets a project but its request has no project context", ctx.method()),
            )
        })?;

        let permissions = ctx.require_permissions()?;
        let project_id = resolve_project_id(scoped, permissions)?;

        // Callers outside the project are turned away by Authorize; do not
        // disclose its providers first.
        let member = permissions.is_superadmin || permissions.has_project(&project_id);
        let provider = if member {
            let querier = self.store.querier();
            querier
                .get_project_by_id(&project_id)
                .status("failed to load project")?
                .ok_or_else(|| Status::not_found("project not found"))?;

            if scoped.resolves_provider() {
                let providers = querier
                    .list_providers_by_project_id(&project_id)
                    .status("failed to list providers")?;
                let requested = scoped.context().and_then(|c| c.provider.as_deref());
                select_provider(&providers, requested)?.name.clone()
            } else {
                String::new()
            }
        } else {
            String::new()
        };

        ctx.set_entity_context(EntityContext {
            project: ProjectRef { id: project_id },
            provider: ProviderRef { name: provider },
        });
        Ok(())
    }
}

/// Project id selection: a non-empty v2 id wins; otherwise the v1 id, or the
/// caller's only project when v1 names none.
fn resolve_project_id(
    scoped: &dyn HasProjectContext,
    permissions: &UserPermissions,
) -> Result<String, Status> {
    if let Some(v2) = scoped.context_v2().filter(|c| !c.project_id.is_empty()) {
        return parse_project_id(&v2.project_id);
    }

    let context = scoped
        .context()
        .ok_or_else(|| Status::invalid_argument("context cannot be nil"))?;

    match context.project.as_deref().filter(|p| !p.is_empty()) {
        Some(project) => parse_project_id(project),
        None => match permissions.sole_project() {
            Some(project) => Ok(project.to_string()),
            None => Err(Status::invalid_argument(format!(
                "cannot infer project, there are {} projects available",
                permissions.project_ids.len()
            ))),
        },
    }
}

fn parse_project_id(raw: &str) -> Result<String, Status> {
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| Status::invalid_argument("malformed project ID"))
}

/// Checks the caller may act on the resolved project.
pub struct Authorize;

impl Interceptor for Authorize {
    fn intercept(&self, ctx: &mut CallContext, _request: &dyn RpcRequest) -> Result<(), Status> {
        let policy = ctx.policy();
        if policy.target_resource != TargetResource::Project {
            return Ok(());
        }

        let permissions = ctx.require_permissions()?;
        let entity = ctx.require_entity_context()?;
        authorize_project(permissions, &entity.project.id, policy.owner_only)
    }
}

/// Project access check shared by Authorize and services that re-authorize
/// against a row's own project. Superadmins always pass.
pub fn authorize_project(
    permissions: &UserPermissions,
    project_id: &str,
    owner_only: bool,
) -> Result<(), Status> {
    if permissions.is_superadmin {
        return Ok(());
    }
    if !permissions.has_project(project_id) {
        return Err(Status::permission_denied(
            "user is not authorized to access this project",
        ));
    }
    if owner_only && !permissions.is_admin_on(project_id) {
        return Err(Status::permission_denied(
            "user is not an administrator on this project",
        ));
    }
    Ok(())
}

pub struct Pipeline {
    index: &'static PolicyIndex,
    authenticate: Box<dyn Interceptor>,
    /// Stages that need the decoded request.
    stages: Vec<Box<dyn Interceptor>>,
}

impl Pipeline {
    /// The standard chain: Authenticate, Resolve Entity Context, Authorize.
    pub fn new(validator: Arc<dyn TokenValidator>, store: Arc<dyn Store>) -> Self {
        Self {
            index: policy_index(),
            authenticate: Box::new(Authenticate::new(validator, store.clone())),
            stages: vec![Box::new(ResolveEntityContext::new(store)), Box::new(Authorize)],
        }
    }

    /// Runs the chain, then `handler`. Anonymous methods skip every stage
    /// but still get logged.
    ///
    /// The caller is authenticated before `decode` runs, so a malformed body
    /// from an unauthenticated caller is still `Unauthenticated`.
    pub fn unary<Req, Resp>(
        &self,
        mut ctx: CallContext,
        decode: impl FnOnce() -> Result<Req, Status>,
        handler: impl FnOnce(&CallContext, Req) -> Result<Resp, Status>,
    ) -> Result<Resp, Status>
    where
        Req: RpcRequest,
    {
        let start = Instant::now();
        let policy = self.index.lookup(ctx.method());
        ctx.set_policy(policy);

        let result = self.intercept(&mut ctx, decode, policy.anonymous).and_then(|request| {
            ctx.ensure_active()?;
            handler(&ctx, request)
        });

        if !policy.no_log {
            log_call(ctx.method(), &result, start);
        }
        result
    }

    fn intercept<Req: RpcRequest>(
        &self,
        ctx: &mut CallContext,
        decode: impl FnOnce() -> Result<Req, Status>,
        anonymous: bool,
    ) -> Result<Req, Status> {
        if anonymous {
            return decode();
        }
        ctx.ensure_active()?;
        self.authenticate.intercept(ctx, &())?;

        let request = decode()?;
        for stage in &self.stages {
            ctx.ensure_active()?;
            stage.intercept(ctx, &request)?;
        }
        Ok(request)
    }
}

fn log_call<T>(method: &str, result: &Result<T, Status>, start: Instant) {
    let elapsed = start.elapsed().as_millis();
    match result {
        Ok(_) => tracing::info!("{} ok {}ms", method, elapsed),
        Err(status) => match status.cause() {
            Some(cause) => tracing::error!(
                "{} {} {}ms: {} ({})",
                method,
                status.code(),
                elapsed,
                status.message(),
                cause
            ),
            None => tracing::info!(
                "{} {} {}ms: {}",
                method,
                status.code(),
                elapsed,
                status.message()
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RequestContext, RequestContextV2};
    use crate::status::Code;
    use crate::types::{Role, RoleBinding};

    struct Scoped {
        context: Option<RequestContext>,
        context_v2: Option<RequestContextV2>,
    }

    crate::project_scoped!(Scoped);

    const P1: &str = "00000000-0000-0000-0000-0000000000aa";
    const P2: &str = "00000000-0000-0000-0000-0000000000bb";

    fn perms(projects: &[&str]) -> UserPermissions {
        UserPermissions {
            user_id: Some("u".to_string()),
            project_ids: projects.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn v1(project: Option<&str>) -> Scoped {
        Scoped {
            context: Some(RequestContext {
                project: project.map(str::to_string),
                provider: None,
            }),
            context_v2: None,
        }
    }

    #[test]
    fn test_empty_context_uses_sole_project() {
        let id = resolve_project_id(&v1(None), &perms(&[P1])).unwrap();
        assert_eq!(id, P1);
    }

    #[test]
    fn test_empty_context_with_many_projects_is_ambiguous() {
        let err = resolve_project_id(&v1(None), &perms(&[P1, P2])).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(err.message().contains("there are 2 projects available"));
    }

    #[test]
    fn test_malformed_project_id() {
        let err = resolve_project_id(&v1(Some("not-a-uuid")), &perms(&[P1])).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "malformed project ID");
    }

    #[test]
    fn test_nil_context() {
        let scoped = Scoped {
            context: None,
            context_v2: None,
        };
        let err = resolve_project_id(&scoped, &perms(&[P1])).unwrap_err();
        assert_eq!(err.message(), "context cannot be nil");
    }

    #[test]
    fn test_v2_wins_over_v1() {
        let scoped = Scoped {
            context: Some(RequestContext {
                project: Some(P1.to_string()),
                provider: None,
            }),
            context_v2: Some(RequestContextV2 {
                project_id: P2.to_string(),
            }),
        };
        assert_eq!(resolve_project_id(&scoped, &perms(&[P1, P2])).unwrap(), P2);
    }

    #[test]
    fn test_malformed_v2_fails_even_with_valid_v1() {
        let scoped = Scoped {
            context: Some(RequestContext {
                project: Some(P1.to_string()),
                provider: None,
            }),
            context_v2: Some(RequestContextV2 {
                project_id: "nope".to_string(),
            }),
        };
        let err = resolve_project_id(&scoped, &perms(&[P1])).unwrap_err();
        assert_eq!(err.message(), "malformed project ID");
    }

    #[test]
    fn test_authorize_project_rules() {
        let mut member = perms(&[P1]);
        member.role_bindings.push(RoleBinding {
            user_id: "u".to_string(),
            project_id: Some(P1.to_string()),
            role: Role::Member,
            organization_id: P1.to_string(),
        });

        assert!(authorize_project(&member, P1, false).is_ok());
        assert_eq!(
            authorize_project(&member, P2, false).unwrap_err().code(),
            Code::PermissionDenied
        );
        assert_eq!(
            authorize_project(&member, P1, true).unwrap_err().message(),
            "user is not an administrator on this project"
        );

        let superadmin = UserPermissions {
            is_superadmin: true,
            ..Default::default()
        };
        assert!(authorize_project(&superadmin, P2, true).is_ok());
    }
}
