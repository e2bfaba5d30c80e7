//! The RPC services behind the pipeline.
//!
//! Every handler takes the [`CallContext`] the pipeline produced and a typed
//! request, and returns a typed response or a [`Status`]. Multi-row writes run
//! in one store transaction that is committed last; dropping it on an early
//! return rolls it back.

mod admin;
pub mod dto;
mod invitations;
mod profiles;
mod projects;
mod providers;
mod ruletypes;
mod users;
pub mod validation;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::{Claims, UserPermissions};
use crate::events::EventPublisher;
use crate::rpc::{CallContext, EntityContext};
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::store::{Querier, Store, Transaction};
use crate::types::{Role, RoleBinding, User};

pub use invitations::hash_code;
pub use users::FORGE_APP_PROVIDER_NAME;

/// Default lifetime of an invitation code.
pub const DEFAULT_INVITATION_TTL_HOURS: i64 = 168;

pub struct Services {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    invitation_ttl: Duration,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            invitation_ttl: Duration::hours(DEFAULT_INVITATION_TTL_HOURS),
        }
    }

    #[must_use]
    pub fn with_invitation_ttl(mut self, ttl: Duration) -> Self {
        self.invitation_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, Status> {
        self.store
            .begin_transaction()
            .status("failed to begin transaction")
    }
}

/// Commits `tx` unless the call was cancelled, in which case dropping it
/// rolls the work back.
fn commit(ctx: &CallContext, tx: Box<dyn Transaction + '_>) -> Result<(), Status> {
    ctx.ensure_active()?;
    tx.commit().status("failed to commit transaction")
}

/// The entity context with a provider, for operations scoped to one.
fn provider_scope(ctx: &CallContext) -> Result<&EntityContext, Status> {
    let entity = ctx.require_entity_context()?;
    if entity.provider.name.is_empty() {
        return Err(Status::internal(
            "cannot resolve request context",
            format!("{} needs a provider but none was resolved", ctx.method()),
        ));
    }
    Ok(entity)
}

/// The resolved provider may have been deleted since the call was resolved.
fn require_provider(q: &dyn Querier, entity: &EntityContext) -> Result<(), Status> {
    q.get_provider_by_name(&entity.project.id, &entity.provider.name)
        .status("failed to look up provider")?
        .or_not_found("provider not found")?;
    Ok(())
}

fn enrolled_user_id(permissions: &UserPermissions) -> Result<&str, Status> {
    permissions
        .user_id
        .as_deref()
        .ok_or_else(|| Status::failed_precondition("user is not enrolled, call CreateUser first"))
}

fn admin_binding(user_id: &str, project_id: &str, organization_id: &str) -> RoleBinding {
    RoleBinding {
        user_id: user_id.to_string(),
        project_id: Some(project_id.to_string()),
        role: Role::Admin,
        organization_id: organization_id.to_string(),
    }
}

fn new_user(claims: &Claims) -> User {
    User {
        id: Uuid::new_v4().to_string(),
        subject: claims.subject.clone(),
        display_name: claims.preferred_username.clone(),
        created_at: Utc::now(),
    }
}
