//! Per-call context and the request-side context messages.
//!
//! Values attached by the interceptors (policy, claims, permissions, entity
//! context) live in an [`http::Extensions`] bag under private key types, so
//! only this module can set them and nothing else can collide with them.

use http::{Extensions, HeaderMap};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::RpcPolicy;
use crate::auth::{Claims, UserPermissions};
use crate::status::Status;

/// Project half of an entity context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub id: String,
}

/// Provider half of an entity context. `name` is empty for requests that do
/// not operate on a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRef {
    pub name: String,
}

/// The `{project, provider}` pair a project-scoped call operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityContext {
    pub project: ProjectRef,
    pub provider: ProviderRef,
}

#[derive(Clone)]
struct PolicyKey(RpcPolicy);

#[derive(Clone)]
struct ClaimsKey(Claims);

#[derive(Clone)]
struct PermissionsKey(UserPermissions);

#[derive(Clone)]
struct EntityKey(EntityContext);

pub struct CallContext {
    method: String,
    metadata: HeaderMap,
    extensions: Extensions,
    cancellation: CancellationToken,
}

impl CallContext {
    pub fn new(method: impl Into<String>, metadata: HeaderMap) -> Self {
        Self {
            method: method.into(),
            metadata,
            extensions: Extensions::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fails with `Cancelled` once the caller has gone away.
    pub fn ensure_active(&self) -> Result<(), Status> {
        if self.cancellation.is_cancelled() {
            return Err(Status::cancelled());
        }
        Ok(())
    }

    pub fn policy(&self) -> RpcPolicy {
        self.extensions
            .get::<PolicyKey>()
            .map(|k| k.0)
            .unwrap_or_default()
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.extensions.get::<ClaimsKey>().map(|k| &k.0)
    }

    pub fn permissions(&self) -> Option<&UserPermissions> {
        self.extensions.get::<PermissionsKey>().map(|k| &k.0)
    }

    pub fn entity_context(&self) -> Option<&EntityContext> {
        self.extensions.get::<EntityKey>().map(|k| &k.0)
    }

    /// Claims of an authenticated call. Handlers behind the pipeline always
    /// have them unless their method is anonymous.
    pub fn require_claims(&self) -> Result<&Claims, Status> {
        self.claims()
            .ok_or_else(|| Status::unauthenticated("authentication required"))
    }

    pub fn require_permissions(&self) -> Result<&UserPermissions, Status> {
        self.permissions()
            .ok_or_else(|| Status::unauthenticated("authentication required"))
    }

    pub fn require_entity_context(&self) -> Result<&EntityContext, Status> {
        self.entity_context().ok_or_else(|| {
            Status::internal(
                "cannot resolve request context",
                format!("no entity context attached to {}", self.method),
            )
        })
    }

    pub(crate) fn set_policy(&mut self, policy: RpcPolicy) {
        self.extensions.insert(PolicyKey(policy));
    }

    pub(crate) fn set_claims(&mut self, claims: Claims) {
        self.extensions.insert(ClaimsKey(claims));
    }

    pub(crate) fn set_permissions(&mut self, permissions: UserPermissions) {
        self.extensions.insert(PermissionsKey(permissions));
    }

    pub(crate) fn set_entity_context(&mut self, entity: EntityContext) {
        self.extensions.insert(EntityKey(entity));
    }
}

/// Context carried by project-scoped requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Newer context message carrying a project id only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContextV2 {
    #[serde(default)]
    pub project_id: String,
}

/// Accessors for the project context a request carries.
pub trait HasProjectContext {
    fn context(&self) -> Option<&RequestContext>;

    fn context_v2(&self) -> Option<&RequestContextV2> {
        None
    }

    /// Whether the call operates on a provider. Requests about the project
    /// itself, or about its provider list, leave the provider unresolved.
    fn resolves_provider(&self) -> bool {
        true
    }
}

/// Implemented by every request the pipeline handles.
pub trait RpcRequest {
    /// The request's project context, when it has the capability.
    fn project_context(&self) -> Option<&dyn HasProjectContext> {
        None
    }
}

/// Stands in for a request that has not been decoded yet.
impl RpcRequest for () {}

/// Implements [`RpcRequest`] and [`HasProjectContext`] for requests with
/// `context` and `context_v2` fields. Prefix the list with
/// `without_provider:` for requests that do not operate on a provider.
#[macro_export]
macro_rules! project_scoped {
    (@impl $ty:ty, $resolves_provider:expr) => {
        impl $crate::rpc::HasProjectContext for $ty {
            fn context(&self) -> Option<&$crate::rpc::RequestContext> {
                self.context.as_ref()
            }

            fn context_v2(&self) -> Option<&$crate::rpc::RequestContextV2> {
                self.context_v2.as_ref()
            }

            fn resolves_provider(&self) -> bool {
                $resolves_provider
            }
        }

        impl $crate::rpc::RpcRequest for $ty {
            fn project_context(&self) -> Option<&dyn $crate::rpc::HasProjectContext> {
                Some(self)
            }
        }
    };
    (without_provider: $($ty:ty),+ $(,)?) => {
        $( $crate::project_scoped!(@impl $ty, false); )+
    };
    ($($ty:ty),+ $(,)?) => {
        $( $crate::project_scoped!(@impl $ty, true); )+
    };
}
