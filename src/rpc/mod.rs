//! RPC plumbing shared by every service: method policy, the per-call
//! context bag and the interceptor pipeline.

mod context;
mod interceptors;
mod policy;

pub use context::{
    CallContext, EntityContext, HasProjectContext, ProjectRef, ProviderRef, RequestContext,
    RequestContextV2, RpcRequest,
};
pub use interceptors::{
    Authenticate, Authorize, Interceptor, Pipeline, ResolveEntityContext, authorize_project,
};
pub use policy::{
    METHODS, MethodDescriptor, PolicyIndex, RpcPolicy, TargetResource, methods, policy_index,
};
