//! Maps a fully-qualified method name onto its typed handler.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::AppState;
use crate::rpc::{CallContext, RpcRequest, methods};
use crate::service::Services;
use crate::status::Status;

/// Decodes the request, runs it through the pipeline and encodes the response.
fn run<Req, Resp>(
    state: &AppState,
    ctx: CallContext,
    body: &[u8],
    handler: impl FnOnce(&Services, &CallContext, Req) -> Result<Resp, Status>,
) -> Result<Value, Status>
where
    Req: DeserializeOwned + RpcRequest,
    Resp: Serialize,
{
    let decode = || {
        let body = if body.is_empty() { b"{}".as_slice() } else { body };
        serde_json::from_slice::<Req>(body)
            .map_err(|e| Status::invalid_argument(format!("invalid request: {e}")))
    };
    let services = &state.services;
    let response = state
        .pipeline
        .unary(ctx, decode, |ctx, req| handler(services, ctx, req))?;
    serde_json::to_value(response).map_err(|e| Status::internal("failed to encode response", e))
}

/// Runs `ctx.method()` with a raw JSON body; an empty body is `{}`.
pub fn dispatch(state: &AppState, ctx: CallContext, body: &[u8]) -> Result<Value, Status> {
    let method = ctx.method().to_string();
    match method.as_str() {
        methods::CHECK_HEALTH => run(state, ctx, body, Services::check_health),

        methods::CREATE_USER => run(state, ctx, body, Services::create_user),
        methods::GET_USER => run(state, ctx, body, Services::get_user),
        methods::DELETE_USER => run(state, ctx, body, Services::delete_user),
        methods::RESOLVE_INVITATION => run(state, ctx, body, Services::resolve_invitation),

        methods::LIST_PROJECTS => run(state, ctx, body, Services::list_projects),
        methods::CREATE_PROJECT => run(state, ctx, body, Services::create_project),
        methods::DELETE_PROJECT => run(state, ctx, body, Services::delete_project),
        methods::LIST_CHILD_PROJECTS => run(state, ctx, body, Services::list_child_projects),
        methods::CREATE_INVITATION => run(state, ctx, body, Services::create_invitation),

        methods::LIST_PROVIDERS => run(state, ctx, body, Services::list_providers),
        methods::GET_PROVIDER => run(state, ctx, body, Services::get_provider),

        methods::CREATE_RULE_TYPE => run(state, ctx, body, Services::create_rule_type),
        methods::UPDATE_RULE_TYPE => run(state, ctx, body, Services::update_rule_type),
        methods::DELETE_RULE_TYPE => run(state, ctx, body, Services::delete_rule_type),
        methods::LIST_RULE_TYPES => run(state, ctx, body, Services::list_rule_types),
        methods::GET_RULE_TYPE_BY_NAME => run(state, ctx, body, Services::get_rule_type_by_name),
        methods::GET_RULE_TYPE_BY_ID => run(state, ctx, body, Services::get_rule_type_by_id),

        methods::CREATE_PROFILE => run(state, ctx, body, Services::create_profile),
        methods::UPDATE_PROFILE => run(state, ctx, body, Services::update_profile),
        methods::DELETE_PROFILE => run(state, ctx, body, Services::delete_profile),
        methods::LIST_PROFILES => run(state, ctx, body, Services::list_profiles),
        methods::GET_PROFILE_BY_ID => run(state, ctx, body, Services::get_profile_by_id),
        methods::GET_PROFILE_STATUS_BY_NAME => {
            run(state, ctx, body, Services::get_profile_status_by_name)
        }

        methods::GET_USER_BY_SUBJECT => run(state, ctx, body, Services::get_user_by_subject),

        _ => Err(Status::not_found(format!("unknown method {method}"))),
    }
}
