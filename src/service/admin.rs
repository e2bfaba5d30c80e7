use super::Services;
use super::dto::{CheckHealthRequest, CheckHealthResponse, GetUserBySubjectRequest, GetUserResponse};
use crate::rpc::CallContext;
use crate::status::Status;

impl Services {
    pub fn check_health(
        &self,
        _ctx: &CallContext,
        _req: CheckHealthRequest,
    ) -> Result<CheckHealthResponse, Status> {
        Ok(CheckHealthResponse { status: "OK" })
    }

    /// Superadmin lookup of any enrolled user.
    pub fn get_user_by_subject(
        &self,
        _ctx: &CallContext,
        req: GetUserBySubjectRequest,
    ) -> Result<GetUserResponse, Status> {
        if req.subject.is_empty() {
            return Err(Status::invalid_argument("subject cannot be empty"));
        }
        self.user_details(&req.subject)
    }
}
