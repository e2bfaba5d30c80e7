use super::Services;
use super::dto::{GetProviderRequest, ListProvidersRequest, ListProvidersResponse};
use crate::rpc::CallContext;
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::types::Provider;

impl Services {
    pub fn list_providers(
        &self,
        ctx: &CallContext,
        req: ListProvidersRequest,
    ) -> Result<ListProvidersResponse, Status> {
        let entity = ctx.require_entity_context()?;
        let providers = self
            .store
            .querier()
            .find_providers(&entity.project.id, None, req.implements)
            .status("failed to list providers")?;
        Ok(ListProvidersResponse { providers })
    }

    pub fn get_provider(
        &self,
        ctx: &CallContext,
        req: GetProviderRequest,
    ) -> Result<Provider, Status> {
        let entity = ctx.require_entity_context()?;
        self.store
            .querier()
            .get_provider_by_name(&entity.project.id, &req.name)
            .status("failed to get provider")?
            .or_not_found("provider not found")
    }
}
