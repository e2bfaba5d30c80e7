use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::dto::{
    CreateRuleTypeRequest, DeleteRuleTypeRequest, DeleteRuleTypeResponse, GetRuleTypeByIdRequest,
    GetRuleTypeByNameRequest, ListRuleTypesRequest, ListRuleTypesResponse, RuleTypeInput,
    UpdateRuleTypeRequest,
};
use super::validation::validate_rule_type_name;
use super::{Services, commit, provider_scope, require_provider};
use crate::guidance;
use crate::rpc::{CallContext, authorize_project};
use crate::schema;
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::types::{EntityKind, RuleType, RuleTypeDefinition};

/// Static checks shared by create and update.
fn validate_rule_type(input: &RuleTypeInput) -> Result<(), Status> {
    validate_rule_type_name(&input.name)?;
    validate_definition(&input.definition)?;
    guidance::sanitize(input.guidance.as_bytes())
        .map_err(|e| Status::invalid_argument(format!("invalid guidance: {e}")))?;
    Ok(())
}

fn validate_definition(definition: &RuleTypeDefinition) -> Result<(), Status> {
    if EntityKind::parse(&definition.in_entity).is_none() {
        return Err(Status::invalid_argument(format!(
            "unknown entity type: {}",
            definition.in_entity
        )));
    }
    if !definition.rule_schema.is_object() {
        return Err(Status::invalid_argument("rule schema must be an object"));
    }
    schema::check_well_formed(&definition.rule_schema)
        .map_err(|e| Status::invalid_argument(format!("invalid rule schema: {e}")))?;
    if let Some(param_schema) = &definition.param_schema {
        schema::check_well_formed(param_schema)
            .map_err(|e| Status::invalid_argument(format!("invalid parameter schema: {e}")))?;
    }
    if definition.ingest.kind.is_empty() {
        return Err(Status::invalid_argument("ingest type cannot be empty"));
    }
    if definition.eval.kind.is_empty() {
        return Err(Status::invalid_argument("eval type cannot be empty"));
    }
    Ok(())
}

/// Checks an update against the definition profiles were validated with.
fn check_update_compatible(old: &RuleTypeDefinition, new: &RuleTypeDefinition) -> Result<(), Status> {
    schema::check_compatible(&old.rule_schema, &new.rule_schema)
        .map_err(|e| Status::invalid_argument(format!("Rule schema update is invalid: {e}")))?;

    // Without a schema on either side parameters were never validated.
    if let (Some(old_params), Some(new_params)) = (&old.param_schema, &new.param_schema) {
        schema::check_compatible(old_params, new_params).map_err(|e| {
            Status::invalid_argument(format!("Parameter schema update is invalid: {e}"))
        })?;
    }
    Ok(())
}

fn without_empty_param_schema(mut definition: RuleTypeDefinition) -> RuleTypeDefinition {
    if definition.param_schema.as_ref().is_some_and(Value::is_null) {
        definition.param_schema = None;
    }
    definition
}

impl Services {
    pub fn create_rule_type(
        &self,
        ctx: &CallContext,
        req: CreateRuleTypeRequest,
    ) -> Result<RuleType, Status> {
        let entity = provider_scope(ctx)?;
        let input = req.rule_type;
        validate_rule_type(&input)?;

        let tx = self.begin()?;
        let q = tx.querier();
        require_provider(q, entity)?;

        if q.get_rule_type_by_name(&entity.project.id, &input.name)
            .status("failed to look up rule type")?
            .is_some()
        {
            return Err(Status::already_exists(format!(
                "rule type {} already exists",
                input.name
            )));
        }

        let now = Utc::now();
        let rule_type = RuleType {
            id: Uuid::new_v4().to_string(),
            project_id: entity.project.id.clone(),
            provider_name: entity.provider.name.clone(),
            name: input.name,
            description: input.description,
            definition: without_empty_param_schema(input.definition),
            guidance: input.guidance,
            created_at: now,
            updated_at: now,
        };
        q.create_rule_type(&rule_type)
            .status("failed to create rule type")?;

        commit(ctx, tx)?;
        tracing::info!(
            "Created rule type {} in project {}",
            rule_type.name,
            rule_type.project_id
        );
        Ok(rule_type)
    }

    pub fn update_rule_type(
        &self,
        ctx: &CallContext,
        req: UpdateRuleTypeRequest,
    ) -> Result<RuleType, Status> {
        let entity = provider_scope(ctx)?;
        let input = req.rule_type;
        validate_rule_type(&input)?;

        let tx = self.begin()?;
        let q = tx.querier();
        require_provider(q, entity)?;

        let mut rule_type = q
            .get_rule_type_by_name(&entity.project.id, &input.name)
            .status("failed to look up rule type")?
            .or_not_found("rule type not found")?;

        let definition = without_empty_param_schema(input.definition);
        let users = q
            .list_profiles_instantiating_rule_type(&rule_type.id)
            .status("failed to list profiles using rule type")?;
        if !users.is_empty() {
            if rule_type.definition.in_entity != definition.in_entity {
                return Err(Status::failed_precondition(format!(
                    "cannot change the entity type of a rule type used by profiles: {}",
                    users.join(", ")
                )));
            }
            check_update_compatible(&rule_type.definition, &definition)?;
        }

        rule_type.description = input.description;
        rule_type.definition = definition;
        rule_type.guidance = input.guidance;
        rule_type.updated_at = Utc::now();
        q.update_rule_type(&rule_type)
            .status("failed to update rule type")?;

        commit(ctx, tx)?;
        Ok(rule_type)
    }

    pub fn delete_rule_type(
        &self,
        ctx: &CallContext,
        req: DeleteRuleTypeRequest,
    ) -> Result<DeleteRuleTypeResponse, Status> {
        let permissions = ctx.require_permissions()?;

        let tx = self.begin()?;
        let q = tx.querier();

        let rule_type = q
            .get_rule_type_by_id(&req.id)
            .status("failed to look up rule type")?
            .or_not_found("rule type not found")?;

        // The id may name a rule type outside the context project: authorize
        // against the project owning its provider.
        let project_id = match q
            .get_provider_by_name(&rule_type.project_id, &rule_type.provider_name)
            .status("failed to look up provider")?
        {
            Some(provider) => provider.project_id,
            None => rule_type.project_id.clone(),
        };
        authorize_project(permissions, &project_id, false)?;

        let users = q
            .list_profiles_instantiating_rule_type(&rule_type.id)
            .status("failed to list profiles using rule type")?;
        if !users.is_empty() {
            return Err(Status::failed_precondition(format!(
                "cannot delete: rule type {} is used by profiles {}",
                rule_type.name,
                users.join(", ")
            )));
        }

        if !q
            .delete_rule_type(&rule_type.id)
            .status("failed to delete rule type")?
        {
            return Err(Status::not_found("rule type not found"));
        }

        commit(ctx, tx)?;
        tracing::info!("Deleted rule type {} ({})", rule_type.name, rule_type.id);
        Ok(DeleteRuleTypeResponse { id: rule_type.id })
    }

    pub fn list_rule_types(
        &self,
        ctx: &CallContext,
        _req: ListRuleTypesRequest,
    ) -> Result<ListRuleTypesResponse, Status> {
        let entity = ctx.require_entity_context()?;
        let mut rule_types = self
            .store
            .querier()
            .list_rule_types_by_project(&entity.project.id)
            .status("failed to list rule types")?;
        if !entity.provider.name.is_empty() {
            rule_types.retain(|rt| rt.provider_name == entity.provider.name);
        }
        Ok(ListRuleTypesResponse { rule_types })
    }

    pub fn get_rule_type_by_name(
        &self,
        ctx: &CallContext,
        req: GetRuleTypeByNameRequest,
    ) -> Result<RuleType, Status> {
        let entity = ctx.require_entity_context()?;
        self.store
            .querier()
            .get_rule_type_by_name(&entity.project.id, &req.name)
            .status("failed to get rule type")?
            .or_not_found("rule type not found")
    }

    pub fn get_rule_type_by_id(
        &self,
        ctx: &CallContext,
        req: GetRuleTypeByIdRequest,
    ) -> Result<RuleType, Status> {
        let entity = ctx.require_entity_context()?;
        self.store
            .querier()
            .get_rule_type_by_id(&req.id)
            .status("failed to get rule type")?
            .filter(|rt| rt.project_id == entity.project.id)
            .or_not_found("rule type not found")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionConfig;
    use serde_json::json;

    fn definition(rule_schema: Value) -> RuleTypeDefinition {
        RuleTypeDefinition {
            in_entity: "repository".to_string(),
            rule_schema,
            param_schema: None,
            ingest: ActionConfig {
                kind: "rest".to_string(),
                config: Default::default(),
            },
            eval: ActionConfig {
                kind: "jq".to_string(),
                config: Default::default(),
            },
            remediate: None,
            alert: None,
        }
    }

    #[test]
    fn test_definition_rejects_unknown_entity() {
        let mut def = definition(json!({"type": "object"}));
        def.in_entity = "mainframe".to_string();
        let err = validate_definition(&def).unwrap_err();
        assert!(err.message().contains("mainframe"));
    }

    #[test]
    fn test_definition_rejects_malformed_schema() {
        let def = definition(json!({"type": "object", "properties": {"a": {"type": "text"}}}));
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_removed_enum_value_is_incompatible() {
        let old = definition(json!({
            "type": "object",
            "properties": {"severity": {"type": "string", "enum": ["low", "medium", "high"]}}
        }));
        let new = definition(json!({
            "type": "object",
            "properties": {"severity": {"type": "string", "enum": ["medium", "high"]}}
        }));
        let err = check_update_compatible(&old, &new).unwrap_err();
        assert!(err.message().starts_with("Rule schema update is invalid"));
    }

    #[test]
    fn test_parameter_schema_is_checked_separately() {
        let mut old = definition(json!({"type": "object"}));
        old.param_schema = Some(json!({"type": "object", "properties": {"n": {"type": "number"}}}));
        let mut new = old.clone();
        new.param_schema = Some(json!({
            "type": "object",
            "properties": {"n": {"type": "number"}},
            "required": ["n"]
        }));
        let err = check_update_compatible(&old, &new).unwrap_err();
        assert!(err.message().starts_with("Parameter schema update is invalid"));
    }
}
