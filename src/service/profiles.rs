use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::dto::{
    CreateProfileRequest, DeleteProfileRequest, DeleteProfileResponse, GetProfileByIdRequest,
    GetProfileStatusByNameRequest, GetProfileStatusByNameResponse, ListProfilesRequest,
    ListProfilesResponse, ProfileInput, ProfileView, RuleEvaluationStatus, UpdateProfileRequest,
};
use super::validation::{validate_profile_name, validate_rule_name};
use super::{Services, commit, provider_scope, require_provider};
use crate::events::{ProfileInitEvent, TOPIC_PROFILE_INITIALISED, publish_json};
use crate::rpc::{CallContext, EntityContext};
use crate::schema;
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::store::Querier;
use crate::types::{
    EntityKind, EntityProfile, Profile, RuleEvaluationFilter, RuleEvaluationRow, RuleRef,
};

/// Rule type ids a profile instantiates, per entity kind.
type Instantiations = BTreeMap<EntityKind, BTreeSet<String>>;

/// A profile's rules after every reference was checked against its rule type.
struct ResolvedRules {
    rules: BTreeMap<EntityKind, Vec<RuleRef>>,
    rule_types: Instantiations,
}

/// Checks the profile's own shape: its name and the rule names inside each
/// entity kind.
fn validate_profile(input: &ProfileInput) -> Result<(), Status> {
    validate_profile_name(&input.name)?;

    for (entity, rules) in &input.rules {
        let mut names = HashSet::new();
        for rule in rules {
            if rule.rule_type.is_empty() {
                return Err(Status::invalid_argument(format!(
                    "{entity} rule is missing its rule type"
                )));
            }
            if !rule.name.is_empty() {
                validate_rule_name(&rule.name)?;
            }
            if !names.insert(rule.display_name()) {
                return Err(Status::invalid_argument(format!(
                    "multiple {entity} rules named {}: rules of the same type need distinct names",
                    rule.display_name()
                )));
            }
        }
    }
    Ok(())
}

/// Looks every rule reference up in the profile's `(project, provider)` scope
/// and validates its definition and parameters.
fn resolve_rules(
    q: &dyn Querier,
    entity: &EntityContext,
    input: &ProfileInput,
) -> Result<ResolvedRules, Status> {
    let mut resolved = ResolvedRules {
        rules: BTreeMap::new(),
        rule_types: BTreeMap::new(),
    };

    for (&kind, rules) in &input.rules {
        if rules.is_empty() {
            continue;
        }
        for rule in rules {
            let rule_type = q
                .get_rule_type_by_name(&entity.project.id, &rule.rule_type)
                .status("failed to look up rule type")?
                .filter(|rt| rt.provider_name == entity.provider.name)
                .ok_or_else(|| {
                    Status::invalid_argument(format!("cannot find rule type {}", rule.rule_type))
                })?;

            if rule_type.definition.in_entity != kind.as_str() {
                return Err(Status::invalid_argument(format!(
                    "rule type {} applies to {}, not {kind}",
                    rule_type.name, rule_type.definition.in_entity
                )));
            }

            let def = if rule.def.is_null() {
                Value::Object(Default::default())
            } else {
                rule.def.clone()
            };
            schema::validate(&rule_type.definition.rule_schema, &def).map_err(|e| {
                Status::invalid_argument(format!(
                    "error validating rule {}: invalid definition: {e}",
                    rule_type.name
                ))
            })?;

            if let (Some(param_schema), Some(params)) =
                (&rule_type.definition.param_schema, &rule.params)
            {
                schema::validate(param_schema, params).map_err(|e| {
                    Status::invalid_argument(format!(
                        "error validating rule {}: invalid parameters: {e}",
                        rule_type.name
                    ))
                })?;
            }

            resolved
                .rule_types
                .entry(kind)
                .or_default()
                .insert(rule_type.id);
        }
        resolved.rules.insert(kind, rules.clone());
    }
    Ok(resolved)
}

fn load_view(q: &dyn Querier, profile: Profile) -> Result<ProfileView, Status> {
    let rules = q
        .list_profile_entities(&profile.id)
        .status("failed to load profile rules")?
        .into_iter()
        .map(|ep| (ep.entity, ep.rules))
        .collect();
    Ok(ProfileView { profile, rules })
}

impl Services {
    /// Tells the reconcilers a profile changed. Runs after commit; a failed
    /// publish leaves the profile in place and is only logged.
    fn publish_profile_init(&self, profile: &Profile) {
        let event = ProfileInitEvent {
            provider_name: profile.provider_name.clone(),
            project_id: profile.project_id.clone(),
        };
        publish_json(self.publisher.as_ref(), TOPIC_PROFILE_INITIALISED, &event);
    }

    pub fn create_profile(
        &self,
        ctx: &CallContext,
        req: CreateProfileRequest,
    ) -> Result<ProfileView, Status> {
        let entity = provider_scope(ctx)?;
        let input = req.profile;
        validate_profile(&input)?;

        let tx = self.begin()?;
        let q = tx.querier();
        require_provider(q, entity)?;

        let resolved = resolve_rules(q, entity, &input)?;

        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            project_id: entity.project.id.clone(),
            provider_name: entity.provider.name.clone(),
            name: input.name,
            remediate: input.remediate,
            alert: input.alert,
            created_at: now,
            updated_at: now,
        };
        q.create_profile(&profile).map_err(|e| {
            if e.is_unique_violation() {
                Status::already_exists(format!("profile {} already exists", profile.name))
            } else {
                Status::from(e)
            }
        })?;

        for (&kind, rules) in &resolved.rules {
            let entity_profile = EntityProfile {
                id: Uuid::new_v4().to_string(),
                profile_id: profile.id.clone(),
                entity: kind,
                rules: rules.clone(),
                created_at: now,
            };
            q.create_profile_for_entity(&entity_profile)
                .status("failed to create profile")?;

            for rule_type_id in resolved.rule_types.get(&kind).into_iter().flatten() {
                q.upsert_rule_instantiation(&entity_profile.id, rule_type_id)
                    .status("failed to record rule instantiation")?;
            }
        }

        commit(ctx, tx)?;
        tracing::info!(
            "Created profile {} in project {}",
            profile.name,
            profile.project_id
        );
        self.publish_profile_init(&profile);

        Ok(ProfileView {
            profile,
            rules: resolved.rules,
        })
    }

    pub fn update_profile(
        &self,
        ctx: &CallContext,
        req: UpdateProfileRequest,
    ) -> Result<ProfileView, Status> {
        let entity = provider_scope(ctx)?;
        let input = req.profile;
        validate_profile(&input)?;

        let tx = self.begin()?;
        let q = tx.querier();
        require_provider(q, entity)?;

        let old = match input.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => q.get_profile_by_id_and_lock(&entity.project.id, id),
            None => q.get_profile_by_name_and_lock(&entity.project.id, &input.name),
        }
        .status("failed to load profile")?
        .or_not_found("profile not found")?;

        if old.name != input.name {
            return Err(Status::invalid_argument("cannot change profile name"));
        }
        if old.provider_name != entity.provider.name {
            return Err(Status::invalid_argument("cannot change profile provider"));
        }

        let resolved = resolve_rules(q, entity, &input)?;

        let mut previous: Instantiations = BTreeMap::new();
        for inst in q
            .list_rule_instantiations(&old.id)
            .status("failed to load rule instantiations")?
        {
            previous
                .entry(inst.entity)
                .or_default()
                .insert(inst.rule_type_id);
        }

        let now = Utc::now();
        let profile = Profile {
            remediate: input.remediate,
            alert: input.alert,
            updated_at: now,
            ..old
        };
        q.update_profile(&profile)
            .status("failed to update profile")?;

        for kind in EntityKind::ALL {
            let Some(rules) = resolved.rules.get(&kind) else {
                q.delete_profile_for_entity(&profile.id, kind)
                    .status("failed to update profile")?;
                continue;
            };

            let entity_profile = q
                .upsert_profile_for_entity(&EntityProfile {
                    id: Uuid::new_v4().to_string(),
                    profile_id: profile.id.clone(),
                    entity: kind,
                    rules: rules.clone(),
                    created_at: now,
                })
                .status("failed to update profile")?;

            let wanted = resolved.rule_types.get(&kind);
            for rule_type_id in wanted.into_iter().flatten() {
                q.upsert_rule_instantiation(&entity_profile.id, rule_type_id)
                    .status("failed to record rule instantiation")?;
            }
            for rule_type_id in previous.get(&kind).into_iter().flatten() {
                if !wanted.is_some_and(|w| w.contains(rule_type_id)) {
                    q.delete_rule_instantiation(&entity_profile.id, rule_type_id)
                        .status("failed to remove rule instantiation")?;
                }
            }
        }

        // Evaluations of rules the profile no longer carries are stale.
        for (kind, rule_type_ids) in &previous {
            for rule_type_id in rule_type_ids {
                let kept = resolved
                    .rule_types
                    .get(kind)
                    .is_some_and(|ids| ids.contains(rule_type_id));
                if !kept {
                    q.delete_rule_statuses_for_profile_and_rule_type(&profile.id, rule_type_id)
                        .status("failed to delete rule evaluations")?;
                }
            }
        }

        commit(ctx, tx)?;
        self.publish_profile_init(&profile);

        Ok(ProfileView {
            profile,
            rules: resolved.rules,
        })
    }

    pub fn delete_profile(
        &self,
        ctx: &CallContext,
        req: DeleteProfileRequest,
    ) -> Result<DeleteProfileResponse, Status> {
        let entity = ctx.require_entity_context()?;

        let tx = self.begin()?;
        let q = tx.querier();

        let profile = q
            .get_profile_by_id_and_lock(&entity.project.id, &req.id)
            .status("failed to load profile")?
            .or_not_found("profile not found")?;
        q.delete_profile(&profile.id)
            .status("failed to delete profile")?;

        commit(ctx, tx)?;
        tracing::info!("Deleted profile {} ({})", profile.name, profile.id);
        Ok(DeleteProfileResponse { id: profile.id })
    }

    pub fn list_profiles(
        &self,
        ctx: &CallContext,
        _req: ListProfilesRequest,
    ) -> Result<ListProfilesResponse, Status> {
        let entity = ctx.require_entity_context()?;
        let q = self.store.querier();
        let profiles = q
            .list_profiles_by_project(&entity.project.id)
            .status("failed to list profiles")?
            .into_iter()
            .map(|profile| load_view(q, profile))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListProfilesResponse { profiles })
    }

    pub fn get_profile_by_id(
        &self,
        ctx: &CallContext,
        req: GetProfileByIdRequest,
    ) -> Result<ProfileView, Status> {
        let entity = ctx.require_entity_context()?;
        let q = self.store.querier();
        let profile = q
            .get_profile_by_id(&entity.project.id, &req.id)
            .status("failed to get profile")?
            .or_not_found("profile not found")?;
        load_view(q, profile)
    }

    pub fn get_profile_status_by_name(
        &self,
        ctx: &CallContext,
        req: GetProfileStatusByNameRequest,
    ) -> Result<GetProfileStatusByNameResponse, Status> {
        let entity = ctx.require_entity_context()?;
        if req.entity_id.is_some() && req.entity_kind.is_none() {
            return Err(Status::invalid_argument(
                "entity type must be set when an entity id is given",
            ));
        }

        let q = self.store.querier();
        let profile_status = q
            .get_profile_status_by_name_and_project(&entity.project.id, &req.name)
            .status("failed to get profile status")?
            .or_not_found("profile not found")?;

        let filter = RuleEvaluationFilter {
            entity: req.entity_kind,
            entity_id: req.entity_id.filter(|id| !id.is_empty()),
            rule_name: req.rule_name.filter(|name| !name.is_empty()),
        };
        let rule_evaluation_status = q
            .list_rule_evaluations_by_profile_id(&profile_status.profile_id, &filter)
            .status("failed to list rule evaluations")?
            .into_iter()
            .filter_map(|row| evaluation_status(q, row))
            .collect();

        Ok(GetProfileStatusByNameResponse {
            profile_status,
            rule_evaluation_status,
        })
    }
}

/// Builds the caller's view of one evaluation. Rows missing their rule type
/// or evaluation details are dropped; guidance and entity details are best
/// effort.
fn evaluation_status(q: &dyn Querier, row: RuleEvaluationRow) -> Option<RuleEvaluationStatus> {
    let (Some(rule_type_name), Some(status), Some(last_updated)) =
        (row.rule_type_name, row.eval_status, row.eval_last_updated)
    else {
        return None;
    };

    let guidance = if status.needs_guidance() {
        match q.get_rule_type_by_id(&row.rule_type_id) {
            Ok(rule_type) => rule_type.map(|rt| rt.guidance).unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to load guidance for {}: {}", rule_type_name, e);
                String::new()
            }
        }
    } else {
        String::new()
    };

    let entity_info = row.entity.enrich(q, &row.entity_id).unwrap_or_else(|e| {
        tracing::warn!("Failed to describe {} {}: {}", row.entity, row.entity_id, e);
        Default::default()
    });

    Some(RuleEvaluationStatus {
        profile_id: row.profile_id,
        rule_type_id: row.rule_type_id,
        rule_type_name,
        rule_name: row.rule_name,
        entity: row.entity,
        entity_id: row.entity_id,
        entity_info,
        status,
        details: row.eval_details.unwrap_or_default(),
        last_updated,
        remediation_status: row.remediation_status,
        remediation_details: row.remediation_details,
        alert_status: row.alert_status,
        alert_details: row.alert_details,
        guidance,
    })
}
