//! Entity kinds and the per-kind capability table.
//!
//! Everything that differs between entity kinds (the tag stored in the
//! database, how an evaluated entity is described to callers) is looked up in
//! [`EntityKind::capabilities`] instead of matching on the kind at each site.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Querier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Repository,
    Artifact,
    BuildEnvironment,
    PullRequest,
}

/// Descriptive fields attached to an evaluated entity, keyed by field name.
pub type EntityInfo = BTreeMap<String, String>;

pub struct EntityCapabilities {
    pub kind: EntityKind,
    /// Tag used in storage and on the wire.
    pub tag: &'static str,
    /// Fills `info` with fields describing the entity with the given id.
    pub enrich: fn(&dyn Querier, &str, &mut EntityInfo) -> Result<()>,
}

static CAPABILITIES: [EntityCapabilities; 4] = [
    EntityCapabilities {
        kind: EntityKind::Repository,
        tag: "repository",
        enrich: enrich_repository,
    },
    EntityCapabilities {
        kind: EntityKind::Artifact,
        tag: "artifact",
        enrich: enrich_artifact,
    },
    EntityCapabilities {
        kind: EntityKind::BuildEnvironment,
        tag: "build_environment",
        enrich: enrich_nothing,
    },
    EntityCapabilities {
        kind: EntityKind::PullRequest,
        tag: "pull_request",
        enrich: enrich_nothing,
    },
];

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Repository,
        EntityKind::Artifact,
        EntityKind::BuildEnvironment,
        EntityKind::PullRequest,
    ];

    #[must_use]
    pub fn capabilities(self) -> &'static EntityCapabilities {
        match self {
            EntityKind::Repository => &CAPABILITIES[0],
            EntityKind::Artifact => &CAPABILITIES[1],
            EntityKind::BuildEnvironment => &CAPABILITIES[2],
            EntityKind::PullRequest => &CAPABILITIES[3],
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.capabilities().tag
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        CAPABILITIES.iter().find(|c| c.tag == s).map(|c| c.kind)
    }

    /// Describe the entity `entity_id` of this kind.
    pub fn enrich(self, querier: &dyn Querier, entity_id: &str) -> Result<EntityInfo> {
        let mut info = EntityInfo::new();
        (self.capabilities().enrich)(querier, entity_id, &mut info)?;
        Ok(info)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EntityKind::parse(s).ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

fn enrich_repository(querier: &dyn Querier, entity_id: &str, info: &mut EntityInfo) -> Result<()> {
    if let Some(repo) = querier.get_repository_by_id(entity_id)? {
        info.insert("repo_owner".to_string(), repo.repo_owner);
        info.insert("repo_name".to_string(), repo.repo_name);
        info.insert("provider".to_string(), repo.provider_name);
    }
    Ok(())
}

fn enrich_artifact(querier: &dyn Querier, entity_id: &str, info: &mut EntityInfo) -> Result<()> {
    if let Some(artifact) = querier.get_artifact_by_id(entity_id)? {
        info.insert("artifact_name".to_string(), artifact.name);
        info.insert("artifact_type".to_string(), artifact.artifact_type);
    }
    Ok(())
}

fn enrich_nothing(_: &dyn Querier, _: &str, _: &mut EntityInfo) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table_matches_kinds() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.capabilities().kind, kind);
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_tags_match_serde_names() {
        for kind in EntityKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn test_parse_unknown_kind() {
        assert_eq!(EntityKind::parse("container"), None);
        assert!("container".parse::<EntityKind>().is_err());
    }
}
