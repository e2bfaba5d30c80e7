//! Project tree helpers.
//!
//! Projects form a forest. Cycles are refused when a parent is set; every
//! other walk assumes none exist and stops if it meets one anyway.

use std::collections::HashSet;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Querier;
use crate::types::{Project, ProjectMetadata};

/// Attempts made with a random suffix after the plain name is taken.
pub const NAME_RETRIES: usize = 10;

const MAX_PROJECT_NAME_LEN: usize = 63;

/// Parents of `project_id`, nearest first.
pub fn ancestors(querier: &dyn Querier, project_id: &str) -> Result<Vec<Project>> {
    let mut seen = HashSet::from([project_id.to_string()]);
    let mut chain = Vec::new();

    let mut next = querier
        .get_project_by_id(project_id)?
        .and_then(|p| p.parent_id);
    while let Some(parent_id) = next {
        if !seen.insert(parent_id.clone()) {
            return Err(Error::Internal(format!(
                "project {project_id} has a cyclic ancestry"
            )));
        }
        let Some(parent) = querier.get_project_by_id(&parent_id)? else {
            break;
        };
        next = parent.parent_id.clone();
        chain.push(parent);
    }
    Ok(chain)
}

/// The top-level project `project_id` belongs to.
pub fn root_of(querier: &dyn Querier, project_id: &str) -> Result<Option<Project>> {
    let mut chain = ancestors(querier, project_id)?;
    match chain.pop() {
        Some(root) => Ok(Some(root)),
        None => querier.get_project_by_id(project_id),
    }
}

/// Fails when making `parent_id` the parent of `project_id` would close a loop.
pub fn ensure_no_cycle(querier: &dyn Querier, project_id: &str, parent_id: &str) -> Result<()> {
    if project_id == parent_id
        || ancestors(querier, parent_id)?
            .iter()
            .any(|p| p.id == project_id)
    {
        return Err(Error::Internal(format!(
            "project {parent_id} cannot be a parent of {project_id}"
        )));
    }
    Ok(())
}

/// Turns a free-form name (a display name, an organisation login) into a
/// valid project name.
pub fn project_name_from(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    name = name
        .trim_start_matches(['-', '_', '.'])
        .to_string();
    // Leave room for the collision suffix.
    name.truncate(MAX_PROJECT_NAME_LEN - 5);
    if name.is_empty() {
        name.push_str("project");
    }
    name
}

fn suffixed(base: &str) -> String {
    let suffix: u16 = rand::thread_rng().r#gen();
    format!("{base}-{suffix:04x}")
}

/// Creates a project called `base`, or `base-xxxx` with a random hex suffix
/// when a sibling already has that name.
///
/// Returns `Ok(None)` when every attempt collided.
pub fn create_project_with_unique_name(
    querier: &dyn Querier,
    parent_id: Option<&str>,
    base: &str,
    metadata: ProjectMetadata,
) -> Result<Option<Project>> {
    let mut project = Project {
        id: Uuid::new_v4().to_string(),
        parent_id: parent_id.map(str::to_string),
        name: base.to_string(),
        metadata,
        created_at: Utc::now(),
    };
    if let Some(parent_id) = parent_id {
        ensure_no_cycle(querier, &project.id, parent_id)?;
    }

    for attempt in 0..=NAME_RETRIES {
        if attempt > 0 {
            project.name = suffixed(base);
        }
        match querier.create_project(&project) {
            Ok(()) => return Ok(Some(project)),
            Err(e) if e.is_unique_violation() => {
                tracing::debug!("Project name {} is taken", project.name);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}
