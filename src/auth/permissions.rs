use super::Claims;
use crate::error::Result;
use crate::store::Querier;
use crate::types::RoleBinding;

/// What the caller may touch, materialised once per call.
#[derive(Debug, Clone, Default)]
pub struct UserPermissions {
    /// `None` until the caller has enrolled.
    pub user_id: Option<String>,
    pub project_ids: Vec<String>,
    pub role_bindings: Vec<RoleBinding>,
    pub organization_id: Option<String>,
    pub is_superadmin: bool,
}

impl UserPermissions {
    #[must_use]
    pub fn has_project(&self, project_id: &str) -> bool {
        self.project_ids.iter().any(|id| id == project_id)
    }

    #[must_use]
    pub fn is_admin_on(&self, project_id: &str) -> bool {
        self.role_bindings
            .iter()
            .any(|b| b.project_id.as_deref() == Some(project_id) && b.is_admin())
    }

    /// The caller's project when they hold exactly one.
    #[must_use]
    pub fn sole_project(&self) -> Option<&str> {
        match self.project_ids.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// Loads the caller's permissions. A caller without a user row gets an
/// empty set rather than an error.
pub fn resolve_permissions(querier: &dyn Querier, claims: &Claims) -> Result<UserPermissions> {
    let is_superadmin = claims.is_superadmin();

    let Some(user) = querier.get_user_by_subject(&claims.subject)? else {
        return Ok(UserPermissions {
            is_superadmin,
            ..Default::default()
        });
    };

    let projects = querier.get_user_projects(&user.id)?;
    let role_bindings = querier.get_user_roles(&user.id)?;
    let organization_id = role_bindings.first().map(|b| b.organization_id.clone());

    Ok(UserPermissions {
        user_id: Some(user.id),
        project_ids: projects.into_iter().map(|p| p.id).collect(),
        role_bindings,
        organization_id,
        is_superadmin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};
    use crate::types::{Project, ProjectMetadata, Role, User};
    use chrono::Utc;

    fn claims(subject: &str, roles: &[&str]) -> Claims {
        Claims {
            subject: subject.to_string(),
            preferred_username: None,
            forge_id: None,
            realm_roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_unknown_user_gets_empty_permissions() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();

        let perms = resolve_permissions(store.querier(), &claims("nobody", &[])).unwrap();
        assert!(perms.user_id.is_none());
        assert!(perms.project_ids.is_empty());
        assert!(!perms.is_superadmin);

        let admin = resolve_permissions(store.querier(), &claims("root", &["superadmin"])).unwrap();
        assert!(admin.is_superadmin);
    }

    #[test]
    fn test_enrolled_user_sees_bound_projects() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        let q = store.querier();

        q.create_user(&User {
            id: "u-1".to_string(),
            subject: "alice".to_string(),
            display_name: None,
            created_at: Utc::now(),
        })
        .unwrap();
        q.create_project(&Project {
            id: "p-1".to_string(),
            parent_id: None,
            name: "alice".to_string(),
            metadata: ProjectMetadata::default(),
            created_at: Utc::now(),
        })
        .unwrap();
        q.upsert_role_binding(&RoleBinding {
            user_id: "u-1".to_string(),
            project_id: Some("p-1".to_string()),
            role: Role::Admin,
            organization_id: "p-1".to_string(),
        })
        .unwrap();

        let perms = resolve_permissions(q, &claims("alice", &[])).unwrap();
        assert_eq!(perms.user_id.as_deref(), Some("u-1"));
        assert_eq!(perms.sole_project(), Some("p-1"));
        assert!(perms.is_admin_on("p-1"));
        assert!(!perms.is_admin_on("p-2"));
        assert_eq!(perms.organization_id.as_deref(), Some("p-1"));
    }
}
