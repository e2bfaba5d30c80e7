use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use serde::de::DeserializeOwned;

use super::schema::SCHEMA;
use super::{Querier, Store, Transaction};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Transaction holding the connection for its whole lifetime.
///
/// Started with `BEGIN IMMEDIATE`, so the write lock is taken up front and
/// rows read through it cannot change underneath. Rolled back on drop unless
/// committed.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!("Failed to roll back transaction: {}", e);
        }
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn querier(&self) -> &dyn Querier {
        self
    }

    fn begin_transaction(&self) -> Result<Box<dyn Transaction + '_>> {
        let conn = self.conn();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn querier(&self) -> &dyn Querier {
        self
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Access to a connection, either per statement (the store) or for the
/// lifetime of a transaction.
trait WithConnection {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T>;
}

impl WithConnection for SqliteStore {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn();
        f(&conn)
    }
}

impl WithConnection for SqliteTransaction<'_> {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(&self.conn)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(parse_datetime(&row.get::<_, String>(idx)?))
}

fn enum_column<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{value}'").into(),
        )
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    serde_json::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn query_one<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    conn.query_row(sql, params, map)
        .optional()
        .map_err(Error::from)
}

const USER_COLUMNS: &str = "id, subject, display_name, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        subject: row.get(1)?,
        display_name: row.get(2)?,
        created_at: datetime_column(row, 3)?,
    })
}

const PROJECT_COLUMNS: &str = "p.id, p.parent_id, p.name, p.metadata, p.created_at";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        metadata: json_column(row, 3)?,
        created_at: datetime_column(row, 4)?,
    })
}

const ROLE_BINDING_COLUMNS: &str = "user_id, project_id, role, organization_id";

fn role_binding_from_row(row: &Row<'_>) -> rusqlite::Result<RoleBinding> {
    Ok(RoleBinding {
        user_id: row.get(0)?,
        project_id: row.get(1)?,
        role: enum_column(row, 2, Role::parse)?,
        organization_id: row.get(3)?,
    })
}

const PROVIDER_COLUMNS: &str = "id, project_id, name, class, implements, version, config, created_at";

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        class: enum_column(row, 3, ProviderClass::parse)?,
        implements: json_column(row, 4)?,
        version: row.get(5)?,
        config: row.get(6)?,
        created_at: datetime_column(row, 7)?,
    })
}

const INSTALLATION_COLUMNS: &str =
    "installation_id, organization_login, enrolling_forge_id, project_id, created_at";

fn installation_from_row(row: &Row<'_>) -> rusqlite::Result<PendingInstallation> {
    Ok(PendingInstallation {
        installation_id: row.get(0)?,
        organization_login: row.get(1)?,
        enrolling_forge_id: row.get(2)?,
        project_id: row.get(3)?,
        created_at: datetime_column(row, 4)?,
    })
}

const INVITATION_COLUMNS: &str =
    "code_hash, email, project_id, role, sponsor_id, created_at, expires_at";

fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        code_hash: row.get(0)?,
        email: row.get(1)?,
        project_id: row.get(2)?,
        role: enum_column(row, 3, Role::parse)?,
        sponsor_id: row.get(4)?,
        created_at: datetime_column(row, 5)?,
        expires_at: datetime_column(row, 6)?,
    })
}

const RULE_TYPE_COLUMNS: &str = "id, project_id, provider_name, name, description, definition, guidance, created_at, updated_at";

fn rule_type_from_row(row: &Row<'_>) -> rusqlite::Result<RuleType> {
    Ok(RuleType {
        id: row.get(0)?,
        project_id: row.get(1)?,
        provider_name: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        definition: json_column(row, 5)?,
        guidance: row.get(6)?,
        created_at: datetime_column(row, 7)?,
        updated_at: datetime_column(row, 8)?,
    })
}

const PROFILE_COLUMNS: &str =
    "id, project_id, provider_name, name, remediate, alert, created_at, updated_at";

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        project_id: row.get(1)?,
        provider_name: row.get(2)?,
        name: row.get(3)?,
        remediate: enum_column(row, 4, ActionMode::parse)?,
        alert: enum_column(row, 5, ActionMode::parse)?,
        created_at: datetime_column(row, 6)?,
        updated_at: datetime_column(row, 7)?,
    })
}

const ENTITY_PROFILE_COLUMNS: &str = "id, profile_id, entity, contextual_rules, created_at";

fn entity_profile_from_row(row: &Row<'_>) -> rusqlite::Result<EntityProfile> {
    Ok(EntityProfile {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        entity: enum_column(row, 2, EntityKind::parse)?,
        rules: json_column(row, 3)?,
        created_at: datetime_column(row, 4)?,
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        project_id: row.get(1)?,
        provider_name: row.get(2)?,
        repo_owner: row.get(3)?,
        repo_name: row.get(4)?,
        created_at: datetime_column(row, 5)?,
    })
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get(0)?,
        project_id: row.get(1)?,
        repository_id: row.get(2)?,
        name: row.get(3)?,
        artifact_type: row.get(4)?,
        created_at: datetime_column(row, 5)?,
    })
}

fn rule_evaluation_from_row(row: &Row<'_>) -> rusqlite::Result<RuleEvaluationRow> {
    Ok(RuleEvaluationRow {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        rule_type_id: row.get(2)?,
        rule_type_name: row.get(3)?,
        rule_name: row.get(4)?,
        entity: enum_column(row, 5, EntityKind::parse)?,
        entity_id: row.get(6)?,
        eval_status: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| EvalStatus::parse(&s)),
        eval_details: row.get(8)?,
        eval_last_updated: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_datetime(&s)),
        remediation_status: row.get(10)?,
        remediation_details: row.get(11)?,
        alert_status: row.get(12)?,
        alert_details: row.get(13)?,
    })
}

fn upsert_details(
    conn: &Connection,
    table: &str,
    rule_eval_id: &str,
    status: &str,
    details: &str,
    now: &str,
) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} (rule_eval_id, status, details, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(rule_eval_id) DO UPDATE SET
                status = excluded.status,
                details = excluded.details,
                last_updated = excluded.last_updated"
        ),
        params![rule_eval_id, status, details, now],
    )?;
    Ok(())
}

impl<C: WithConnection> Querier for C {
    // User operations

    fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {USER_COLUMNS} FROM users WHERE subject = ?1"),
                params![subject],
                user_from_row,
            )
        })
    }

    fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
        })
    }

    fn create_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, subject, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id,
                    user.subject,
                    user.display_name,
                    format_datetime(&user.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    fn get_user_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects p
                     JOIN role_bindings rb ON rb.project_id = p.id
                     WHERE rb.user_id = ?1
                     ORDER BY rb.created_at, p.id"
                ),
                params![user_id],
                project_from_row,
            )
        })
    }

    fn get_user_roles(&self, user_id: &str) -> Result<Vec<RoleBinding>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {ROLE_BINDING_COLUMNS} FROM role_bindings
                     WHERE user_id = ?1 ORDER BY created_at, project_id"
                ),
                params![user_id],
                role_binding_from_row,
            )
        })
    }

    // Role binding operations

    fn upsert_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        let project_id = binding
            .project_id
            .as_deref()
            .ok_or_else(|| Error::Internal("role binding without a project".to_string()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO role_bindings (user_id, project_id, role, organization_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, project_id) DO UPDATE SET
                    role = excluded.role,
                    organization_id = excluded.organization_id",
                params![
                    binding.user_id,
                    project_id,
                    binding.role.as_str(),
                    binding.organization_id,
                    format_datetime(&Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_role_binding(&self, user_id: &str, project_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM role_bindings WHERE user_id = ?1 AND project_id = ?2",
                params![user_id, project_id],
            )?;
            Ok(rows > 0)
        })
    }

    fn list_project_role_bindings(&self, project_id: &str) -> Result<Vec<RoleBinding>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {ROLE_BINDING_COLUMNS} FROM role_bindings
                     WHERE project_id = ?1 ORDER BY created_at, user_id"
                ),
                params![project_id],
                role_binding_from_row,
            )
        })
    }

    // Project operations

    fn get_project_by_id(&self, id: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = ?1"),
                params![id],
                project_from_row,
            )
        })
    }

    fn get_project_by_name(&self, parent_id: Option<&str>, name: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects p
                     WHERE COALESCE(p.parent_id, '') = COALESCE(?1, '') AND p.name = ?2"
                ),
                params![parent_id, name],
                project_from_row,
            )
        })
    }

    fn get_children_projects(&self, id: &str, recursive: bool) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            if recursive {
                query_all(
                    conn,
                    &format!(
                        "WITH RECURSIVE descendants(id) AS (
                            SELECT id FROM projects WHERE parent_id = ?1
                            UNION ALL
                            SELECT c.id FROM projects c JOIN descendants d ON c.parent_id = d.id
                         )
                         SELECT {PROJECT_COLUMNS} FROM projects p
                         WHERE p.id IN (SELECT id FROM descendants)
                         ORDER BY p.name"
                    ),
                    params![id],
                    project_from_row,
                )
            } else {
                query_all(
                    conn,
                    &format!(
                        "SELECT {PROJECT_COLUMNS} FROM projects p
                         WHERE p.parent_id = ?1 ORDER BY p.name"
                    ),
                    params![id],
                    project_from_row,
                )
            }
        })
    }

    fn create_project(&self, project: &Project) -> Result<()> {
        let metadata = serde_json::to_string(&project.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, parent_id, name, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project.id,
                    project.parent_id,
                    project.name,
                    metadata,
                    format_datetime(&project.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    // Provider operations

    fn list_providers_by_project_id(&self, project_id: &str) -> Result<Vec<Provider>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {PROVIDER_COLUMNS} FROM providers WHERE project_id = ?1 ORDER BY name"
                ),
                params![project_id],
                provider_from_row,
            )
        })
    }

    fn get_provider_by_name(&self, project_id: &str, name: &str) -> Result<Option<Provider>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE project_id = ?1 AND name = ?2"),
                params![project_id, name],
                provider_from_row,
            )
        })
    }

    fn get_provider_by_id(&self, id: &str) -> Result<Option<Provider>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = ?1"),
                params![id],
                provider_from_row,
            )
        })
    }

    fn create_provider(&self, provider: &Provider) -> Result<()> {
        let implements = serde_json::to_string(&provider.implements)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO providers (id, project_id, name, class, implements, version, config, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    provider.id,
                    provider.project_id,
                    provider.name,
                    provider.class.as_str(),
                    implements,
                    provider.version,
                    provider.config,
                    format_datetime(&provider.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn find_providers(
        &self,
        project_id: &str,
        name: Option<&str>,
        implements: Option<ProviderCapability>,
    ) -> Result<Vec<Provider>> {
        let providers = self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {PROVIDER_COLUMNS} FROM providers
                     WHERE project_id = ?1 AND (?2 IS NULL OR name = ?2)
                     ORDER BY name"
                ),
                params![project_id, name],
                provider_from_row,
            )
        })?;

        Ok(providers
            .into_iter()
            .filter(|p| implements.is_none_or(|cap| p.implements(cap)))
            .collect())
    }

    // Forge app installations

    fn create_pending_installation(&self, installation: &PendingInstallation) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_installations
                    (installation_id, organization_login, enrolling_forge_id, project_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    installation.installation_id,
                    installation.organization_login,
                    installation.enrolling_forge_id,
                    installation.project_id,
                    format_datetime(&installation.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_unclaimed_installations_by_forge_id(
        &self,
        forge_id: &str,
    ) -> Result<Vec<PendingInstallation>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {INSTALLATION_COLUMNS} FROM pending_installations
                     WHERE enrolling_forge_id = ?1 AND project_id IS NULL
                     ORDER BY installation_id"
                ),
                params![forge_id],
                installation_from_row,
            )
        })
    }

    fn claim_installation(&self, installation_id: i64, project_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE pending_installations SET project_id = ?2
                 WHERE installation_id = ?1 AND project_id IS NULL",
                params![installation_id, project_id],
            )?;
            if rows == 0 {
                return Err(Error::NotFound);
            }
            Ok(())
        })
    }

    // Invitation operations

    fn create_invitation(&self, invitation: &Invitation) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO invitations (code_hash, email, project_id, role, sponsor_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    invitation.code_hash,
                    invitation.email,
                    invitation.project_id,
                    invitation.role.as_str(),
                    invitation.sponsor_id,
                    format_datetime(&invitation.created_at),
                    format_datetime(&invitation.expires_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_invitation_by_code_hash(&self, code_hash: &str) -> Result<Option<Invitation>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE code_hash = ?1"),
                params![code_hash],
                invitation_from_row,
            )
        })
    }

    fn delete_invitation(&self, code_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM invitations WHERE code_hash = ?1",
                params![code_hash],
            )?;
            Ok(rows > 0)
        })
    }

    // Rule type operations

    fn create_rule_type(&self, rule_type: &RuleType) -> Result<()> {
        let definition = serde_json::to_string(&rule_type.definition)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rule_types
                    (id, project_id, provider_name, name, description, definition, guidance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rule_type.id,
                    rule_type.project_id,
                    rule_type.provider_name,
                    rule_type.name,
                    rule_type.description,
                    definition,
                    rule_type.guidance,
                    format_datetime(&rule_type.created_at),
                    format_datetime(&rule_type.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn update_rule_type(&self, rule_type: &RuleType) -> Result<()> {
        let definition = serde_json::to_string(&rule_type.definition)?;
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE rule_types SET description = ?2, definition = ?3, guidance = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    rule_type.id,
                    rule_type.description,
                    definition,
                    rule_type.guidance,
                    format_datetime(&rule_type.updated_at),
                ],
            )?;
            if rows == 0 {
                return Err(Error::NotFound);
            }
            Ok(())
        })
    }

    fn delete_rule_type(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM rule_types WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    fn get_rule_type_by_id(&self, id: &str) -> Result<Option<RuleType>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {RULE_TYPE_COLUMNS} FROM rule_types WHERE id = ?1"),
                params![id],
                rule_type_from_row,
            )
        })
    }

    fn get_rule_type_by_name(&self, project_id: &str, name: &str) -> Result<Option<RuleType>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {RULE_TYPE_COLUMNS} FROM rule_types WHERE project_id = ?1 AND name = ?2"
                ),
                params![project_id, name],
                rule_type_from_row,
            )
        })
    }

    fn list_rule_types_by_project(&self, project_id: &str) -> Result<Vec<RuleType>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {RULE_TYPE_COLUMNS} FROM rule_types WHERE project_id = ?1 ORDER BY name"
                ),
                params![project_id],
                rule_type_from_row,
            )
        })
    }

    // Profile operations

    fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles
                    (id, project_id, provider_name, name, remediate, alert, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    profile.id,
                    profile.project_id,
                    profile.provider_name,
                    profile.name,
                    profile.remediate.as_str(),
                    profile.alert.as_str(),
                    format_datetime(&profile.created_at),
                    format_datetime(&profile.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn update_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE profiles SET remediate = ?2, alert = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    profile.id,
                    profile.remediate.as_str(),
                    profile.alert.as_str(),
                    format_datetime(&profile.updated_at),
                ],
            )?;
            if rows == 0 {
                return Err(Error::NotFound);
            }
            Ok(())
        })
    }

    fn delete_profile(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    fn get_profile_by_id(&self, project_id: &str, id: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE project_id = ?1 AND id = ?2"),
                params![project_id, id],
                profile_from_row,
            )
        })
    }

    // SQLite has no row locks; inside a transaction the IMMEDIATE write lock
    // already covers the row.
    fn get_profile_by_id_and_lock(&self, project_id: &str, id: &str) -> Result<Option<Profile>> {
        self.get_profile_by_id(project_id, id)
    }

    fn get_profile_by_name_and_lock(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE project_id = ?1 AND name = ?2"
                ),
                params![project_id, name],
                profile_from_row,
            )
        })
    }

    fn list_profiles_by_project(&self, project_id: &str) -> Result<Vec<Profile>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE project_id = ?1 ORDER BY name"
                ),
                params![project_id],
                profile_from_row,
            )
        })
    }

    // Per-entity rule lists and rule instantiations

    fn list_profile_entities(&self, profile_id: &str) -> Result<Vec<EntityProfile>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {ENTITY_PROFILE_COLUMNS} FROM entity_profiles
                     WHERE profile_id = ?1 ORDER BY entity"
                ),
                params![profile_id],
                entity_profile_from_row,
            )
        })
    }

    fn create_profile_for_entity(&self, entity_profile: &EntityProfile) -> Result<()> {
        let rules = serde_json::to_string(&entity_profile.rules)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entity_profiles (id, profile_id, entity, contextual_rules, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entity_profile.id,
                    entity_profile.profile_id,
                    entity_profile.entity.as_str(),
                    rules,
                    format_datetime(&entity_profile.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn upsert_profile_for_entity(&self, entity_profile: &EntityProfile) -> Result<EntityProfile> {
        let rules = serde_json::to_string(&entity_profile.rules)?;
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO entity_profiles (id, profile_id, entity, contextual_rules, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(profile_id, entity) DO UPDATE SET
                        contextual_rules = excluded.contextual_rules
                     RETURNING {ENTITY_PROFILE_COLUMNS}"
                ),
                params![
                    entity_profile.id,
                    entity_profile.profile_id,
                    entity_profile.entity.as_str(),
                    rules,
                    format_datetime(&entity_profile.created_at),
                ],
                entity_profile_from_row,
            )
            .map_err(Error::from)
        })
    }

    fn delete_profile_for_entity(&self, profile_id: &str, entity: EntityKind) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM entity_profiles WHERE profile_id = ?1 AND entity = ?2",
                params![profile_id, entity.as_str()],
            )?;
            Ok(rows > 0)
        })
    }

    fn upsert_rule_instantiation(&self, entity_profile_id: &str, rule_type_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rule_instantiations (entity_profile_id, rule_type_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_profile_id, rule_type_id) DO NOTHING",
                params![entity_profile_id, rule_type_id, format_datetime(&Utc::now())],
            )?;
            Ok(())
        })
    }

    fn delete_rule_instantiation(
        &self,
        entity_profile_id: &str,
        rule_type_id: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM rule_instantiations WHERE entity_profile_id = ?1 AND rule_type_id = ?2",
                params![entity_profile_id, rule_type_id],
            )?;
            Ok(rows > 0)
        })
    }

    fn list_rule_instantiations(&self, profile_id: &str) -> Result<Vec<RuleInstantiation>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT ri.entity_profile_id, ep.entity, ri.rule_type_id
                 FROM rule_instantiations ri
                 JOIN entity_profiles ep ON ep.id = ri.entity_profile_id
                 WHERE ep.profile_id = ?1
                 ORDER BY ep.entity, ri.rule_type_id",
                params![profile_id],
                |row| {
                    Ok(RuleInstantiation {
                        entity_profile_id: row.get(0)?,
                        entity: enum_column(row, 1, EntityKind::parse)?,
                        rule_type_id: row.get(2)?,
                    })
                },
            )
        })
    }

    fn list_profiles_instantiating_rule_type(&self, rule_type_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT DISTINCT p.name FROM profiles p
                 JOIN entity_profiles ep ON ep.profile_id = p.id
                 JOIN rule_instantiations ri ON ri.entity_profile_id = ep.id
                 WHERE ri.rule_type_id = ?1
                 ORDER BY p.name",
                params![rule_type_id],
                |row| row.get(0),
            )
        })
    }

    // Evaluation status

    fn get_profile_status_by_name_and_project(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<ProfileStatus>> {
        // Worst status wins: error, failure, success, skipped, then pending.
        self.with_conn(|conn| {
            query_one(
                conn,
                "SELECT p.id, p.name,
                    CASE
                        WHEN SUM(de.status = 'error') > 0 THEN 'error'
                        WHEN SUM(de.status = 'failure') > 0 THEN 'failure'
                        WHEN SUM(de.status = 'success') > 0 THEN 'success'
                        WHEN SUM(de.status = 'skipped') > 0 THEN 'skipped'
                        ELSE 'pending'
                    END,
                    MAX(de.last_updated)
                 FROM profiles p
                 LEFT JOIN rule_evaluations re ON re.profile_id = p.id
                 LEFT JOIN rule_details_eval de ON de.rule_eval_id = re.id
                 WHERE p.project_id = ?1 AND p.name = ?2
                 GROUP BY p.id, p.name",
                params![project_id, name],
                |row| {
                    Ok(ProfileStatus {
                        profile_id: row.get(0)?,
                        profile_name: row.get(1)?,
                        status: enum_column(row, 2, EvalStatus::parse)?,
                        last_updated: row
                            .get::<_, Option<String>>(3)?
                            .map(|s| parse_datetime(&s)),
                    })
                },
            )
        })
    }

    fn list_rule_evaluations_by_profile_id(
        &self,
        profile_id: &str,
        filter: &RuleEvaluationFilter,
    ) -> Result<Vec<RuleEvaluationRow>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT re.id, re.profile_id, re.rule_type_id, rt.name, re.rule_name,
                        re.entity, re.entity_id,
                        de.status, de.details, de.last_updated,
                        dr.status, dr.details,
                        da.status, da.details
                 FROM rule_evaluations re
                 LEFT JOIN rule_types rt ON rt.id = re.rule_type_id
                 LEFT JOIN rule_details_eval de ON de.rule_eval_id = re.id
                 LEFT JOIN rule_details_remediate dr ON dr.rule_eval_id = re.id
                 LEFT JOIN rule_details_alert da ON da.rule_eval_id = re.id
                 WHERE re.profile_id = ?1
                   AND (?2 IS NULL OR re.entity = ?2)
                   AND (?3 IS NULL OR re.entity_id = ?3)
                   AND (?4 IS NULL OR re.rule_name = ?4)
                 ORDER BY re.entity, re.entity_id, re.rule_name",
                params![
                    profile_id,
                    filter.entity.map(EntityKind::as_str),
                    filter.entity_id,
                    filter.rule_name,
                ],
                rule_evaluation_from_row,
            )
        })
    }

    fn upsert_rule_evaluation(&self, record: &RuleEvaluationRecord) -> Result<String> {
        let now = format_datetime(&Utc::now());
        self.with_conn(|conn| {
            let id: String = conn.query_row(
                "INSERT INTO rule_evaluations (id, profile_id, rule_type_id, rule_name, entity, entity_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(profile_id, rule_type_id, rule_name, entity, entity_id)
                    DO UPDATE SET rule_name = excluded.rule_name
                 RETURNING id",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    record.profile_id,
                    record.rule_type_id,
                    record.rule_name,
                    record.entity.as_str(),
                    record.entity_id,
                ],
                |row| row.get(0),
            )?;

            upsert_details(
                conn,
                "rule_details_eval",
                &id,
                record.eval_status.as_str(),
                &record.eval_details,
                &now,
            )?;
            if let Some(status) = &record.remediation_status {
                upsert_details(conn, "rule_details_remediate", &id, status, "", &now)?;
            }
            if let Some(status) = &record.alert_status {
                upsert_details(conn, "rule_details_alert", &id, status, "", &now)?;
            }
            Ok(id)
        })
    }

    fn delete_rule_statuses_for_profile_and_rule_type(
        &self,
        profile_id: &str,
        rule_type_id: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM rule_evaluations WHERE profile_id = ?1 AND rule_type_id = ?2",
                params![profile_id, rule_type_id],
            )?;
            Ok(rows)
        })
    }

    // Entities

    fn create_repository(&self, repo: &Repository) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO repositories (id, project_id, provider_name, repo_owner, repo_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    repo.id,
                    repo.project_id,
                    repo.provider_name,
                    repo.repo_owner,
                    repo.repo_name,
                    format_datetime(&repo.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_repository_by_id(&self, id: &str) -> Result<Option<Repository>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                "SELECT id, project_id, provider_name, repo_owner, repo_name, created_at
                 FROM repositories WHERE id = ?1",
                params![id],
                repository_from_row,
            )
        })
    }

    fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO artifacts (id, project_id, repository_id, name, artifact_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    artifact.id,
                    artifact.project_id,
                    artifact.repository_id,
                    artifact.name,
                    artifact.artifact_type,
                    format_datetime(&artifact.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_artifact_by_id(&self, id: &str) -> Result<Option<Artifact>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                "SELECT id, project_id, repository_id, name, artifact_type, created_at
                 FROM artifacts WHERE id = ?1",
                params![id],
                artifact_from_row,
            )
        })
    }
}
