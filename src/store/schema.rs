pub const SCHEMA: &str = r#"
-- Users are created on first login, keyed by the identity provider subject
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Projects form a forest; top-level projects have no parent
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    parent_id TEXT REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT DEFAULT (datetime('now'))
);

-- Names are unique among siblings (and among top-level projects)
CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_sibling_name
    ON projects(COALESCE(parent_id, ''), name);

-- Role a user holds on a project
CREATE TABLE IF NOT EXISTS role_bindings (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, project_id)
);

CREATE INDEX IF NOT EXISTS idx_role_bindings_project ON role_bindings(project_id);

CREATE TABLE IF NOT EXISTS providers (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    class TEXT NOT NULL,
    implements TEXT NOT NULL DEFAULT '[]',  -- JSON array of capabilities
    version TEXT NOT NULL,
    config BLOB NOT NULL DEFAULT x'',
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(project_id, name)
);

-- Forge app installations waiting for their installer to log in
CREATE TABLE IF NOT EXISTS pending_installations (
    installation_id INTEGER PRIMARY KEY,
    organization_login TEXT NOT NULL,
    enrolling_forge_id TEXT NOT NULL,
    project_id TEXT REFERENCES projects(id) ON DELETE SET NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pending_installations_forge_id
    ON pending_installations(enrolling_forge_id);

CREATE TABLE IF NOT EXISTS invitations (
    code_hash TEXT PRIMARY KEY,  -- sha256 of the invitation code
    email TEXT NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    sponsor_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_types (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    provider_name TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    definition TEXT NOT NULL,  -- JSON
    guidance TEXT NOT NULL DEFAULT '',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE(project_id, name)
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    provider_name TEXT NOT NULL,
    name TEXT NOT NULL,
    remediate TEXT NOT NULL DEFAULT 'unset',
    alert TEXT NOT NULL DEFAULT 'unset',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE(project_id, name)
);

-- Rule list of a profile for one entity kind
CREATE TABLE IF NOT EXISTS entity_profiles (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    entity TEXT NOT NULL,
    contextual_rules TEXT NOT NULL,  -- JSON array of rules
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(profile_id, entity)
);

-- Which rule types a per-entity rule list uses; blocks rule type deletion.
-- NO ACTION is checked at the end of the statement, so deleting a whole
-- project (profiles and rule types together) still cascades.
CREATE TABLE IF NOT EXISTS rule_instantiations (
    entity_profile_id TEXT NOT NULL REFERENCES entity_profiles(id) ON DELETE CASCADE,
    rule_type_id TEXT NOT NULL REFERENCES rule_types(id) ON DELETE NO ACTION,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (entity_profile_id, rule_type_id)
);

CREATE INDEX IF NOT EXISTS idx_rule_instantiations_rule_type
    ON rule_instantiations(rule_type_id);

CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    provider_name TEXT NOT NULL,
    repo_owner TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(project_id, repo_owner, repo_name)
);

CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    repository_id TEXT REFERENCES repositories(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

-- One row per (profile, rule, entity) evaluated
CREATE TABLE IF NOT EXISTS rule_evaluations (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    rule_type_id TEXT NOT NULL REFERENCES rule_types(id) ON DELETE CASCADE,
    rule_name TEXT NOT NULL,
    entity TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    UNIQUE(profile_id, rule_type_id, rule_name, entity, entity_id)
);

CREATE TABLE IF NOT EXISTS rule_details_eval (
    rule_eval_id TEXT PRIMARY KEY REFERENCES rule_evaluations(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_details_remediate (
    rule_eval_id TEXT PRIMARY KEY REFERENCES rule_evaluations(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rule_details_alert (
    rule_eval_id TEXT PRIMARY KEY REFERENCES rule_evaluations(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    last_updated TEXT NOT NULL
);
"#;
