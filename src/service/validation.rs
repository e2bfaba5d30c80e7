use crate::status::Status;

const MAX_PROJECT_NAME_LEN: usize = 63;
const MAX_POLICY_NAME_LEN: usize = 200;

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_period: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_period)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_period {
            allowed.push_str(", and periods");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    if name.starts_with(['-', '_', '.']) {
        return Err(format!(
            "{entity} name cannot start with a hyphen, underscore or period"
        ));
    }
    Ok(())
}

pub fn validate_project_name(name: &str) -> Result<(), Status> {
    validate_name(name, "Project", MAX_PROJECT_NAME_LEN, true).map_err(Status::invalid_argument)
}

pub fn validate_rule_type_name(name: &str) -> Result<(), Status> {
    validate_name(name, "Rule type", MAX_POLICY_NAME_LEN, false).map_err(Status::invalid_argument)
}

pub fn validate_profile_name(name: &str) -> Result<(), Status> {
    validate_name(name, "Profile", MAX_POLICY_NAME_LEN, false).map_err(Status::invalid_argument)
}

pub fn validate_rule_name(name: &str) -> Result<(), Status> {
    validate_name(name, "Rule", MAX_POLICY_NAME_LEN, false).map_err(Status::invalid_argument)
}

pub fn validate_email(email: &str) -> Result<(), Status> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(Status::invalid_argument("invalid email address")),
    }
}
