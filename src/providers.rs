//! Provider selection for a resolved project.

use crate::error::Result;
use crate::status::Status;
use crate::store::Querier;
use crate::types::Provider;

/// Picks the provider a call operates on.
///
/// An explicit name must match exactly one provider. Without a name the
/// project must have exactly one provider; the count is reported otherwise.
pub fn select_provider<'a>(
    providers: &'a [Provider],
    requested: Option<&str>,
) -> std::result::Result<&'a Provider, Status> {
    match requested.filter(|name| !name.is_empty()) {
        Some(name) => {
            let mut matches = providers.iter().filter(|p| p.name == name);
            match (matches.next(), matches.next()) {
                (Some(provider), None) => Ok(provider),
                _ => Err(Status::invalid_argument("invalid provider name")),
            }
        }
        None => match providers {
            [only] => Ok(only),
            _ => Err(Status::invalid_argument(format!(
                "cannot infer provider, there are {} providers available",
                providers.len()
            ))),
        },
    }
}

/// Outcome of looking a provider up by name when the caller may create it.
#[derive(Debug)]
pub enum ProviderLookup {
    Found(Provider),
    /// No provider by that name; the caller should provision one.
    Provision,
}

/// Used by enrolment paths that create providers: a missing provider is a
/// provisioning path, not an error.
pub fn lookup_provider(
    querier: &dyn Querier,
    project_id: &str,
    name: &str,
) -> Result<ProviderLookup> {
    Ok(match querier.get_provider_by_name(project_id, name)? {
        Some(provider) => ProviderLookup::Found(provider),
        None => ProviderLookup::Provision,
    })
}
