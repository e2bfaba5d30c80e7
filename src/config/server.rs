use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQLite database file.
    pub database: PathBuf,
    pub auth: AuthConfig,
    pub events: EventsConfig,
    pub invitations: InvitationsConfig,
}

/// Identity provider settings. Exactly one of `hmac_secret` and `jwks_url`
/// must be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: Option<String>,
    pub hmac_secret: Option<String>,
    pub jwks_url: Option<String>,
    pub jwks_refresh_secs: u64,
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

/// One year.
pub const MAX_INVITATION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvitationsConfig {
    pub ttl_hours: i64,
}

impl ServerConfig {
    /// Reads a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.issuer.is_empty() {
            return Err(Error::Config("auth.issuer must be set".to_string()));
        }
        match (&self.auth.hmac_secret, &self.auth.jwks_url) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(Error::Config(
                    "exactly one of auth.hmac_secret and auth.jwks_url must be set".to_string(),
                ));
            }
        }
        if self.auth.hmac_secret.as_deref().is_some_and(str::is_empty) {
            return Err(Error::Config("auth.hmac_secret cannot be empty".to_string()));
        }
        if self.auth.jwks_refresh_secs == 0 {
            return Err(Error::Config("auth.jwks_refresh_secs must be positive".to_string()));
        }
        if self.events.channel_capacity == 0 {
            return Err(Error::Config("events.channel_capacity must be positive".to_string()));
        }
        if !(1..=MAX_INVITATION_TTL_HOURS).contains(&self.invitations.ttl_hours) {
            return Err(Error::Config(format!(
                "invitations.ttl_hours must be between 1 and {MAX_INVITATION_TTL_HOURS}"
            )));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database: PathBuf::from("./data/bulwark.db"),
            auth: AuthConfig::default(),
            events: EventsConfig::default(),
            invitations: InvitationsConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: None,
            hmac_secret: None,
            jwks_url: None,
            jwks_refresh_secs: 300,
            leeway_secs: 30,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl Default for InvitationsConfig {
    fn default() -> Self {
        Self { ttl_hours: 168 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let config = ServerConfig::from_toml(
            r#"
            host = "0.0.0.0"
            port = 9090
            database = "/var/lib/bulwark/bulwark.db"

            [auth]
            issuer = "https://id.example.com/realms/bulwark"
            audience = "bulwark-server"
            jwks_url = "https://id.example.com/realms/bulwark/certs"

            [events]
            channel_capacity = 16

            [invitations]
            ttl_hours = 24
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_addr().unwrap().port(), 9090);
        assert_eq!(config.auth.audience.as_deref(), Some("bulwark-server"));
        assert_eq!(config.auth.jwks_refresh_secs, 300);
        assert_eq!(config.events.channel_capacity, 16);
        assert_eq!(config.invitations.ttl_hours, 24);
    }

    #[test]
    fn test_defaults_with_shared_secret() {
        let config = ServerConfig::from_toml(
            r#"
            [auth]
            issuer = "https://id.example.com"
            hmac_secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth.leeway_secs, 30);
    }

    #[test]
    fn test_invitation_ttl_is_bounded() {
        let with_ttl = |hours: i64| {
            ServerConfig::from_toml(&format!(
                r#"
                [auth]
                issuer = "https://id.example.com"
                hmac_secret = "s3cret"

                [invitations]
                ttl_hours = {hours}
                "#
            ))
        };
        assert!(with_ttl(MAX_INVITATION_TTL_HOURS).is_ok());
        assert!(matches!(with_ttl(0), Err(Error::Config(_))));
        assert!(matches!(with_ttl(MAX_INVITATION_TTL_HOURS + 1), Err(Error::Config(_))));
        assert!(matches!(with_ttl(i64::MAX), Err(Error::Config(_))));
    }

    #[test]
    fn test_key_source_must_be_unique() {
        let both = r#"
            [auth]
            issuer = "https://id.example.com"
            hmac_secret = "s3cret"
            jwks_url = "https://id.example.com/certs"
        "#;
        assert!(matches!(ServerConfig::from_toml(both), Err(Error::Config(_))));

        let neither = r#"
            [auth]
            issuer = "https://id.example.com"
        "#;
        assert!(matches!(ServerConfig::from_toml(neither), Err(Error::Config(_))));
    }

    #[test]
    fn test_unparseable_config() {
        assert!(matches!(
            ServerConfig::from_toml("port = \"eighty\""),
            Err(Error::Config(_))
        ));
    }
}
