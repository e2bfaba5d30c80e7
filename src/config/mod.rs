mod server;

pub use server::{
    AuthConfig, EventsConfig, InvitationsConfig, MAX_INVITATION_TTL_HOURS, ServerConfig,
};
