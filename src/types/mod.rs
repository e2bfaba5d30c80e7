mod entity;
mod models;
mod role;

pub use entity::{EntityCapabilities, EntityInfo, EntityKind};
pub use models::*;
pub use role::Role;
