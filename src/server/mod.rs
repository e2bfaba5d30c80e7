//! JSON gateway in front of the unary pipeline.

mod dispatch;
pub mod response;
mod router;

pub use dispatch::dispatch;
pub use router::{AppState, create_router};
