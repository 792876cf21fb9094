pub mod guards;
pub mod manager;

pub use guards::ConnectionGuard;
pub use manager::{ConnectionError, ConnectionManager};
