pub mod connection;
pub mod context;
pub mod forwarding;
pub mod handler;
pub mod http_result;
pub mod server;
pub mod synthetic_response;
pub mod transport;

pub use context::RequestContext;
pub use forwarding::Forwarder;
pub use http_result::HttpError;
pub use server::{run, Gateway};
