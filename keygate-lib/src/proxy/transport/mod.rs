pub mod plain;

pub use plain::handle_plain_connection;
