mod connection;
mod manager;

pub use connection::{Endpoint, ProviderConnection};
pub use manager::ToolManager;
