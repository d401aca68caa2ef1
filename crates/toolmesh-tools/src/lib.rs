pub mod error;
pub mod result;
pub mod schema;

pub use error::ToolError;
pub use result::ResultContent;
pub use schema::{ToolDescriptor, exposed_name};
