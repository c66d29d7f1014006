//! Custom request extractors.

mod api;
mod bearer;

pub use api::{ApiJson, ApiPath, ApiQuery};
pub use bearer::BearerCredential;
