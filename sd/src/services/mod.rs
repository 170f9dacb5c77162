//! Remote fetch services consumed by the coordinator

mod config;
mod http;
mod response;

pub use config::ServicesConfig;
pub use http::{HttpService, RemoteService};
pub use response::{ServiceResponse, ServiceResult};
