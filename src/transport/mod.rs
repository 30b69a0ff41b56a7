//! Request/response plumbing shared by the session manager and the API calls.

pub mod gateway;
pub mod reqwest_transport;
pub mod types;

pub use gateway::HttpGateway;
pub use reqwest_transport::ReqwestTransport;
pub use types::{GatewayResponse, HttpTransport, RawResponse, RequestDescriptor, TransportError};
