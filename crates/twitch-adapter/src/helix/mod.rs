//! Helix REST side
//!
//! - [`request`]: timed request executor and query serialization
//! - [`auth`]: credentials and the authorize link
//! - [`client`]: typed wrappers over a slice of Helix endpoints

pub mod auth;
pub mod client;
pub mod request;

pub use auth::{authorize_url, Credentials, ResponseType};
pub use client::{is_not_found, Bare, Empty, HelixClient, Many, One, ResponseShape, SubscriptionFilter};
pub use request::{
    build_url, ExecutorConfig, ParamValue, Params, RequestExecutor, RequestOptions, TimedResponse, DEFAULT_TIMEOUT,
};
