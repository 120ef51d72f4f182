//! Request transport: the remote document API and its retry contract.

pub mod traits;
pub mod http;
pub mod retrying;

pub use traits::{ListQuery, Transport, TransportError};
pub use http::HttpTransport;
pub use retrying::RetryingTransport;
