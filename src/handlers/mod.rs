//! In-process download backends
//!
//! A handler claims URLs it knows how to fetch and runs the transfer inside
//! this process, keeping its own active/completed job table. The registry
//! dispatches each submitted URL to the first handler that accepts it; URLs
//! nobody claims go to the external engine instead.

mod http;
mod media;
mod registry;
mod traits;
mod types;

pub use http::HttpHandler;
pub use media::MediaHandler;
pub use registry::HandlerRegistry;
pub use traits::{HandlerError, UrlHandler};
pub use types::{
    CompletedTransfer, JobTable, ProbeInfo, TransferSnapshot, STATUS_CANCELLED,
    STATUS_DOWNLOADING, STATUS_ERROR,
};
