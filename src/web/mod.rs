//! HTTP surface helpers for Cumulus.
//!
//! Maps core errors onto API responses and wraps file and archive streams
//! in response bodies. Routing and authentication live elsewhere.

pub mod error;
pub mod response;

pub use error::ApiError;
pub use response::{
    archive_response, attachment_response, content_disposition_header, inline_response,
    Disposition,
};
