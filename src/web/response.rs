//! Streamed file responses.

use axum::{
    body::Body,
    http::header,
    response::Response,
};

use super::error::ApiError;
use crate::file::ByteStream;

/// Content-Disposition disposition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Save as a download.
    Attachment,
    /// Display in the browser.
    Inline,
}

impl Disposition {
    fn as_str(&self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
        }
    }
}

/// Generate a safe Content-Disposition header value.
///
/// Control characters are dropped and quotes/backslashes replaced in the
/// plain `filename`; anything non-ASCII is also sent as an RFC 5987
/// `filename*`.
pub fn content_disposition_header(disposition: Disposition, filename: &str) -> String {
    let kind = disposition.as_str();

    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("{kind}; filename=\"{filename}\"");
    }

    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            _ => c,
        })
        .collect();
    let encoded = urlencoding::encode(filename);

    format!("{kind}; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}")
}

fn stream_response(
    disposition: Disposition,
    filename: &str,
    content_type: String,
    stream: ByteStream,
) -> Result<Response, ApiError> {
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(disposition, filename),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}

/// Response that downloads `stream` as `filename`.
pub fn attachment_response(filename: &str, stream: ByteStream) -> Result<Response, ApiError> {
    stream_response(
        Disposition::Attachment,
        filename,
        "application/octet-stream".to_string(),
        stream,
    )
}

/// Response that downloads `stream` as a zip archive named after a directory.
pub fn archive_response(directory: &str, stream: ByteStream) -> Result<Response, ApiError> {
    stream_response(
        Disposition::Attachment,
        &format!("{directory}.zip"),
        "application/zip".to_string(),
        stream,
    )
}

/// Response that shows `stream` inline, typed from the file name.
pub fn inline_response(filename: &str, stream: ByteStream) -> Result<Response, ApiError> {
    let content_type = mime_guess::from_path(filename)
        .first_or_octet_stream()
        .to_string();
    stream_response(Disposition::Inline, filename, content_type, stream)
}
