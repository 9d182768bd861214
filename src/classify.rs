//! Request failure classification
//!
//! Normalises a [`RequestError`] into a short message for the node status and a
//! long message for the log. Transport failures are keyed by their error code,
//! protocol failures by their HTTP status.
//!
//! # Example
//!
//! ```ignore
//! let info = error_msg(&RequestError::transport_from("ETIMEDOUT", "connect"));
//! assert_eq!(info.short_msg, "Timeout");
//! assert_eq!(info.long_msg, "Timeout. Error code: ETIMEDOUT from system call \"connect\"");
//! ```

use crate::device::RequestError;
use crate::nodes::NodeHost;
use crate::types::{FlowMessage, NodeStatus};
use serde::Serialize;

/// Broad origin of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transport,
    Protocol,
    Other,
}

/// A classified failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Shown in the node status
    pub short_msg: String,
    /// Written to the log
    pub long_msg: String,
    pub class: ErrorClass,
}

impl ErrorInfo {
    fn new(short_msg: impl Into<String>, long_msg: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            short_msg: short_msg.into(),
            long_msg: long_msg.into(),
            class,
        }
    }
}

const TRANSPORT_MESSAGES: &[(&str, &str)] = &[
    ("ETIMEDOUT", "Timeout"),
    ("ESOCKETTIMEDOUT", "Timeout"),
    ("ENOTFOUND", "Address not found"),
    ("EAI_AGAIN", "Address not found"),
    ("ECONNREFUSED", "Connection refused"),
    ("ECONNRESET", "Connection reset"),
    ("EHOSTUNREACH", "Host unreachable"),
    ("ENETUNREACH", "Network unreachable"),
    ("EHOSTDOWN", "Host down"),
    ("EPIPE", "Connection closed"),
    ("DEPTH_ZERO_SELF_SIGNED_CERT", "Bad certificate"),
    ("SELF_SIGNED_CERT_IN_CHAIN", "Bad certificate"),
    ("UNABLE_TO_VERIFY_LEAF_SIGNATURE", "Bad certificate"),
    ("CERT_HAS_EXPIRED", "Certificate expired"),
    ("ERR_TLS_CERT_ALTNAME_INVALID", "Certificate name mismatch"),
];

const STATUS_MESSAGES: &[(&str, &str)] = &[
    ("400", "Bad request"),
    ("401", "Bad API key"),
    ("403", "Forbidden"),
    ("404", "Not found"),
    ("405", "Method not allowed"),
    ("408", "Request timeout"),
    ("409", "Conflict"),
    ("429", "Too many requests"),
    ("500", "Bad API key or server error"),
    ("502", "Bad gateway"),
    ("503", "Service unavailable"),
    ("504", "Gateway timeout"),
];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Messages for a transport failure code
pub fn transport_error_msg(code: &str, syscall: Option<&str>) -> ErrorInfo {
    let suffix = syscall
        .map(|s| format!(" from system call \"{}\"", s))
        .unwrap_or_default();

    match lookup(TRANSPORT_MESSAGES, code) {
        Some(short) => ErrorInfo::new(
            short,
            format!("{}. Error code: {}{}", short, code, suffix),
            ErrorClass::Transport,
        ),
        None => ErrorInfo::new(
            code,
            format!("Error code: {}{}", code, suffix),
            ErrorClass::Transport,
        ),
    }
}

/// Messages for an HTTP status code
pub fn status_code_msg(code: &str) -> ErrorInfo {
    let short = match lookup(STATUS_MESSAGES, code) {
        Some(short) => short.to_string(),
        None => format!("Status code {}", code),
    };
    let long = format!("{}. HTTP response error : {}", short, code);
    ErrorInfo::new(short, long, ErrorClass::Protocol)
}

/// Classify any request failure
pub fn error_msg(error: &RequestError) -> ErrorInfo {
    match error {
        RequestError::Transport { code, syscall } => transport_error_msg(code, syscall.as_deref()),
        RequestError::Protocol { status, .. } => status_code_msg(&status.to_string()),
        RequestError::Reason(reason) => {
            ErrorInfo::new(reason.as_str(), format!("Error: {}", reason), ErrorClass::Other)
        }
        RequestError::Opaque => ErrorInfo::new("Error", "Error", ErrorClass::Other),
    }
}

/// Surface a failed request on a node
///
/// Always sets a red dot status with the short message. The long message is
/// logged through the host only when it differs from `previous`, so a device
/// that keeps failing the same way logs once. Returns the new error to be
/// passed back in as `previous` next time.
pub fn handle_error_response(
    error: &RequestError,
    context: &FlowMessage,
    host: &dyn NodeHost,
    previous: Option<&ErrorInfo>,
) -> ErrorInfo {
    let info = error_msg(error);

    host.set_status(NodeStatus::error(info.short_msg.clone()));

    if previous != Some(&info) {
        let mut logged = context.clone();
        match error {
            RequestError::Transport { .. } => logged.insert("reqError", error.to_json()),
            RequestError::Protocol { .. } => logged.insert("resError", error.to_json()),
            _ => {}
        }
        tracing::error!("{}", info.long_msg);
        host.error(&info.long_msg, Some(&logged));
    }

    info
}
