// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use http::StatusCode;
use std::fmt;
use thiserror::Error;

/// The error type returned by transfers.
///
/// Besides the kind and message it carries what a caller needs to decide
/// whether a retry is worthwhile: the last HTTP status, the service error
/// code and request id, and which parts were left incomplete.
#[derive(Error, Debug)]
#[error("{kind}: {message}{}", self.detail())]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<StatusCode>,
    code: Option<String>,
    request_id: Option<String>,
    failed_parts: Vec<u32>,
    #[source]
    source: Option<anyhow::Error>,
}

/// The kind of error that occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied options or paths that can never work.
    InvalidInput,

    /// The transfer could not be set up: temp file, worker pool, credentials.
    Setup,

    /// Connection reset, timeout or a broken response body.
    Transient,

    /// The service answered with an error status.
    Service,

    /// Some parts are still missing after all passes. The progress record
    /// is kept so the next call resumes.
    PartsFailed,

    /// The assembled data doesn't match what the service reported.
    Integrity,

    /// The progress record could not be written.
    RecordPersist,

    /// Everything else.
    Unexpected,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            request_id: None,
            failed_parts: Vec::new(),
            source: None,
        }
    }

    /// Add a source error
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach the HTTP status of the response that caused this error.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the service error code, like `NoSuchKey`.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the `x-cos-request-id` of the failed request.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach the part numbers that didn't complete.
    pub fn with_failed_parts(mut self, mut parts: Vec<u32>) -> Self {
        parts.sort_unstable();
        self.failed_parts = parts;
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Last known HTTP status.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Service error code.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Service request id.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Part numbers that didn't complete, ascending.
    pub fn failed_parts(&self) -> &[u32] {
        &self.failed_parts
    }

    /// Whether calling the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Transient | ErrorKind::PartsFailed => true,
            ErrorKind::Service => self.status.is_some_and(|s| s.is_server_error()),
            _ => false,
        }
    }

    /// Check if the service reported that the target doesn't exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::Service && self.status == Some(StatusCode::NOT_FOUND)
    }

    fn detail(&self) -> String {
        let mut s = String::new();
        if let Some(status) = self.status {
            s.push_str(&format!(", status: {status}"));
        }
        if let Some(code) = &self.code {
            s.push_str(&format!(", code: {code}"));
        }
        if let Some(request_id) = &self.request_id {
            s.push_str(&format!(", request_id: {request_id}"));
        }
        if !self.failed_parts.is_empty() {
            s.push_str(&format!(", failed_parts: {:?}", self.failed_parts));
        }
        s
    }
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Create a setup error
    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup, message)
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Create a service error for the given status
    pub fn service(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Service, message).with_status(status)
    }

    /// Create a parts failed error
    pub fn parts_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PartsFailed, message)
    }

    /// Create an integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    /// Create a record persist error
    pub fn record_persist(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RecordPersist, message)
    }

    /// Create an unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::Setup => write!(f, "setup failed"),
            ErrorKind::Transient => write!(f, "transient error"),
            ErrorKind::Service => write!(f, "service error"),
            ErrorKind::PartsFailed => write!(f, "parts failed"),
            ErrorKind::Integrity => write!(f, "integrity check failed"),
            ErrorKind::RecordPersist => write!(f, "progress record not persisted"),
            ErrorKind::Unexpected => write!(f, "unexpected error"),
        }
    }
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, Error>;

impl From<coskit_core::Error> for Error {
    fn from(err: coskit_core::Error) -> Self {
        use coskit_core::ErrorKind as Core;

        let kind = match err.kind() {
            Core::Network => ErrorKind::Transient,
            Core::RequestInvalid | Core::ConfigInvalid => ErrorKind::InvalidInput,
            Core::CredentialInvalid | Core::CredentialExpired | Core::CredentialDenied => {
                ErrorKind::Setup
            }
            Core::Unexpected => ErrorKind::Unexpected,
        };
        Self::new(kind, err.message().to_string()).with_source(err)
    }
}

macro_rules! impl_from {
    ($ctor:ident: $($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Self::$ctor(err.to_string()).with_source(anyhow::Error::from(err))
                }
            }
        )+
    };
}

impl_from!(invalid_input:
    http::Error,
    http::header::InvalidHeaderValue,
    http::header::InvalidHeaderName,
);

impl_from!(unexpected:
    std::io::Error,
    serde_json::Error,
    quick_xml::de::DeError,
    quick_xml::se::SeError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_detail() {
        let err = Error::service(StatusCode::NOT_FOUND, "head object failed")
            .with_code("NoSuchKey")
            .with_request_id("NjQ2");
        assert_eq!(
            err.to_string(),
            "service error: head object failed, status: 404 Not Found, code: NoSuchKey, request_id: NjQ2"
        );
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(Error::transient("reset").is_retryable());
        assert!(Error::service(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!Error::service(StatusCode::FORBIDDEN, "").is_retryable());
        assert!(!Error::integrity("crc64 mismatch").is_retryable());

        let err = Error::parts_failed("2 parts failed").with_failed_parts(vec![7, 3]);
        assert!(err.is_retryable());
        assert_eq!(err.failed_parts(), &[3, 7]);
    }

    #[test]
    fn test_from_core() {
        let err: Error = coskit_core::Error::network("connection reset").into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.message(), "connection reset");

        let err: Error = coskit_core::Error::credential_invalid("empty secret").into();
        assert_eq!(err.kind(), ErrorKind::Setup);
    }
}
