use serde::{Deserialize, Serialize};

/// Per-message header preceding every request and response body.
///
/// `seq` is assigned by the client and echoed by the server; `error` is
/// empty on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Target in `Service.Method` form.
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

impl Header {
    /// Creates a request header.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Marks this header as carrying an error response.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
