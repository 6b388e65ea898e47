#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid coordinates ({latitude}, {longitude}): latitude must be within [-90, 90] and longitude within [-180, 180]")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("Weather source unavailable after {attempts} attempt(s): {last_error}")]
    SourceUnavailable {
        attempts: usize,
        #[source]
        last_error: Box<FetchError>,
    },
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Archive API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to parse archive response: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Failed to parse date/time: {0}")]
    DateTimeError(String),
}

impl FetchError {
    /// Transport and HTTP status failures are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Request(_) | FetchError::Status { .. })
    }
}
