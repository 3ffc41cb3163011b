use thiserror::Error;

/// Terminal call failures. The `Display` text is what the widget shows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("No ISP Configuration Selected")]
    NoProfile,

    #[error("API Key missing")]
    MissingCredential,

    #[error("Microphone Access Failed")]
    Microphone,

    #[error("Failed to connect to AI Support")]
    Connect,

    #[error("Connection Error")]
    Transport,

    #[error("Connection timed out")]
    Timeout,
}

impl CallError {
    /// Precondition failures are detected before any device is touched.
    pub fn is_precondition(&self) -> bool {
        matches!(self, CallError::NoProfile | CallError::MissingCredential)
    }
}
