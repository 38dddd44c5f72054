use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("failed reading {}: {source}", path.display())]
    Ingestion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No candidates found in response")]
    NoCandidates,
    #[error("No image data found in the response parts.")]
    NoImageData,
    #[error("Gemini request failed ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("Gemini returned invalid JSON payload: {0}")]
    InvalidResponse(String),
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY not set")]
    MissingCredential,
    #[error("host environment cannot select a credential")]
    CredentialSelectionUnavailable,
    #[error("failed saving {}: {message}", path.display())]
    Download { path: PathBuf, message: String },
}

impl StudioError {
    /// The service reports a revoked or unknown key as a missing entity.
    pub fn is_authorization_failure(&self) -> bool {
        let text = self.to_string().to_ascii_lowercase();
        text.contains("requested entity was not found") || text.contains("entity not found")
    }
}

#[cfg(test)]
mod tests {
    use super::StudioError;

    #[test]
    fn authorization_failures_are_detected_by_message() {
        let err = StudioError::Api {
            status: 404,
            message: "{\"error\":{\"message\":\"Requested entity was not found.\"}}".to_string(),
        };
        assert!(err.is_authorization_failure());
        assert!(StudioError::Transport("Entity not found".to_string()).is_authorization_failure());
    }

    #[test]
    fn other_failures_are_generic() {
        let err = StudioError::Api {
            status: 500,
            message: "internal".to_string(),
        };
        assert!(!err.is_authorization_failure());
        assert!(!StudioError::NoImageData.is_authorization_failure());
        assert!(!StudioError::NoCandidates.is_authorization_failure());
    }
}
