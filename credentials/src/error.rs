pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
