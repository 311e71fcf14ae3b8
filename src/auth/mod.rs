mod token;

pub use token::TokenVerifier;

/// Identity carried by an admitted connection (the token's `id` claim).
pub type PrincipalId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication error: Token required")]
    MissingToken,
    #[error("Authentication error: Invalid token")]
    InvalidToken,
}
