//! Handshake-time authentication and workspace resolution.
//!
//! The session bridge only consumes the results of this boundary: a verified
//! identity, a resolved workspace directory, and an allow/deny decision. The
//! wider account machinery (signup, token issuance, permissions storage)
//! lives outside this server.

use std::path::PathBuf;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::container::validate_identity;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing access token")]
    MissingToken,

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("access denied: {0}")]
    Forbidden(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Verifies HS256 access tokens and extracts the subject identity.
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate the token and return the identity it carries.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;

        let identity = data.claims.sub;
        validate_identity(&identity)
            .map_err(|_| AuthError::InvalidToken(format!("unsafe subject {identity:?}")))?;
        Ok(identity)
    }
}

/// Maps (identity, project) to the sandbox's bind-mounted host directory.
///
/// The project ownership check itself happens upstream; this boundary only
/// refuses requests whose parameters could escape the projects root.
pub struct WorkspaceResolver {
    projects_root: PathBuf,
}

impl WorkspaceResolver {
    pub fn new(projects_root: PathBuf) -> Self {
        Self { projects_root }
    }

    pub fn resolve(&self, identity: &str, project: &str) -> Result<PathBuf, AuthError> {
        if project.is_empty() || !project.chars().all(safe_path_char) {
            return Err(AuthError::Forbidden(format!(
                "invalid project identifier {project:?}"
            )));
        }
        validate_identity(identity)
            .map_err(|_| AuthError::Forbidden(format!("invalid identity {identity:?}")))?;
        Ok(self.projects_root.join(identity))
    }
}

fn safe_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}
