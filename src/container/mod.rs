//! Sandbox container lifecycle management.

mod engine;
mod error;
mod manager;

pub use engine::{CliEngine, ContainerEngine};
pub use error::{ContainerError, ContainerResult};
pub use manager::ContainerManager;

/// Prefix shared by all sandbox containers managed by this server.
pub const CONTAINER_PREFIX: &str = "playbox-";

/// Derive the stable sandbox container name for an identity.
pub fn container_name(identity: &str) -> String {
    format!("{CONTAINER_PREFIX}{identity}")
}

/// Check that an identity is safe to embed in a container name.
///
/// Container names must be alphanumeric with hyphens and underscores, so
/// anything else in the identity is rejected before it reaches the engine.
pub fn validate_identity(identity: &str) -> ContainerResult<()> {
    if identity.is_empty() || identity.len() > 64 {
        return Err(ContainerError::InvalidIdentity(identity.to_string()));
    }

    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !identity.chars().all(valid) {
        return Err(ContainerError::InvalidIdentity(identity.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_prefixed() {
        assert_eq!(container_name("abc123"), "playbox-abc123");
    }

    #[test]
    fn validate_identity_accepts_safe_names() {
        assert!(validate_identity("user-1").is_ok());
        assert!(validate_identity("a1b2c3d4_e5").is_ok());
        assert!(validate_identity("5f2b8c0e").is_ok());
    }

    #[test]
    fn validate_identity_rejects_unsafe_names() {
        assert!(validate_identity("").is_err());
        assert!(validate_identity("has space").is_err());
        assert!(validate_identity("semi;colon").is_err());
        assert!(validate_identity("dot./slash").is_err());
        assert!(validate_identity(&"x".repeat(65)).is_err());
    }
}
