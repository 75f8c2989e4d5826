//! Credential gates for the query and admin surfaces.
//!
//! Outside production both gates admit everything. In production a missing header is
//! `Unauthorized` and a present-but-wrong one is `Forbidden`.

use crate::config::Environment;
use crate::error::ServiceError;

/// Header carrying the admin credential for ingestion endpoints.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Validates caller and admin credentials against configured secrets.
#[derive(Clone)]
pub struct AuthGate {
    environment: Environment,
    api_key: String,
    admin_api_key: String,
}

impl AuthGate {
    /// Build a gate for the given deployment mode and secrets.
    pub fn new(environment: Environment, api_key: String, admin_api_key: String) -> Self {
        if environment.is_production() && (api_key.is_empty() || admin_api_key.is_empty()) {
            tracing::warn!("Production mode with an empty API secret; matching requests will be forbidden");
        }
        Self {
            environment,
            api_key,
            admin_api_key,
        }
    }

    /// Gate for `/query`, fed from the `X-API-Key` header.
    pub fn check_query_credential(&self, header: Option<&str>) -> Result<(), ServiceError> {
        self.check(header, &self.api_key, "X-API-Key", "Invalid API key")
    }

    /// Gate for `/ingest`, fed from the `X-Admin-Key` header.
    pub fn check_admin_credential(&self, header: Option<&str>) -> Result<(), ServiceError> {
        self.check(header, &self.admin_api_key, "X-Admin-Key", "Invalid Admin key")
    }

    fn check(
        &self,
        header: Option<&str>,
        secret: &str,
        header_name: &str,
        mismatch: &str,
    ) -> Result<(), ServiceError> {
        if !self.environment.is_production() {
            return Ok(());
        }

        let Some(presented) = header.filter(|value| !value.is_empty()) else {
            return Err(ServiceError::Unauthorized(format!(
                "Missing {header_name} header"
            )));
        };

        // An unset secret never matches, even an empty presented value.
        if secret.is_empty() || presented != secret {
            tracing::debug!(header = header_name, "Rejected credential");
            return Err(ServiceError::Forbidden(mismatch.to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production_gate() -> AuthGate {
        AuthGate::new(
            Environment::Production,
            "secret123".into(),
            "admin123".into(),
        )
    }

    #[test]
    fn local_mode_skips_both_gates() {
        let gate = AuthGate::new(Environment::Local, "secret123".into(), "admin123".into());
        assert!(gate.check_query_credential(None).is_ok());
        assert!(gate.check_admin_credential(Some("wrong")).is_ok());
    }

    #[test]
    fn production_missing_header_is_unauthorized() {
        let gate = production_gate();
        assert!(matches!(
            gate.check_query_credential(None),
            Err(ServiceError::Unauthorized(message)) if message.contains("X-API-Key")
        ));
        assert!(matches!(
            gate.check_admin_credential(Some("")),
            Err(ServiceError::Unauthorized(message)) if message.contains("X-Admin-Key")
        ));
    }

    #[test]
    fn production_wrong_header_is_forbidden() {
        let gate = production_gate();
        assert!(matches!(
            gate.check_query_credential(Some("wrongkey")),
            Err(ServiceError::Forbidden(_))
        ));
        // Query and admin secrets are not interchangeable.
        assert!(matches!(
            gate.check_admin_credential(Some("secret123")),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn production_exact_match_is_allowed() {
        let gate = production_gate();
        assert!(gate.check_query_credential(Some("secret123")).is_ok());
        assert!(gate.check_admin_credential(Some("admin123")).is_ok());
    }

    #[test]
    fn unset_secret_never_matches() {
        let gate = AuthGate::new(Environment::Production, String::new(), String::new());
        assert!(matches!(
            gate.check_query_credential(Some("anything")),
            Err(ServiceError::Forbidden(_))
        ));
    }
}
