use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// A signed-in user as handed over by the identity provider. Only the roles matter here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub subject: String,
    pub email: Option<String>,
    pub roles: BTreeSet<String>,
}

impl AuthUser {
    pub fn new(subject: &str, roles: &[&str]) -> Self {
        Self {
            subject: subject.to_string(),
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Builds a user from decoded ID-token claims. Roles live under a namespaced custom claim.
    pub fn from_claims(claims: &Value, roles_claim: &str) -> Result<Self> {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Unauthorized("Token has no subject".into()))?;
        let roles = claims
            .get(roles_claim)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            subject: subject.to_string(),
            email: claims.get("email").and_then(Value::as_str).map(str::to_string),
            roles,
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Name recorded on reviews.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.subject)
    }
}

pub fn require_role<'a>(user: Option<&'a AuthUser>, role: &str) -> Result<&'a AuthUser> {
    let user = user.ok_or_else(|| Error::Unauthorized("Sign-in required".into()))?;
    if !user.has_role(role) {
        log::warn!("User {} lacks role '{}'", user.subject, role);
        return Err(Error::Unauthorized(format!("Role '{role}' required")));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CLAIM: &str = "https://ostsee-sichtungen.de/roles";

    #[test]
    fn roles_come_from_the_namespaced_claim() {
        let claims = json!({
            "sub": "auth0|123",
            "email": "pruefer@example.org",
            CLAIM: ["admin", "reviewer"]
        });
        let user = AuthUser::from_claims(&claims, CLAIM).unwrap();
        assert!(user.has_role("admin"));
        assert_eq!(user.display_name(), "pruefer@example.org");
    }

    #[test]
    fn missing_roles_claim_means_no_roles() {
        let user = AuthUser::from_claims(&json!({"sub": "auth0|9"}), CLAIM).unwrap();
        assert!(user.roles.is_empty());
        assert!(AuthUser::from_claims(&json!({}), CLAIM).is_err());
    }

    #[test]
    fn require_role_rejects_anonymous_and_unprivileged() {
        let reporter = AuthUser::new("auth0|1", &["reporter"]);
        let admin = AuthUser::new("auth0|2", &["admin"]);
        assert!(matches!(require_role(None, "admin"), Err(Error::Unauthorized(_))));
        assert!(matches!(require_role(Some(&reporter), "admin"), Err(Error::Unauthorized(_))));
        assert_eq!(require_role(Some(&admin), "admin").unwrap().subject, "auth0|2");
    }
}
