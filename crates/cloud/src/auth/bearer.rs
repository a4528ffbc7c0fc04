//! Static bearer-token authentication.

use crate::auth::CloudAuth;
use crate::error::{CloudError, Result};

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV_VAR: &str = "AQUASAT_API_TOKEN";

/// Attaches `Authorization: Bearer <token>` to every request.
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(CloudError::Auth("empty bearer token".into()));
        }
        Ok(Self { token })
    }

    /// Read the token from [`TOKEN_ENV_VAR`]
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_ENV_VAR)
            .map_err(|_| CloudError::Auth(format!("{} is not set", TOKEN_ENV_VAR)))?;
        Self::new(token)
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth").field("token", &"***").finish()
    }
}

impl CloudAuth for BearerAuth {
    fn sign_request(
        &self,
        _url: &str,
        _method: &str,
        headers: &mut Vec<(String, String)>,
    ) -> Result<()> {
        headers.push(("Authorization".into(), format!("Bearer {}", self.token)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let auth = BearerAuth::new(" abc123 ").unwrap();
        let mut headers = Vec::new();
        auth.sign_request("http://x/process", "POST", &mut headers).unwrap();
        assert_eq!(headers, vec![("Authorization".to_string(), "Bearer abc123".to_string())]);
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(BearerAuth::new("  "), Err(CloudError::Auth(_))));
    }

    #[test]
    fn test_debug_hides_token() {
        let auth = BearerAuth::new("secret").unwrap();
        assert!(!format!("{:?}", auth).contains("secret"));
    }
}
