//! Request signing for the imagery provider.

mod bearer;
mod none;

pub use bearer::{BearerAuth, TOKEN_ENV_VAR};
pub use none::NoAuth;

use crate::error::Result;

/// Adds authentication headers to outgoing provider requests.
pub trait CloudAuth: Send + Sync {
    /// Push auth headers for a request to `url` with `method` into `headers`.
    fn sign_request(
        &self,
        url: &str,
        method: &str,
        headers: &mut Vec<(String, String)>,
    ) -> Result<()>;
}
