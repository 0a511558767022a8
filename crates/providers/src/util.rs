//! Shared utility functions for provider adapters.

use kh_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read an API key from `var`. A missing or empty variable yields `None`
/// so keyless local endpoints (Ollama, vLLM) keep working.
pub(crate) fn api_key_from_env(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Some(key),
        _ => {
            tracing::warn!(env_var = %var, "API key env var not set, sending unauthenticated requests");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_env_var_present() {
        let var = "KH_TEST_PROVIDER_KEY_4411";
        std::env::set_var(var, "sk-test");
        assert_eq!(api_key_from_env(var).as_deref(), Some("sk-test"));
        std::env::remove_var(var);
    }

    #[test]
    fn api_key_env_var_missing_or_blank() {
        assert_eq!(api_key_from_env("KH_TEST_PROVIDER_KEY_MISSING_9"), None);
        let var = "KH_TEST_PROVIDER_KEY_BLANK_7";
        std::env::set_var(var, "  ");
        assert_eq!(api_key_from_env(var), None);
        std::env::remove_var(var);
    }
}
