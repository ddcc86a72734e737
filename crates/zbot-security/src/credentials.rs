use tracing::debug;
use zbot_common::{Error, Result};

/// Environment variable holding the OpenAI API key.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Read the OpenAI API key from the environment.
pub fn resolve_openai_key() -> Result<String> {
    key_from(std::env::var(OPENAI_API_KEY_VAR).ok())
}

fn key_from(raw: Option<String>) -> Result<String> {
    let key = raw.as_deref().map(str::trim).unwrap_or_default();
    if key.is_empty() {
        return Err(Error::Config(format!(
            "missing {OPENAI_API_KEY_VAR}. Set it then re-run:\n  export {OPENAI_API_KEY_VAR}='sk-proj-...'"
        )));
    }
    debug!("resolved {OPENAI_API_KEY_VAR} ({} chars)", key.len());
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_trimmed() {
        assert_eq!(key_from(Some("  sk-test \n".into())).unwrap(), "sk-test");
    }

    #[test]
    fn missing_key_is_config_error() {
        let err = key_from(None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("export OPENAI_API_KEY"));
    }

    #[test]
    fn blank_key_is_config_error() {
        assert!(key_from(Some("   ".into())).is_err());
    }
}
