//! API token resolution.
//!
//! The backend bearer token can come from three places, checked in order:
//!
//! 1. **Inline** - `apiToken` in the config file, handy for local testing
//! 2. **File** - `apiTokenFile`, e.g. a mounted secret
//! 3. **Environment** - `apiTokenEnvVar`, the name of a variable holding it

use secrecy::SecretString;
use std::path::PathBuf;

/// Error type for token resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Failed to read token file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token file '{0}' is empty")]
    EmptyFile(PathBuf),

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where the API token may be found. Empty strings count as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSources<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Resolves the API token, or `None` when no source is configured.
///
/// A configured source that cannot be read is an error rather than a
/// silent fallback to the next source.
pub fn resolve_api_token(sources: TokenSources<'_>) -> Result<Option<SecretString>> {
    if let Some(value) = present(sources.inline) {
        return Ok(Some(SecretString::from(value.trim().to_string())));
    }

    if let Some(path) = present(sources.file) {
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path).map_err(|e| SecretError::FileReadError {
            path: path.clone(),
            source: e,
        })?;
        let token = content.trim();
        if token.is_empty() {
            return Err(SecretError::EmptyFile(path));
        }
        return Ok(Some(SecretString::from(token.to_string())));
    }

    if let Some(name) = present(sources.env_var) {
        return match std::env::var(name) {
            Ok(value) => Ok(Some(SecretString::from(value.trim().to_string()))),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Ok(None)
}

/// Expands a leading `~` to the current user's home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return match path.strip_prefix("~/") {
                Some(rest) => home.join(rest),
                None => home,
            };
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_no_source_is_none() {
        let token = resolve_api_token(TokenSources::default()).unwrap();
        assert!(token.is_none());
    }

    #[test]
    #[serial]
    fn test_inline_wins() {
        std::env::set_var("HEATWATCH_TEST_TOKEN_1", "from-env");
        let token = resolve_api_token(TokenSources {
            inline: Some("inline"),
            file: None,
            env_var: Some("HEATWATCH_TEST_TOKEN_1"),
        })
        .unwrap()
        .unwrap();
        assert_eq!(token.expose_secret(), "inline");
        std::env::remove_var("HEATWATCH_TEST_TOKEN_1");
    }

    #[test]
    #[serial]
    fn test_file_before_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        std::env::set_var("HEATWATCH_TEST_TOKEN_2", "from-env");

        let token = resolve_api_token(TokenSources {
            inline: Some(""),
            file: file.path().to_str(),
            env_var: Some("HEATWATCH_TEST_TOKEN_2"),
        })
        .unwrap()
        .unwrap();
        assert_eq!(token.expose_secret(), "from-file");
        std::env::remove_var("HEATWATCH_TEST_TOKEN_2");
    }

    #[test]
    #[serial]
    fn test_env_fallback() {
        std::env::set_var("HEATWATCH_TEST_TOKEN_3", "from-env\n");
        let token = resolve_api_token(TokenSources {
            env_var: Some("HEATWATCH_TEST_TOKEN_3"),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
        assert_eq!(token.expose_secret(), "from-env");
        std::env::remove_var("HEATWATCH_TEST_TOKEN_3");
    }

    #[test]
    fn test_missing_env_is_error() {
        let result = resolve_api_token(TokenSources {
            env_var: Some("HEATWATCH_DEFINITELY_UNSET_12345"),
            ..Default::default()
        });
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = resolve_api_token(TokenSources {
            file: Some("/nonexistent/heatwatch/token"),
            ..Default::default()
        });
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_empty_file_is_error() {
        let file = NamedTempFile::new().unwrap();
        let result = resolve_api_token(TokenSources {
            file: file.path().to_str(),
            ..Default::default()
        });
        assert!(matches!(result, Err(SecretError::EmptyFile(_))));
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("/etc/token"), PathBuf::from("/etc/token"));
    }
}
