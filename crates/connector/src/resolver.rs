use std::env;

use crate::error::ResolverError;
use crate::traits::KeyResolver;

/// Resolves credentials from environment variables
pub struct EnvResolver;

impl EnvResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyResolver for EnvResolver {
    /// Parses "env:VAR" and returns the variable's value
    fn resolve(&self, source: &str) -> Result<String, ResolverError> {
        let var = source.strip_prefix("env:").ok_or_else(|| {
            ResolverError::UnsupportedSource(format!("expected 'env:' prefix, got: {}", source))
        })?;

        let var = var.trim();
        if var.is_empty() {
            return Err(ResolverError::UnsupportedSource(
                "empty env source".to_string(),
            ));
        }

        match env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(ResolverError::MissingKey(var.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_var() {
        env::set_var("RTX_TEST_TOKEN", "value1");

        let resolver = EnvResolver::new();
        assert_eq!(resolver.resolve("env:RTX_TEST_TOKEN").unwrap(), "value1");

        env::remove_var("RTX_TEST_TOKEN");
    }

    #[test]
    fn test_missing_var() {
        let resolver = EnvResolver::new();
        let result = resolver.resolve("env:NONEXISTENT_VAR_12345");
        assert!(matches!(result, Err(ResolverError::MissingKey(_))));
    }

    #[test]
    fn test_empty_var_name() {
        let resolver = EnvResolver::new();
        assert!(resolver.resolve("env:").is_err());
    }

    #[test]
    fn test_invalid_source() {
        let resolver = EnvResolver::new();
        let result = resolver.resolve("vault:secret/path");
        assert!(matches!(result, Err(ResolverError::UnsupportedSource(_))));
    }
}
