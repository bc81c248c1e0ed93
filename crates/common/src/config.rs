use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when the
/// variable is unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_environment_defaults_to_development() {
        unsafe { env::remove_var("ENVIRONMENT") };
        assert_eq!(Environment::from_env(), Environment::Development);
    }

    #[test]
    #[serial]
    fn test_environment_accepts_prod_alias() {
        unsafe { env::set_var("ENVIRONMENT", "PROD") };
        assert_eq!(Environment::from_env(), Environment::Production);
        unsafe { env::remove_var("ENVIRONMENT") };
    }

    #[test]
    #[serial]
    fn test_env_or_falls_back_on_parse_failure() {
        unsafe { env::set_var("COMMON_TEST_THRESHOLD", "not-a-number") };
        assert_eq!(env_or("COMMON_TEST_THRESHOLD", 0.3f32), 0.3);

        unsafe { env::set_var("COMMON_TEST_THRESHOLD", " 0.45 ") };
        assert_eq!(env_or("COMMON_TEST_THRESHOLD", 0.3f32), 0.45);

        unsafe { env::remove_var("COMMON_TEST_THRESHOLD") };
        assert_eq!(env_or("COMMON_TEST_THRESHOLD", 7u32), 7);
    }
}
