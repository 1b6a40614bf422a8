use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Variable selecting the runtime environment; unset means [`Environment::Dev`].
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Runtime environment of the bridge.
///
/// Selects which environment configuration file is layered over the base configuration and
/// whether logs are written as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

/// `APP_ENVIRONMENT` named an environment other than `dev` or `prod`.
#[derive(Debug, Error)]
#[error("`{0}` is not a supported environment, expected `dev` or `prod`")]
pub struct UnsupportedEnvironment(pub String);

impl Environment {
    const ALL: [Environment; 2] = [Environment::Dev, Environment::Prod];

    /// Reads the environment from `APP_ENVIRONMENT`.
    pub fn load() -> Result<Environment, UnsupportedEnvironment> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    pub fn is_prod(&self) -> bool {
        *self == Environment::Prod
    }

    /// Stem of the environment configuration file, e.g. `prod` for `configuration/prod.yaml`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = UnsupportedEnvironment;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let name = name.trim();
        Environment::ALL
            .into_iter()
            .find(|environment| environment.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnsupportedEnvironment(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_names_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(" dev ".parse::<Environment>().unwrap(), Environment::Dev);

        let err = "staging".parse::<Environment>().unwrap_err();
        assert_eq!(err.0, "staging");
    }

    #[test]
    fn names_match_configuration_file_stems() {
        for environment in Environment::ALL {
            assert_eq!(environment.to_string().parse::<Environment>().unwrap(), environment);
        }
        assert!(Environment::Prod.is_prod());
        assert!(!Environment::default().is_prod());
    }
}
