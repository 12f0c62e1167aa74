use std::fmt;
use std::io::Error;

/// Environment variable selecting the runtime environment.
const ENVIRONMENT_ENV_NAME: &str = "STREAMWIRE_ENVIRONMENT";

const PROD_ENV_NAME: &str = "prod";
const STAGING_ENV_NAME: &str = "staging";
const DEV_ENV_NAME: &str = "dev";

/// Runtime environment, used to pick the configuration file and log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Staging,
    Dev,
}

impl Environment {
    /// Reads the environment from `STREAMWIRE_ENVIRONMENT`.
    ///
    /// Falls back to [`Environment::Prod`] when the variable is missing.
    pub fn load() -> Result<Environment, Error> {
        std::env::var(ENVIRONMENT_ENV_NAME)
            .unwrap_or_else(|_| PROD_ENV_NAME.into())
            .try_into()
    }

    /// Exports this environment to `STREAMWIRE_ENVIRONMENT` for the current process.
    pub fn set(&self) {
        // Only called during single-threaded startup and test setup.
        unsafe { std::env::set_var(ENVIRONMENT_ENV_NAME, self.to_string()) }
    }

    /// Returns `true` for [`Environment::Prod`] and [`Environment::Staging`].
    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod | Self::Staging)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Environment::Prod => f.write_str(PROD_ENV_NAME),
            Environment::Staging => f.write_str(STAGING_ENV_NAME),
            Environment::Dev => f.write_str(DEV_ENV_NAME),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            PROD_ENV_NAME => Ok(Self::Prod),
            STAGING_ENV_NAME => Ok(Self::Staging),
            DEV_ENV_NAME => Ok(Self::Dev),
            other => Err(Error::other(format!(
                "unsupported environment `{other}`, expected `{PROD_ENV_NAME}`, `{STAGING_ENV_NAME}` or `{DEV_ENV_NAME}`",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            Environment::try_from("STAGING".to_string()).unwrap(),
            Environment::Staging
        );
        assert_eq!(
            Environment::try_from("dev".to_string()).unwrap(),
            Environment::Dev
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = Environment::try_from("qa".to_string()).unwrap_err();
        assert!(err.to_string().contains("qa"));
    }

    #[test]
    fn test_display_round_trips() {
        for env in [Environment::Prod, Environment::Staging, Environment::Dev] {
            assert_eq!(Environment::try_from(env.to_string()).unwrap(), env);
        }
        assert!(Environment::Staging.is_prod());
        assert!(!Environment::Dev.is_prod());
    }
}
