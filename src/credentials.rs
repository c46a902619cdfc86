use std::collections::HashMap;
use std::fmt;

use crate::config::MAX_BOUNDING_BOXES;
use crate::error::{ConfigError, CredentialError};

/// OAuth token/secret pair for one account.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Maps a logical account name to its OAuth access token.
///
/// Unknown accounts are an error, never an empty or partial pair.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, account: &str) -> Result<AccessToken, CredentialError>;
}

/// Account directory read from `USER_n` / `OAUTH_TOKEN_USER_n` /
/// `OAUTH_SECRET_USER_n` for n in 1..=5.
#[derive(Debug, Clone, Default)]
pub struct AccountDirectory {
    accounts: HashMap<String, AccessToken>,
}

impl AccountDirectory {
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut accounts = HashMap::new();

        for n in 1..=MAX_BOUNDING_BOXES {
            let user_key = format!("USER_{n}");
            let Some(account) = vars.get(&user_key).map(|v| v.trim()).filter(|v| !v.is_empty())
            else {
                continue;
            };

            let token_key = format!("OAUTH_TOKEN_USER_{n}");
            let secret_key = format!("OAUTH_SECRET_USER_{n}");
            let lookup = |key: &str| {
                vars.get(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| ConfigError::IncompleteAccount {
                        key: user_key.clone(),
                        account: account.to_string(),
                        missing: key.to_string(),
                    })
            };

            let token = AccessToken {
                token: lookup(&token_key)?,
                secret: lookup(&secret_key)?,
            };
            accounts.insert(account.to_string(), token);
        }

        Ok(Self { accounts })
    }

    #[cfg(test)]
    pub fn insert(&mut self, account: impl Into<String>, token: AccessToken) {
        self.accounts.insert(account.into(), token);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }
}

impl CredentialResolver for AccountDirectory {
    fn resolve(&self, account: &str) -> Result<AccessToken, CredentialError> {
        self.accounts
            .get(account)
            .cloned()
            .ok_or_else(|| CredentialError::UnknownAccount(account.to_string()))
    }
}
