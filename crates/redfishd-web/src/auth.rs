//! Caller authentication.
//!
//! An [`Authenticator`] turns request headers into a [`Principal`]. A
//! request without credentials is anonymous; a request with credentials
//! that do not check out is rejected before it reaches the dispatcher.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderValue, header};
use base64::prelude::*;
use redfishd_core::AccountConfig;
use redfishd_domain::Principal;
use tracing::debug;

/// Resolves the caller of a request.
pub trait Authenticator: Send + Sync {
    /// The caller's identity; `None` when credentials were presented but
    /// rejected.
    fn authenticate(&self, headers: &HeaderMap) -> Option<Principal>;
}

#[derive(Debug, Clone)]
struct Account {
    password: String,
    privileges: Vec<String>,
}

/// HTTP Basic authentication against a fixed account list.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    accounts: HashMap<String, Account>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts from the `[[accounts]]` configuration section.
    pub fn from_config(accounts: &[AccountConfig]) -> Self {
        accounts.iter().fold(Self::new(), |acc, account| {
            acc.with_account(
                &account.user_name,
                &account.password,
                account.privileges.iter().cloned(),
            )
        })
    }

    #[must_use]
    pub fn with_account<I, S>(mut self, user_name: &str, password: &str, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accounts.insert(
            user_name.to_string(),
            Account {
                password: password.to_string(),
                privileges: privileges.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Authenticator for StaticAccounts {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Principal> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Some(Principal::anonymous());
        };

        let (user_name, password) = basic_credentials(value)?;
        match self.accounts.get(&user_name) {
            Some(account) if account.password == password => {
                Some(Principal::new(user_name, account.privileges.iter().cloned()))
            }
            _ => {
                debug!(user = %user_name, "Rejected Basic credentials");
                None
            }
        }
    }
}

/// Decode `Basic <base64(user:password)>`.
fn basic_credentials(value: &HeaderValue) -> Option<(String, String)> {
    let value = value.to_str().ok()?.trim();
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user_name, password) = decoded.split_once(':')?;
    Some((user_name.to_string(), password.to_string()))
}
