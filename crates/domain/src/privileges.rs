//! HTTP verbs, caller identity and per-verb privilege requirements.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Privilege granted to callers that presented no credentials.
pub const UNAUTHENTICATED: &str = "Unauthenticated";
/// Read access to the service.
pub const LOGIN: &str = "Login";
/// Full management access.
pub const CONFIGURE_MANAGER: &str = "ConfigureManager";
/// Account management.
pub const CONFIGURE_USERS: &str = "ConfigureUsers";
/// Change own account.
pub const CONFIGURE_SELF: &str = "ConfigureSelf";
/// Component configuration.
pub const CONFIGURE_COMPONENTS: &str = "ConfigureComponents";

/// The HTTP verbs a resource can be addressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Put,
    Post,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpVerb {
    /// Every verb, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Put,
        Self::Post,
        Self::Patch,
        Self::Delete,
        Self::Head,
        Self::Options,
    ];

    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether the verb only reads state.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::invalid(format!("unsupported HTTP verb '{s}'")))
    }
}

/// An authenticated (or anonymous) caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_name: String,
    pub privileges: BTreeSet<String>,
}

impl Principal {
    /// Create a principal holding the given privileges.
    pub fn new<I, S>(user_name: impl Into<String>, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_name: user_name.into(),
            privileges: privileges.into_iter().map(Into::into).collect(),
        }
    }

    /// The identity used when no credentials were presented.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new("", [UNAUTHENTICATED])
    }

    /// Whether this is the anonymous identity.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_name.is_empty()
    }

    /// Whether the principal holds at least one of `required`.
    #[must_use]
    pub fn holds_any(&self, required: &BTreeSet<String>) -> bool {
        !self.privileges.is_disjoint(required)
    }
}

/// Result of a command's own authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Allow without consulting the privilege map.
    Authorized,
    /// Reject without consulting the privilege map.
    Unauthorized,
    /// Defer to the aggregate's privilege map.
    CheckMaster,
}

/// Required privileges per verb. A caller is authorized for a verb when
/// it holds any one of the listed privileges; a verb with no entry (or
/// an empty set) admits nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivilegeMap(BTreeMap<HttpVerb, BTreeSet<String>>);

impl PrivilegeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: require any of `privileges` for `verb`.
    #[must_use]
    pub fn with<I, S>(mut self, verb: HttpVerb, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .insert(verb, privileges.into_iter().map(Into::into).collect());
        self
    }

    /// Builder-style: same requirement for several verbs.
    #[must_use]
    pub fn with_all(mut self, verbs: &[HttpVerb], privileges: &[&str]) -> Self {
        for verb in verbs {
            self = self.with(*verb, privileges.iter().copied());
        }
        self
    }

    /// Privileges required for a verb.
    #[must_use]
    pub fn required(&self, verb: HttpVerb) -> Option<&BTreeSet<String>> {
        self.0.get(&verb)
    }

    /// OR-semantics check of `principal` against the requirement for `verb`.
    #[must_use]
    pub fn is_authorized(&self, verb: HttpVerb, principal: &Principal) -> bool {
        self.required(verb)
            .is_some_and(|required| principal.holds_any(required))
    }

    /// Verbs that have a requirement at all.
    #[must_use]
    pub fn allowed_verbs(&self) -> Vec<HttpVerb> {
        self.0.keys().copied().collect()
    }

    /// Requirements applied when a resource is created without any.
    ///
    /// The service root is readable anonymously; everything else needs
    /// `Login` to read and `ConfigureManager` to change.
    #[must_use]
    pub fn default_for_uri(uri: &str) -> Self {
        const READS: [HttpVerb; 3] = [HttpVerb::Get, HttpVerb::Head, HttpVerb::Options];
        const WRITES: [HttpVerb; 4] = [
            HttpVerb::Put,
            HttpVerb::Post,
            HttpVerb::Patch,
            HttpVerb::Delete,
        ];

        let trimmed = uri.trim_end_matches('/');
        if trimmed == "/redfish" || trimmed == "/redfish/v1" {
            return Self::new()
                .with_all(&READS, &[UNAUTHENTICATED, LOGIN])
                .with_all(&WRITES, &[CONFIGURE_MANAGER]);
        }

        Self::new()
            .with_all(&READS, &[LOGIN])
            .with_all(&WRITES, &[CONFIGURE_MANAGER])
    }
}
