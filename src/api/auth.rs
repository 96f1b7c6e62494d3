//! API key authentication and the permission policy applied to writes.
//!
//! Reads are open. Writes need a principal, resolved from either the
//! `username`/`api_key` query parameters or an `Authorization: ApiKey
//! <username>:<api_key>` header, holding the permission named by the
//! resource's [`Policy`].

use super::{
    error::{ApiError, ApiResult},
    query::Params,
};
use crate::{model::catalog::User, store::Transaction};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

/// Named permission checked before a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    ManageEnvironments,
    ManageSuites,
    ManageCases,
}

impl Policy {
    pub const ALL: [Self; 3] = [Self::ManageEnvironments, Self::ManageSuites, Self::ManageCases];

    #[must_use]
    pub const fn permission(self) -> &'static str {
        match self {
            Self::ManageEnvironments => "environments.manage_environments",
            Self::ManageSuites => "library.manage_suites",
            Self::ManageCases => "library.manage_cases",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    permissions: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn new(user: User, permissions: Vec<String>) -> Self {
        Self { user, permissions }
    }

    #[must_use]
    pub fn has_permission(&self, codename: &str) -> bool {
        self.permissions.iter().any(|granted| granted == codename)
    }
}

/// Every write action needs the policy's permission.
#[must_use]
pub fn authorize(principal: &Principal, action: Action, policy: Policy) -> Decision {
    let granted = match action {
        Action::Create | Action::Update | Action::Delete => {
            principal.has_permission(policy.permission())
        }
    };
    if granted {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Username and key sent with the request, if any.
fn credentials(headers: &HeaderMap, params: &Params) -> Option<(String, SecretString)> {
    if let (Some(username), Some(api_key)) = (params.get("username"), params.get("api_key")) {
        return Some((username.clone(), SecretString::from(api_key.clone())));
    }

    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("apikey") {
        return None;
    }
    let (username, api_key) = token.trim().split_once(':')?;
    Some((username.to_string(), SecretString::from(api_key.to_string())))
}

/// Resolves the caller from the request credentials.
///
/// # Errors
/// Returns `Unauthorized` when credentials are present but do not match an
/// account.
pub async fn authenticate(
    tx: &mut dyn Transaction,
    headers: &HeaderMap,
    params: &Params,
) -> ApiResult<Option<Principal>> {
    let Some((username, api_key)) = credentials(headers, params) else {
        return Ok(None);
    };

    let Some(account) = tx.account(&username).await? else {
        warn!(%username, "Unknown API user");
        return Err(ApiError::Unauthorized);
    };

    if account.api_key.expose_secret() != api_key.expose_secret() {
        warn!(%username, "API key mismatch");
        return Err(ApiError::Unauthorized);
    }

    debug!(%username, "Authenticated");
    Ok(Some(Principal::new(account.user, account.permissions)))
}

/// Authenticates the caller and checks `policy` for `action`.
///
/// # Errors
/// `Unauthorized` without valid credentials, `Forbidden` when the policy
/// denies the action, `MethodNotAllowed` for resources without a policy.
pub async fn require(
    tx: &mut dyn Transaction,
    headers: &HeaderMap,
    params: &Params,
    action: Action,
    policy: Option<Policy>,
) -> ApiResult<Principal> {
    let policy = policy.ok_or(ApiError::MethodNotAllowed)?;
    let principal = authenticate(tx, headers, params)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    match authorize(&principal, action, policy) {
        Decision::Allow => Ok(principal),
        Decision::Deny => {
            warn!(
                username = %principal.user.username,
                action = ?action,
                permission = policy.permission(),
                "Permission denied"
            );
            Err(ApiError::Forbidden(format!(
                "Permission {} is required.",
                policy.permission()
            )))
        }
    }
}
