//! Password login and the current-user lookup.
//!
//! The password never reaches the host in clear text: a [`PasswordCipher`]
//! turns it into the opaque token the login endpoint expects. The crate ships
//! [`CommandCipher`], which delegates to an external program.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::cache::TtlCache;
use crate::constants::{CURRENT_USER_PATH, LOGIN_PATH, USER_CACHE_KEY};
use crate::error::ExportError;
use crate::transport::ApiClient;

/// Turns a clear-text password into the token the login endpoint accepts.
#[async_trait]
pub trait PasswordCipher: Send + Sync {
    /// Encrypts `password`.
    async fn encrypt(&self, password: &str) -> Result<String, ExportError>;
}

/// Cipher backed by an external program.
///
/// The password is written to the program's stdin; its trimmed stdout is the token.
#[derive(Debug, Clone)]
pub struct CommandCipher {
    program: String,
    args: Vec<String>,
}

impl CommandCipher {
    /// Creates a cipher running `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parses a shell-like command line split on whitespace.
    #[must_use]
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(ToString::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl PasswordCipher for CommandCipher {
    async fn encrypt(&self, password: &str) -> Result<String, ExportError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Cipher {
                reason: format!("cannot start `{}`: {e}", self.program),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.as_bytes())
                .await
                .map_err(|e| ExportError::Cipher {
                    reason: format!("cannot write to `{}`: {e}", self.program),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExportError::Cipher {
                reason: format!("`{}` did not finish: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Cipher {
                reason: format!("`{}` exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(ExportError::Cipher {
                reason: format!("`{}` produced no output", self.program),
            });
        }
        Ok(token)
    }
}

/// The logged-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Account login, also the owner part of personal namespaces.
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRecord {
    user: UserProfile,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    me: UserProfile,
}

/// Logs in with account and password, storing the issued session.
///
/// The session cookie is persisted by [`ApiClient::post_json`]; the profile is
/// cached under `user.json` for `ttl`.
///
/// # Errors
///
/// [`ExportError::Cipher`] if encryption fails, [`ExportError::LoginRejected`]
/// when the response carries no user, plus any transport error.
#[instrument(skip(client, cipher, password, cache))]
pub async fn login(
    client: &ApiClient,
    cipher: &dyn PasswordCipher,
    account: &str,
    password: &str,
    cache: &TtlCache,
    ttl: Duration,
) -> Result<UserProfile, ExportError> {
    let encrypted = cipher.encrypt(password).await?;
    let body = json!({
        "login": account,
        "password": encrypted,
        "loginType": "password",
    });

    let response = client.post_json(LOGIN_PATH, &body).await?;
    let data = response.get("data").filter(|data| !data.is_null());
    let Some(data) = data else {
        warn!(account, "login response carried no data");
        return Err(ExportError::LoginRejected {
            login: account.to_string(),
        });
    };

    let LoginData { me } = serde_json::from_value(data.clone())
        .map_err(|e| ExportError::invalid_response(client.url_for(LOGIN_PATH), e))?;

    if client.credentials().load().is_none() {
        warn!("login succeeded but the server issued no session cookie");
    }

    remember_user(cache, &me, ttl).await;
    info!(login = %me.login, "logged in");
    Ok(me)
}

/// Returns the current user, preferring the cached profile.
///
/// # Errors
///
/// [`ExportError::CredentialsExpired`] without a valid session, or any
/// transport error from the profile endpoint.
#[instrument(skip_all)]
pub async fn current_user(
    client: &ApiClient,
    cache: &TtlCache,
    ttl: Duration,
) -> Result<UserProfile, ExportError> {
    if let Some(record) = cache.get::<UserRecord>(USER_CACHE_KEY).await {
        debug!(login = %record.user.login, "user profile from cache");
        return Ok(record.user);
    }

    let user: UserProfile = client.get_data(CURRENT_USER_PATH).await?;
    remember_user(cache, &user, ttl).await;
    Ok(user)
}

async fn remember_user(cache: &TtlCache, user: &UserProfile, ttl: Duration) {
    let record = UserRecord { user: user.clone() };
    if let Err(error) = cache.put(USER_CACHE_KEY, &record, ttl).await {
        warn!(%error, "could not cache user profile");
    }
}
