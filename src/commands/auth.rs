//! Auth command handlers: login, session import, status, logout.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, bail};
use exporter_core::auth::{current_user, login};
use exporter_core::constants::USER_CACHE_KEY;
use exporter_core::{ApiClient, CommandCipher, CredentialStore, ExportConfig, TtlCache};
use tracing::{info, warn};

pub async fn run_login_command(config: &ExportConfig, account: &str, cipher: &str) -> Result<()> {
    let Some(cipher) = CommandCipher::from_command_line(cipher) else {
        bail!("--cipher must name a command");
    };
    let password = read_secret("Password")?;

    let store = CredentialStore::new(&config.meta_dir);
    let client = ApiClient::new(config, store).context("cannot build HTTP client")?;
    let cache = TtlCache::new(config.meta_dir.clone());

    let user = login(
        &client,
        &cipher,
        account,
        &password,
        &cache,
        config.credentials_ttl,
    )
    .await
    .context("login failed")?;

    info!(name = %user.name, login = %user.login, "Logged in");
    Ok(())
}

pub async fn run_token_command(config: &ExportConfig, cookie: Option<&str>) -> Result<()> {
    let cookie = match cookie {
        Some(cookie) => cookie.to_string(),
        None => read_secret("Cookie")?,
    };
    if cookie.trim().is_empty() {
        bail!("No cookie provided");
    }

    let store = CredentialStore::new(&config.meta_dir);
    store
        .save(&cookie, config.credentials_ttl)
        .context("cannot store session cookie")?;
    info!(path = %store.path().display(), "Stored session cookie");

    // A fresh session belongs to whoever the cookie says, not the cached profile.
    let cache = TtlCache::new(config.meta_dir.clone());
    if let Err(error) = cache.invalidate(USER_CACHE_KEY).await {
        warn!(%error, "could not drop cached user profile");
    }

    let client = ApiClient::new(config, store).context("cannot build HTTP client")?;
    match current_user(&client, &cache, config.credentials_ttl).await {
        Ok(user) => info!(name = %user.name, login = %user.login, "Session verified"),
        Err(error) => warn!(%error, "Stored cookie, but the session could not be verified"),
    }
    Ok(())
}

pub async fn run_status_command(config: &ExportConfig) -> Result<()> {
    let store = CredentialStore::new(&config.meta_dir);
    let Some(credentials) = store.load() else {
        println!("No valid session stored; run `yuque-exporter auth login` or `auth token`");
        return Ok(());
    };

    let cache = TtlCache::new(config.meta_dir.clone());
    let client = ApiClient::new(config, store).context("cannot build HTTP client")?;
    let user = current_user(&client, &cache, config.credentials_ttl)
        .await
        .context("session check failed")?;

    println!(
        "Logged in as {} ({}); session valid until {}",
        user.name,
        user.login,
        format_expiry(credentials.expires_at_millis)
    );
    Ok(())
}

pub fn run_logout_command(config: &ExportConfig) -> Result<()> {
    let store = CredentialStore::new(&config.meta_dir);
    let removed = store.clear().context("cannot remove stored credentials")?;
    if removed {
        info!(path = %store.path().display(), "Cleared stored session");
    } else {
        info!("No stored session found");
    }
    Ok(())
}

fn format_expiry(expires_at_millis: i64) -> String {
    let Ok(millis) = u64::try_from(expires_at_millis) else {
        return "an unknown time".to_string();
    };
    let at = std::time::UNIX_EPOCH + std::time::Duration::from_millis(millis);
    httpdate::fmt_http_date(at)
}

fn read_secret(label: &str) -> Result<String> {
    let mut buffer = String::new();
    if io::stdin().is_terminal() {
        eprint!("{label}: ");
        io::stdin().read_line(&mut buffer)?;
    } else {
        io::stdin().read_to_string(&mut buffer)?;
    }
    let value = buffer.trim();
    if value.is_empty() {
        bail!("No {} provided on stdin", label.to_ascii_lowercase());
    }
    Ok(value.to_string())
}
