//! CLI authentication commands: account creation, sign-in and password recovery.

use anyhow::{bail, Result};
use famcare::config::Config;
use famcare::recovery::{Location, RecoveryHandler, RecoveryState, TokenSlot};
use famcare::remote::RemoteClient;
use famcare::store::{FamilyStore, Registered, Registration};
use std::io::{BufRead, Write};
use std::sync::Arc;

/// Reads one line from stdin after printing `label`.
pub fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn value_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => prompt(label),
    }
}

pub async fn register(
    store: &FamilyStore,
    first_name: String,
    last_name: String,
    email: String,
    password: Option<String>,
) -> Result<()> {
    let password = value_or_prompt(password, "Password")?;
    let confirmation = prompt("Confirm password")?;
    let form = Registration {
        first_name,
        last_name,
        email,
        password,
        confirmation,
    };

    match store.register(&form).await? {
        Registered::SignedIn => {
            println!("\x1b[32m✓ Account created, you are signed in\x1b[0m");
        }
        Registered::ConfirmationRequired => {
            println!("\x1b[33mAccount created. Confirm your email address, then run 'famcare login'.\x1b[0m");
        }
    }
    Ok(())
}

pub async fn login(store: &FamilyStore, email: String, password: Option<String>) -> Result<()> {
    let password = value_or_prompt(password, "Password")?;
    store.sign_in(&email, &password).await?;

    let snapshot = store.snapshot();
    match snapshot.user {
        Some(user) => println!("\x1b[32m✓ Signed in as {} <{}>\x1b[0m", user.full_name(), user.email),
        None => println!("\x1b[33mSigned in, but no profile was found for this account\x1b[0m"),
    }
    Ok(())
}

pub async fn send_magic_link(store: &FamilyStore, config: &Config, email: String, offline: bool) -> Result<()> {
    store
        .request_magic_link(&email, &config.sign_in_redirect_url())
        .await?;
    if offline {
        println!("Offline mode: the sign-in link is in the log above. Run 'famcare --offline login --link <link>'.");
    } else {
        println!("If an account exists for {}, a sign-in link is on its way.", email);
        println!("Then run 'famcare login --link <link>' with the link from the email.");
    }
    Ok(())
}

pub async fn login_with_link(store: &FamilyStore, link: &str) -> Result<()> {
    store.sign_in_with_link(link).await?;
    match store.snapshot().user {
        Some(user) => println!("\x1b[32m✓ Signed in as {} <{}>\x1b[0m", user.full_name(), user.email),
        None => println!("\x1b[33mSigned in, but no profile was found for this account\x1b[0m"),
    }
    Ok(())
}

pub async fn logout(store: &FamilyStore) -> Result<()> {
    store.sign_out().await?;
    println!("Signed out");
    Ok(())
}

pub async fn whoami(store: &FamilyStore) -> Result<()> {
    let session = store.remote().get_session().await?;
    let Some(session) = session else {
        println!("\x1b[33mNot signed in.\x1b[0m Run 'famcare login' to authenticate.");
        return Ok(());
    };

    match store.snapshot().user {
        Some(user) => {
            println!("{} <{}>", user.full_name(), user.email);
            println!("role: {:?}", user.role);
        }
        None => println!("user id: {}", session.user.id),
    }
    if let Some(expires) = session.expires_at_utc() {
        println!("session expires: {}", expires.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

pub async fn forgot_password(store: &FamilyStore, config: &Config, email: String, offline: bool) -> Result<()> {
    store
        .request_password_reset(&email, &config.update_password_url())
        .await?;
    if offline {
        println!("Offline mode: the recovery link is in the log above. Run 'famcare --offline recover <link>'.");
    } else {
        println!("If an account exists for {}, a recovery link is on its way.", email);
    }
    Ok(())
}

/// Walks a recovery link through capture, session restore and password update.
pub async fn recover(
    remote: Arc<dyn RemoteClient>,
    config: &Config,
    link: String,
    password: Option<String>,
    confirmation: Option<String>,
) -> Result<()> {
    let mut handler = RecoveryHandler::new(remote, Arc::new(TokenSlot::new()))
        .with_timeout(config.recovery_timeout());

    let mut location = Location::new(link);
    handler.capture(&mut location);
    tracing::debug!(href = %location.href(), "Recovery link rewritten");

    let state = handler.restore().await.clone();
    match state {
        RecoveryState::Ready => {}
        RecoveryState::Degraded => {
            eprintln!("\x1b[33m⚠ Could not confirm the recovery session in time. You can still try to set a new password.\x1b[0m");
        }
        RecoveryState::Failed(reason) => {
            eprintln!(
                "   Continue at {}: run '\x1b[1mfamcare forgot-password <email>\x1b[0m' to request a new link.",
                handler.route()
            );
            bail!("Password recovery failed: {}", reason);
        }
        other => bail!("Unexpected recovery state: {:?}", other),
    }

    let password = value_or_prompt(password, "New password")?;
    let confirmation = value_or_prompt(confirmation, "Confirm new password")?;
    let route = handler.submit(&password, &confirmation).await?;

    println!("\x1b[32m✓ Password updated.\x1b[0m Sign in again with your new password ({}).", route);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use famcare::remote::MemoryBackend;

    #[tokio::test]
    async fn test_recover_with_unusable_link_is_an_error() {
        let backend = Arc::new(MemoryBackend::new());
        let err = recover(
            backend.clone(),
            &Config::default(),
            "https://app.example/#access_token=gone&type=recovery".to_string(),
            None,
            None,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Password recovery failed"));
        assert_eq!(backend.call_count("update_password"), 0);
    }
}
