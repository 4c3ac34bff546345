//! Account commands. Prompts run on the blocking pool so the runtime stays free.

use std::sync::Arc;

use dialoguer::{Input, Password};

use kiska_core::auth::{CredentialService, User, validate_credentials};

pub enum AccountAction {
    SignIn,
    SignUp,
    ResetPassword,
}

async fn prompt_email(given: Option<String>) -> anyhow::Result<String> {
    if let Some(email) = given {
        return Ok(email);
    }
    let email = tokio::task::spawn_blocking(|| {
        Input::<String>::new().with_prompt("Email").interact_text()
    })
    .await??;
    Ok(email)
}

async fn prompt_secret(confirm: bool) -> anyhow::Result<String> {
    let secret = tokio::task::spawn_blocking(move || {
        let mut prompt = Password::new().with_prompt("Password");
        if confirm {
            prompt = prompt.with_confirmation("Repeat password", "Passwords don't match");
        }
        prompt.interact()
    })
    .await??;
    Ok(secret)
}

/// Ask for credentials until sign-in succeeds or the user gives up after three tries.
pub async fn sign_in_interactive(credentials: &Arc<dyn CredentialService>) -> anyhow::Result<User> {
    let mut last_error = None;
    for _ in 0..3 {
        let email = prompt_email(None).await?;
        let secret = prompt_secret(false).await?;
        match credentials.sign_in(&email, &secret).await {
            Ok(user) => return Ok(user),
            Err(e) => {
                eprintln!("{e}");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => anyhow::bail!("Sign-in abandoned"),
    }
}

pub async fn run(
    credentials: Arc<dyn CredentialService>,
    action: AccountAction,
    email: Option<String>,
) -> anyhow::Result<()> {
    let email = prompt_email(email).await?;
    match action {
        AccountAction::SignIn => {
            let secret = prompt_secret(false).await?;
            let user = credentials.sign_in(&email, &secret).await?;
            println!("Signed in as {} ({})", user.email, user.uid);
        }
        AccountAction::SignUp => {
            let secret = prompt_secret(true).await?;
            validate_credentials(&email, &secret)?;
            let user = credentials.sign_up(&email, &secret).await?;
            println!("Account created for {} ({})", user.email, user.uid);
        }
        AccountAction::ResetPassword => {
            credentials.reset_password(&email).await?;
            println!("Password reset email sent to {email}");
        }
    }
    Ok(())
}
