//! User management command.

use crate::agent::generate_password;
use crate::auth::issue_token;
use crate::cli::{Output, UserAction};
use crate::config::Settings;
use crate::error::{LmsError, Result};
use crate::store::{self, hash_secret, LmsStore, NewUser, Role, User};
use anyhow::Context;

/// Credentials handed out once at account creation.
#[derive(Debug)]
pub struct IssuedAccount {
    pub user: User,
    pub password: String,
    pub token: String,
}

/// Run the user command.
pub async fn run_user(action: &UserAction, settings: Settings) -> anyhow::Result<()> {
    match action {
        UserAction::Add {
            name,
            email,
            role,
            section,
        } => {
            let store = store::open(&settings)?;
            let issued = add_user(store.as_ref(), name, email, *role, section.as_deref())
                .await
                .context("Failed to create user")?;

            Output::success(&format!(
                "Created {} account for {} ({})",
                issued.user.role, issued.user.name, issued.user.email
            ));
            Output::kv("ID", &issued.user.id.to_string());
            Output::secret("Temporary password", &issued.password);
            Output::secret("API token", &issued.token);
            println!();
            if issued.user.role.is_staff() {
                Output::info("Send the token as 'Authorization: Bearer <token>'. It is shown only once.");
            } else {
                Output::warning("Students cannot use the AI assistant endpoints.");
            }
        }
    }

    Ok(())
}

/// Create an account with a temporary password and an API token.
pub async fn add_user(
    store: &dyn LmsStore,
    name: &str,
    email: &str,
    role: Role,
    section: Option<&str>,
) -> Result<IssuedAccount> {
    if name.trim().is_empty() {
        return Err(LmsError::InvalidInput("Name must not be empty".to_string()));
    }
    if store.find_user_by_email(email).await?.is_some() {
        return Err(LmsError::Conflict(format!(
            "A user with email {} already exists",
            email.trim().to_lowercase()
        )));
    }

    let section_id = match section {
        Some(s) => Some(
            store
                .find_section(s)
                .await?
                .ok_or_else(|| LmsError::NotFound(format!("Section \"{}\"", s)))?
                .id,
        ),
        None => None,
    };

    let password = generate_password();
    let user = store
        .create_user(NewUser {
            name: name.to_string(),
            email: email.to_string(),
            role,
            section_id,
            password_hash: hash_secret(&password),
        })
        .await?;

    let token = issue_token();
    store.set_api_token(user.id, &hash_secret(&token)).await?;

    Ok(IssuedAccount {
        user,
        password,
        token,
    })
}
