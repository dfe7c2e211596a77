use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::{
    generate_reset_token, hash_password, hash_reset_token, verify_password,
};
use crate::auth::policy::{self, Capability};
use crate::auth::SessionKeys;
use crate::config::AuthConfig;
use crate::models::{normalize_email, Account, Role};
use crate::services::notify::NotificationDispatcher;
use crate::store::{Store, EMAIL_UNIQUE};
use crate::utils::error::{AppError, AppResult};

/// A freshly issued reset token, returned so development setups can use it
/// without a mail server.
#[derive(Debug, Clone)]
pub struct ResetTicket {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

pub struct IdentityService {
    store: Arc<dyn Store>,
    sessions: SessionKeys,
    notifier: NotificationDispatcher,
    bcrypt_cost: u32,
    reset_token_ttl: Duration,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>, config: &AuthConfig, notifier: NotificationDispatcher) -> Self {
        Self {
            store,
            sessions: SessionKeys::new(&config.jwt_secret, config.session_ttl),
            notifier,
            bcrypt_cost: config.bcrypt_cost,
            reset_token_ttl: config.reset_token_ttl,
        }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> AppResult<Account> {
        let name = name.trim().to_string();
        let email = normalize_email(email);

        if self.store.find_account_by_email(&email).await?.is_some() {
            return Err(AppError::EmailTaken);
        }

        let hash = hash_password(password, self.bcrypt_cost).await?;
        let account = Account::new(name, email, hash, role);

        // The lookup above races with concurrent sign-ups; the constraint decides.
        match self.store.insert_account(&account).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation(EMAIL_UNIQUE) => return Err(AppError::EmailTaken),
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %account.id, role = %account.role, "Account registered");
        Ok(account)
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<Account> {
        let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

        let account = self
            .store
            .find_account_by_email(&normalize_email(email))
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(password, &account.password_hash).await? {
            warn!(user_id = %account.id, "Failed login attempt");
            return Err(invalid());
        }

        Ok(account)
    }

    pub fn issue_session(&self, account: &Account) -> AppResult<String> {
        self.sessions.issue(account)
    }

    pub async fn verify_session(&self, token: &str) -> AppResult<Account> {
        let claims = self.sessions.decode(token)?;
        self.store
            .find_account(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Account no longer exists".to_string()))
    }

    /// Returns `None` for unknown emails so callers can answer uniformly.
    pub async fn request_password_reset(&self, email: &str) -> AppResult<Option<ResetTicket>> {
        let Some(mut account) = self
            .store
            .find_account_by_email(&normalize_email(email))
            .await?
        else {
            info!("Password reset requested for an unknown email");
            return Ok(None);
        };

        let token = generate_reset_token();
        let expires_at = Utc::now() + self.reset_token_ttl;
        account.reset_token_hash = Some(hash_reset_token(&token));
        account.reset_token_expires_at = Some(expires_at);
        account.updated_at = Utc::now();
        self.store.update_account(&account).await?;

        self.notifier
            .dispatch_password_reset(account.email.clone(), token.clone(), expires_at);
        info!(user_id = %account.id, "Password reset token issued");

        Ok(Some(ResetTicket { token, expires_at }))
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        let mut account = self
            .store
            .find_account_by_reset_token(&hash_reset_token(token.trim()))
            .await?
            .ok_or(AppError::ResetTokenInvalid)?;

        let live = account
            .reset_token_expires_at
            .is_some_and(|expires_at| expires_at > Utc::now());
        if !live {
            account.reset_token_hash = None;
            account.reset_token_expires_at = None;
            self.store.update_account(&account).await?;
            return Err(AppError::ResetTokenInvalid);
        }

        account.password_hash = hash_password(new_password, self.bcrypt_cost).await?;
        account.reset_token_hash = None;
        account.reset_token_expires_at = None;
        account.updated_at = Utc::now();
        self.store.update_account(&account).await?;

        info!(user_id = %account.id, "Password reset completed");
        Ok(())
    }

    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let mut account = self.get(account_id).await?;
        if !verify_password(current_password, &account.password_hash).await? {
            return Err(AppError::Unauthorized(
                "Current password is incorrect".to_string(),
            ));
        }

        account.password_hash = hash_password(new_password, self.bcrypt_cost).await?;
        account.updated_at = Utc::now();
        self.store.update_account(&account).await?;

        info!(user_id = %account.id, "Password changed");
        Ok(())
    }

    pub async fn update_profile(&self, account_id: Uuid, name: &str) -> AppResult<Account> {
        let mut account = self.get(account_id).await?;
        account.name = name.trim().to_string();
        account.updated_at = Utc::now();
        self.store.update_account(&account).await?;
        Ok(account)
    }

    pub async fn set_role(&self, admin: &Account, account_id: Uuid, role: Role) -> AppResult<Account> {
        policy::require(admin, Capability::ManageRoles)?;

        let mut account = self.get(account_id).await?;
        let previous = account.role;
        account.role = role;
        account.updated_at = Utc::now();
        self.store.update_account(&account).await?;

        info!(user_id = %account.id, from = %previous, to = %role, by = %admin.id, "Role changed");
        Ok(account)
    }

    pub async fn get(&self, account_id: Uuid) -> AppResult<Account> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}
