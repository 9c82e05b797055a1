//! Account registration flow: request an SMS code, exchange the received
//! code for the long-lived account password, or unlink the account.

use tokio_util::sync::CancellationToken;

use super::UploadManager;
use crate::accounts::parse_phone;
use crate::error::{Error, Result};

impl UploadManager {
    /// Begin registration for `user_id` with the given phone number.
    ///
    /// Normalizes the phone number, stores the unverified account, and asks
    /// the service to deliver an SMS code to it. Fails with
    /// [`Error::AlreadyRegistered`] if the user already has an account
    /// (verified or not) — they must unregister first.
    pub async fn begin_registration(&self, user_id: &str, phone: &str) -> Result<()> {
        if self.accounts.get(user_id).await?.is_some() {
            return Err(Error::AlreadyRegistered);
        }
        let phone = parse_phone(phone)?;
        self.accounts.add(user_id, &phone).await?;

        let client = self.clients.create(CancellationToken::new());
        if let Err(err) = client.request_code(&phone).await {
            // Roll the record back so the user can retry with a fixed number
            let _ = self.accounts.delete(user_id).await;
            return Err(err);
        }
        tracing::info!(user_id = %user_id, "verification code requested");
        Ok(())
    }

    /// Complete registration by validating the received SMS code.
    ///
    /// On success the account password is persisted and returned (the user
    /// may want it for other devices). Fails with [`Error::NotRegistered`]
    /// if registration was never begun, and [`Error::AlreadyRegistered`] if
    /// the account is already verified.
    pub async fn complete_registration(&self, user_id: &str, code: &str) -> Result<String> {
        let account = self
            .accounts
            .get(user_id)
            .await?
            .ok_or(Error::NotRegistered)?;
        if account.is_verified() {
            return Err(Error::AlreadyRegistered);
        }

        let client = self.clients.create(CancellationToken::new());
        let password = client.validate_code(&account.phone, code).await?;
        self.accounts.set_password(user_id, &password).await?;
        tracing::info!(user_id = %user_id, "account verified");
        Ok(password)
    }

    /// Forget a user's account
    pub async fn unregister(&self, user_id: &str) -> Result<()> {
        if self.accounts.get(user_id).await?.is_none() {
            return Err(Error::NotRegistered);
        }
        self.accounts.delete(user_id).await
    }
}
