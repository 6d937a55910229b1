use chrono::Duration;
use uuid::Uuid;

use super::error::ServiceError;
use super::jwt::TokenIssuer;
use super::notifier::SharedNotifier;
use super::otp::OtpStore;
use super::repository::SharedRepository;
use crate::config::{ConsumptionPolicy, IdentityConfig};
use crate::models::{
    AuthMethod, AuthToken, AuthTokenType, Credential, DepartmentRole, Identifier, Role, User,
    UserProfile,
};
use crate::utils::{PasswordHasher, SharedClock};

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub enabled_methods: Vec<AuthMethod>,
    pub auth_token_ttl: Duration,
    pub auth_token_policy: ConsumptionPolicy,
    /// Base for links in magic-link and reset emails, without a trailing slash.
    pub public_base_url: String,
}

impl AuthSettings {
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            enabled_methods: config.credentials.auth_methods.clone(),
            auth_token_ttl: config.auth_token_ttl(),
            auth_token_policy: config.credentials.auth_token_policy,
            public_base_url: config.delivery.public_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub password: String,
}

/// Tokens minted for a user in one tenant after a successful sign-in.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tenant_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Orchestrates the sign-in methods, account flows and session issuance.
#[derive(Clone)]
pub struct AuthService {
    repo: SharedRepository,
    otp: OtpStore,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    notifier: SharedNotifier,
    clock: SharedClock,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        repo: SharedRepository,
        otp: OtpStore,
        tokens: TokenIssuer,
        hasher: PasswordHasher,
        notifier: SharedNotifier,
        clock: SharedClock,
        settings: AuthSettings,
    ) -> Self {
        Self {
            repo,
            otp,
            tokens,
            hasher,
            notifier,
            clock,
            settings,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    fn ensure_enabled(&self, method: AuthMethod) -> Result<(), ServiceError> {
        if self.settings.enabled_methods.contains(&method) {
            Ok(())
        } else {
            Err(ServiceError::MethodDisabled(method))
        }
    }

    /// First step of a sign-in. Password sign-in has no challenge; OTP issues
    /// and delivers a code; magic link creates and delivers a link.
    pub async fn challenge(&self, method: AuthMethod, target: &str) -> Result<(), ServiceError> {
        self.ensure_enabled(method)?;
        match method {
            AuthMethod::Password => Ok(()),
            AuthMethod::Otp => self.deliver_otp(target).await,
            AuthMethod::MagicLink => self.deliver_magic_link(target).await,
        }
    }

    pub async fn send_otp(&self, target: &str) -> Result<(), ServiceError> {
        self.challenge(AuthMethod::Otp, target).await
    }

    pub async fn send_magic_link(&self, email: &str) -> Result<(), ServiceError> {
        self.challenge(AuthMethod::MagicLink, email).await
    }

    /// Second step of a sign-in. Returns the authenticated user; membership in
    /// `tenant_id` is created for OTP sign-ups and magic-link sign-ins.
    pub async fn authenticate(
        &self,
        tenant_id: &str,
        credential: Credential,
    ) -> Result<User, ServiceError> {
        self.ensure_enabled(credential.method())?;
        match credential {
            Credential::Password { email, password } => {
                self.authenticate_password(&email, password).await
            }
            Credential::Otp { target, code } => {
                self.authenticate_otp(tenant_id, &target, &code).await
            }
            Credential::MagicLink { token } => {
                self.authenticate_magic_link(tenant_id, &token).await
            }
        }
    }

    pub fn issue_session(&self, user: &User, tenant_id: &str) -> Result<Session, ServiceError> {
        let access_token = self.tokens.issue_access(user, tenant_id)?;
        let refresh_token = self.tokens.issue_refresh(user, tenant_id)?;
        tracing::info!(user_id = %user.id, tenant_id = %tenant_id, "Session issued");
        Ok(Session {
            user: user.clone(),
            tenant_id: tenant_id.to_string(),
            access_token,
            refresh_token,
        })
    }

    pub async fn register(
        &self,
        tenant_id: &str,
        input: RegisterInput,
    ) -> Result<User, ServiceError> {
        self.ensure_enabled(AuthMethod::Password)?;

        let password_hash = self.hasher.hash_blocking(input.password).await?;
        let user = User::new(input.name, Some(input.email), Some(input.phone_number))
            .with_password_hash(password_hash);

        self.repo.create_user(&user).await?;
        self.ensure_membership(tenant_id, user.id).await?;

        tracing::info!(user_id = %user.id, tenant_id = %tenant_id, "User registered");
        Ok(user)
    }

    /// Answers success whether or not the email is known.
    pub async fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self.repo.find_user_by_email(&normalize(email)).await? else {
            tracing::info!("Password reset requested for unknown email");
            return Ok(());
        };
        let Some(address) = user.email.clone() else {
            return Ok(());
        };

        let token = self.create_auth_token(&user, AuthTokenType::ResetPassword).await?;
        let link = format!(
            "{}/reset-password/{}",
            self.settings.public_base_url, token.token
        );

        self.notifier
            .send_password_reset(&address, &link)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, user_id = %user.id, "Password reset delivery failed");
                ServiceError::Delivery(
                    "Reset link was created but could not be delivered".to_string(),
                )
            })?;

        tracing::info!(user_id = %user.id, "Password reset link sent");
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: String) -> Result<(), ServiceError> {
        let record = self
            .redeem_auth_token(token, AuthTokenType::ResetPassword)
            .await?;

        let mut user = self
            .repo
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        user.password_hash = Some(self.hasher.hash_blocking(new_password).await?);
        user.touch();
        self.repo.update_user(&user).await?;

        tracing::info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    /// Issues an OTP to the account's email address for verification.
    pub async fn send_email_verification(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize(email);
        if self.repo.find_user_by_email(&email).await?.is_none() {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }
        self.deliver_otp(&email).await
    }

    pub async fn verify_email(&self, email: &str, code: &str) -> Result<User, ServiceError> {
        let email = normalize(email);
        self.otp.verify(&email, code).await?;

        let mut user = self
            .repo
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        if !user.email_verified {
            user.email_verified = true;
            user.touch();
            self.repo.update_user(&user).await?;
        }

        tracing::info!(user_id = %user.id, "Email verified");
        Ok(user)
    }

    /// Mints a new session from a refresh token bound to the same tenant.
    pub async fn refresh(
        &self,
        bound_tenant: &str,
        refresh_token: &str,
    ) -> Result<Session, ServiceError> {
        let claims = self.tokens.parse_refresh(refresh_token)?;
        self.tokens.check_expiry(claims.exp)?;

        if claims.tenant_id != bound_tenant {
            tracing::warn!(
                token_tenant = %claims.tenant_id,
                tenant_id = %bound_tenant,
                "Refresh token presented for another tenant"
            );
            return Err(ServiceError::Unauthenticated(
                "Refresh token was issued for another tenant".to_string(),
            ));
        }

        let user = self
            .repo
            .find_user_by_id(claims.id)
            .await?
            .ok_or_else(|| ServiceError::Unauthenticated("User no longer exists".to_string()))?;

        self.issue_session(&user, bound_tenant)
    }

    pub async fn profile(&self, user_id: Uuid, tenant_id: &str) -> Result<UserProfile, ServiceError> {
        let user = self
            .repo
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
        let role = self.repo.find_role(tenant_id, user_id).await?.map(|r| r.role);
        Ok(user.profile(role))
    }

    /// Binds the `user` role unless the user already has a role in the tenant.
    pub async fn ensure_membership(&self, tenant_id: &str, user_id: Uuid) -> Result<(), ServiceError> {
        if self.repo.find_role(tenant_id, user_id).await?.is_none() {
            self.repo
                .upsert_role(&DepartmentRole::new(tenant_id.to_string(), user_id, Role::User))
                .await?;
            tracing::info!(user_id = %user_id, tenant_id = %tenant_id, "Membership created");
        }
        Ok(())
    }

    async fn authenticate_password(&self, email: &str, password: String) -> Result<User, ServiceError> {
        let user = self
            .repo
            .find_user_by_email(&normalize(email))
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        let hash = user
            .password_hash
            .clone()
            .ok_or(ServiceError::InvalidCredentials)?;

        if !self.hasher.verify_blocking(password, hash).await {
            tracing::info!(user_id = %user.id, "Password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(user)
    }

    async fn authenticate_otp(
        &self,
        tenant_id: &str,
        target: &str,
        code: &str,
    ) -> Result<User, ServiceError> {
        let identifier = parse_identifier(target)?;
        self.otp.verify(identifier.as_str(), code).await?;

        if let Some(user) = self.find_by_identifier(&identifier).await? {
            return Ok(user);
        }

        let user = User::from_identifier(&identifier);
        self.repo.create_user(&user).await?;
        self.ensure_membership(tenant_id, user.id).await?;
        tracing::info!(user_id = %user.id, tenant_id = %tenant_id, "User created from OTP sign-in");
        Ok(user)
    }

    async fn authenticate_magic_link(&self, tenant_id: &str, token: &str) -> Result<User, ServiceError> {
        let record = self.redeem_auth_token(token, AuthTokenType::MagicLink).await?;

        let mut user = self
            .repo
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if !user.email_verified {
            user.email_verified = true;
            user.touch();
            self.repo.update_user(&user).await?;
        }
        self.ensure_membership(tenant_id, user.id).await?;
        Ok(user)
    }

    async fn deliver_otp(&self, target: &str) -> Result<(), ServiceError> {
        let identifier = parse_identifier(target)?;
        let code = self.otp.issue(identifier.as_str()).await?;

        self.notifier
            .send_otp(identifier.as_str(), identifier.channel(), &code)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, channel = ?identifier.channel(), "OTP delivery failed");
                ServiceError::Delivery("Code was issued but could not be delivered".to_string())
            })?;

        tracing::info!(channel = ?identifier.channel(), "One-time code sent");
        Ok(())
    }

    async fn deliver_magic_link(&self, email: &str) -> Result<(), ServiceError> {
        let Identifier::Email(email) = parse_identifier(email)? else {
            return Err(ServiceError::MalformedInput(
                "Magic links can only be sent to an email address".to_string(),
            ));
        };

        let user = match self.repo.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                let user = User::from_identifier(&Identifier::Email(email.clone()));
                self.repo.create_user(&user).await?;
                tracing::info!(user_id = %user.id, "Unverified user created for magic link");
                user
            }
        };

        let token = self.create_auth_token(&user, AuthTokenType::MagicLink).await?;
        let link = format!(
            "{}/magic-link?token={}",
            self.settings.public_base_url, token.token
        );

        self.notifier
            .send_magic_link(&email, &link)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, user_id = %user.id, "Magic link delivery failed");
                ServiceError::Delivery(
                    "Magic link was created but could not be delivered".to_string(),
                )
            })?;

        tracing::info!(user_id = %user.id, "Magic link sent");
        Ok(())
    }

    async fn create_auth_token(
        &self,
        user: &User,
        token_type: AuthTokenType,
    ) -> Result<AuthToken, ServiceError> {
        let token = AuthToken::new(
            user.id,
            token_type,
            self.clock.now(),
            self.settings.auth_token_ttl,
        );
        self.repo.create_auth_token(&token).await?;
        Ok(token)
    }

    /// Missing, expired and consumed tokens are all invalid credentials.
    async fn redeem_auth_token(
        &self,
        token: &str,
        token_type: AuthTokenType,
    ) -> Result<AuthToken, ServiceError> {
        let record = self
            .repo
            .find_auth_token(token, token_type)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if record.is_expired_at(self.clock.now()) {
            return Err(ServiceError::InvalidCredentials);
        }

        if self.settings.auth_token_policy.is_single_use()
            && !self.repo.consume_auth_token(record.id).await?
        {
            tracing::info!(token_id = %record.id, "Auth token already redeemed");
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(record)
    }

    async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<User>, ServiceError> {
        let user = match identifier {
            Identifier::Email(email) => self.repo.find_user_by_email(email).await?,
            Identifier::Phone(phone) => self.repo.find_user_by_phone(phone).await?,
        };
        Ok(user)
    }
}

fn normalize(email: &str) -> String {
    crate::models::user::normalize_email(email)
}

fn parse_identifier(target: &str) -> Result<Identifier, ServiceError> {
    Identifier::parse(target).ok_or_else(|| {
        ServiceError::MalformedInput(
            "Target must be an email address or an E.164 phone number".to_string(),
        )
    })
}
