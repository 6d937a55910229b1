//! User model - accounts reachable by email, phone, or both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Role;
use crate::utils::validation::is_e164;

/// User entity.
///
/// `password_hash` is absent for accounts that only sign in with OTP or magic links.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: Option<String>, phone_number: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            email: email.map(|e| normalize_email(&e)),
            phone_number,
            password_hash: None,
            email_verified: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Placeholder account for an identifier seen for the first time.
    pub fn from_identifier(identifier: &Identifier) -> Self {
        match identifier {
            Identifier::Email(email) => Self::new(email.clone(), Some(email.clone()), None),
            Identifier::Phone(phone) => Self::new(phone.clone(), None, Some(phone.clone())),
        }
    }

    pub fn with_password_hash(mut self, password_hash: String) -> Self {
        self.password_hash = Some(password_hash);
        self
    }

    pub fn touch(&mut self) {
        self.updated_utc = Utc::now();
    }

    pub fn profile(&self, role: Option<Role>) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            email_verified: self.email_verified,
            role,
        }
    }
}

/// Public view of a user; never carries credential material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: bool,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Email,
    Sms,
}

/// A sign-in target: an email address or an E.164 phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    Phone(String),
}

impl Identifier {
    pub fn parse(target: &str) -> Option<Self> {
        let target = target.trim();
        if target.contains('@') {
            let email = normalize_email(target);
            let valid = email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
            return valid.then_some(Identifier::Email(email));
        }
        is_e164(target).then(|| Identifier::Phone(target.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identifier::Email(value) | Identifier::Phone(value) => value,
        }
    }

    pub fn channel(&self) -> DeliveryChannel {
        match self {
            Identifier::Email(_) => DeliveryChannel::Email,
            Identifier::Phone(_) => DeliveryChannel::Sms,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_classifies_targets() {
        assert_eq!(
            Identifier::parse("+15551234567"),
            Some(Identifier::Phone("+15551234567".to_string()))
        );
        assert_eq!(
            Identifier::parse(" Jane@Example.COM "),
            Some(Identifier::Email("jane@example.com".to_string()))
        );
        assert_eq!(Identifier::parse("5551234567"), None);
        assert_eq!(Identifier::parse("@example.com"), None);
    }

    #[test]
    fn test_placeholder_user_from_phone_has_no_password() {
        let user = User::from_identifier(&Identifier::Phone("+15551234567".to_string()));
        assert_eq!(user.phone_number.as_deref(), Some("+15551234567"));
        assert!(user.email.is_none());
        assert!(user.password_hash.is_none());
        assert!(!user.email_verified);
    }

    #[test]
    fn test_profile_omits_password_hash() {
        let user = User::new("Jane".to_string(), Some("jane@example.com".to_string()), None)
            .with_password_hash("$2b$04$hash".to_string());
        let json = serde_json::to_value(user.profile(Some(Role::User))).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "user");
        assert_eq!(json["email"], "jane@example.com");
    }
}
