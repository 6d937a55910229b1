//! The consolidated set of sign-in methods and the credentials each accepts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    Password,
    Otp,
    MagicLink,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::Otp => "otp",
            AuthMethod::MagicLink => "magic-link",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "password" => Ok(AuthMethod::Password),
            "otp" => Ok(AuthMethod::Otp),
            "magic-link" | "magic_link" => Ok(AuthMethod::MagicLink),
            other => Err(format!("Invalid auth method: {}", other)),
        }
    }
}

/// Parses a comma-separated method list such as `password,otp,magic-link`.
pub fn parse_auth_methods(raw: &str) -> Result<Vec<AuthMethod>, String> {
    let mut methods = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let method: AuthMethod = part.parse()?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    if methods.is_empty() {
        return Err("At least one auth method must be enabled".to_string());
    }
    Ok(methods)
}

/// Proof of identity presented to `AuthService::authenticate`.
#[derive(Clone)]
pub enum Credential {
    Password { email: String, password: String },
    Otp { target: String, code: String },
    MagicLink { token: String },
}

impl Credential {
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Password { .. } => AuthMethod::Password,
            Credential::Otp { .. } => AuthMethod::Otp,
            Credential::MagicLink { .. } => AuthMethod::MagicLink,
        }
    }
}

// Secrets stay out of logs even when a credential is debug-printed.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Otp { target, .. } => f
                .debug_struct("Otp")
                .field("target", target)
                .field("code", &"<redacted>")
                .finish(),
            Credential::MagicLink { .. } => f
                .debug_struct("MagicLink")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}
