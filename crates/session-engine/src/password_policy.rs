//! Client-side registration checks run before any request is sent.
//!
//! These are advisory. The server stays the authority and may still reject a
//! form that passes here.

use serde::Serialize;
use std::fmt;

/// One failed password rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordViolation {
    TooShort { min_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    Mismatch,
}

impl fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordViolation::TooShort { min_length } => {
                write!(f, "password must be at least {} characters", min_length)
            }
            PasswordViolation::MissingUppercase => {
                f.write_str("password must contain an uppercase letter")
            }
            PasswordViolation::MissingLowercase => {
                f.write_str("password must contain a lowercase letter")
            }
            PasswordViolation::MissingDigit => f.write_str("password must contain a number"),
            PasswordViolation::Mismatch => f.write_str("passwords do not match"),
        }
    }
}

/// Password rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: false,
            require_digit: true,
        }
    }
}

impl PasswordPolicy {
    /// The rules the backend enforces, which add a lowercase requirement.
    pub fn server() -> Self {
        Self {
            require_lowercase: true,
            ..Self::default()
        }
    }

    /// Check a password and its confirmation, reporting every violation.
    ///
    /// Length counts characters, not bytes.
    pub fn check(&self, password: &str, confirmation: &str) -> Result<(), Vec<PasswordViolation>> {
        let mut violations = Vec::new();

        if password != confirmation {
            violations.push(PasswordViolation::Mismatch);
        }
        if password.chars().count() < self.min_length {
            violations.push(PasswordViolation::TooShort {
                min_length: self.min_length,
            });
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            violations.push(PasswordViolation::MissingUppercase);
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::MissingDigit);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// `POST /api/v1/auth/register` body.
#[derive(Clone, Serialize)]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    /// Run the password rules against this form.
    pub fn validate(&self, policy: &PasswordPolicy) -> Result<(), Vec<PasswordViolation>> {
        policy.check(&self.password, &self.confirm_password)
    }
}

impl fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .finish_non_exhaustive()
    }
}
