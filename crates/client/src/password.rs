//! Local password and email checks run before any remote call.

use std::fmt;
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Characters accepted as the required symbol.
pub const PASSWORD_SYMBOLS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    MinLength,
    Uppercase,
    Digit,
    Symbol,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::MinLength => write!(f, "{}+ characters", MIN_PASSWORD_LEN),
            Requirement::Uppercase => write!(f, "an uppercase letter"),
            Requirement::Digit => write!(f, "a digit"),
            Requirement::Symbol => write!(f, "a symbol"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Password is required")]
    Empty,

    #[error("Passwords do not match")]
    Mismatch,

    #[error("Password must have 8+ characters, an uppercase letter, a digit and a symbol (missing: {})", list(.0))]
    Weak(Vec<Requirement>),

    #[error("Enter a valid email address")]
    InvalidEmail,
}

fn list(missing: &[Requirement]) -> String {
    missing
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Requirements of the password policy that `password` does not meet.
pub fn missing_requirements(password: &str) -> Vec<Requirement> {
    let mut missing = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        missing.push(Requirement::MinLength);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        missing.push(Requirement::Uppercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push(Requirement::Digit);
    }
    if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        missing.push(Requirement::Symbol);
    }
    missing
}

/// Checks a new password against its confirmation and the strength policy.
pub fn validate(password: &str, confirmation: &str) -> Result<(), PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    if password != confirmation {
        return Err(PasswordError::Mismatch);
    }
    validate_strength(password)
}

pub fn validate_strength(password: &str) -> Result<(), PasswordError> {
    let missing = missing_requirements(password);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PasswordError::Weak(missing))
    }
}

/// Loose `local@domain.tld` shape check with no whitespace.
pub fn validate_email(email: &str) -> Result<(), PasswordError> {
    let email = email.trim();
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return Err(PasswordError::InvalidEmail);
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(PasswordError::InvalidEmail);
    };
    if local.is_empty() || domain.contains('@') {
        return Err(PasswordError::InvalidEmail);
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(PasswordError::InvalidEmail),
    }
}
