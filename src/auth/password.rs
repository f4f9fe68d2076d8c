use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::Serialize;
use utoipa::ToSchema;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, hashed: &str) -> Result<(), argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let parsed = PasswordHash::new(hashed)?;

    argon2.verify_password(password.as_bytes(), &parsed)
}

const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";
const COMMON_PASSWORDS: [&str; 7] = [
    "clave", "password", "123456", "qwerty", "admin", "12345678", "87654321",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_upper: true,
            require_lower: true,
            require_digit: true,
            require_symbol: true,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PasswordCheck {
    pub valid: bool,
    pub errors: Vec<String>,
    /// 0 to 100
    pub score: u8,
}

impl PasswordCheck {
    pub fn strength(&self) -> &'static str {
        match self.score {
            0..=39 => "very weak",
            40..=59 => "weak",
            60..=79 => "moderate",
            80..=89 => "strong",
            _ => "very strong",
        }
    }
}

pub fn validate_password(password: &str, policy: &PasswordPolicy) -> PasswordCheck {
    let mut errors = Vec::new();
    let mut score: u32 = 0;
    let length = password.chars().count();

    if length < policy.min_length {
        errors.push(format!(
            "Password must be at least {} characters long",
            policy.min_length
        ));
    } else {
        score += 20;
    }

    let mut class = |required: bool, present: bool, points: u32, message: &str| {
        if !required {
            return;
        }
        if present {
            score += points;
        } else {
            errors.push(message.to_string());
        }
    };

    class(
        policy.require_upper,
        password.chars().any(char::is_uppercase),
        15,
        "Password must contain an uppercase letter",
    );
    class(
        policy.require_lower,
        password.chars().any(char::is_lowercase),
        15,
        "Password must contain a lowercase letter",
    );
    class(
        policy.require_digit,
        password.chars().any(|c| c.is_ascii_digit()),
        15,
        "Password must contain a digit",
    );
    class(
        policy.require_symbol,
        password.chars().any(|c| SYMBOLS.contains(c)),
        20,
        "Password must contain a symbol",
    );

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        errors.push("Password is too common".to_string());
    } else {
        score += 15;
    }

    if length >= 12 {
        score += 10;
    }

    PasswordCheck {
        valid: errors.is_empty(),
        errors,
        score: score.min(100) as u8,
    }
}
