use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ApiError;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9 ()\-]{7,20}$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// At least seven digits, whatever the punctuation.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone) && phone.chars().filter(char::is_ascii_digit).count() >= 7
}

/// Trims and lowercases, then checks the shape.
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(ApiError::validation("Invalid email"))
    }
}

/// Trims and enforces a character-count range.
pub fn bounded_text(field: &str, raw: &str, min: usize, max: usize) -> Result<String, ApiError> {
    let value = raw.trim();
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(value.to_string())
}
