use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PhoneError {
    #[error("Phone number must contain digits only")]
    NonNumeric,
    #[error("Unrecognized phone number format: {0}")]
    Format(String),
}

/// Canonicalizes a mobile number into the 12-digit `254XXXXXXXXX` form the
/// gateway expects. Accepts `07...`, `01...`, `2547...`, `2541...` and an
/// optional leading `+`.
pub fn canonicalize(raw: &str) -> Result<String, PhoneError> {
    let trimmed: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
    let digits = trimmed.strip_prefix('+').unwrap_or(&trimmed);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::NonNumeric);
    }

    match digits.len() {
        10 if digits.starts_with("07") || digits.starts_with("01") => {
            Ok(format!("254{}", &digits[1..]))
        }
        12 if digits.starts_with("2547") || digits.starts_with("2541") => Ok(digits.to_string()),
        _ => Err(PhoneError::Format(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_format_is_prefixed() {
        assert_eq!(canonicalize("0712345678").unwrap(), "254712345678");
        assert_eq!(canonicalize("0112345678").unwrap(), "254112345678");
    }

    #[test]
    fn international_formats_pass_through() {
        assert_eq!(canonicalize("254712345678").unwrap(), "254712345678");
        assert_eq!(canonicalize("+254712345678").unwrap(), "254712345678");
    }

    #[test]
    fn whitespace_is_stripped() {
        assert_eq!(canonicalize(" 0712 345 678 ").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_letters() {
        assert_eq!(canonicalize("071234567a").unwrap_err(), PhoneError::NonNumeric);
    }

    #[test]
    fn rejects_wrong_length_or_prefix() {
        assert!(matches!(canonicalize("071234567").unwrap_err(), PhoneError::Format(_)));
        assert!(matches!(canonicalize("0812345678").unwrap_err(), PhoneError::Format(_)));
        assert!(matches!(canonicalize("255712345678").unwrap_err(), PhoneError::Format(_)));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(canonicalize("  ").unwrap_err(), PhoneError::NonNumeric);
    }
}
