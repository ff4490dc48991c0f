use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_TEXT_LEN: usize = 2_000;
pub const MAX_LINE_QUANTITY: i64 = 99;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Rejected user input, reported back with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn email(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim().to_ascii_lowercase();
    let mut parts = trimmed.split('@');
    let valid = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    );
    if valid {
        Ok(trimmed)
    } else {
        Err(ValidationError::new("email", "must be a valid email address"))
    }
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

/// Trims and bounds a required short text such as a person or product name.
pub fn required_text(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Normalises optional free text; blank input becomes `None`.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_TEXT_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_TEXT_LEN} characters"),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// Accepts Rwandan mobile numbers (`07XXXXXXXX`, `2507XXXXXXXX`, `+2507XXXXXXXX`)
/// and returns the `+2507XXXXXXXX` form.
pub fn rwanda_phone(value: &str) -> Result<String, ValidationError> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let national = if let Some(rest) = compact.strip_prefix("+250") {
        rest.to_string()
    } else if let Some(rest) = compact.strip_prefix("250") {
        rest.to_string()
    } else if let Some(rest) = compact.strip_prefix('0') {
        rest.to_string()
    } else {
        return Err(invalid_phone());
    };

    let valid = national.len() == 9
        && national.starts_with('7')
        && national.chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(invalid_phone());
    }
    Ok(format!("+250{national}"))
}

fn invalid_phone() -> ValidationError {
    ValidationError::new("phone", "must be a Rwandan mobile number such as 0788123456")
}

pub fn price(field: &'static str, value: i64) -> Result<i64, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    Ok(value)
}

pub fn stock(value: i64) -> Result<i64, ValidationError> {
    if value < 0 {
        return Err(ValidationError::new("stock", "must not be negative"));
    }
    Ok(value)
}

pub fn line_quantity(value: i64) -> Result<i64, ValidationError> {
    if !(1..=MAX_LINE_QUANTITY).contains(&value) {
        return Err(ValidationError::new(
            "quantity",
            format!("must be between 1 and {MAX_LINE_QUANTITY}"),
        ));
    }
    Ok(value)
}

/// Maps an accepted image content type to the file extension used in storage.
pub fn image_extension(content_type: &str) -> Result<&'static str, ValidationError> {
    match content_type.split(';').next().map(str::trim) {
        Some("image/jpeg") => Ok("jpg"),
        Some("image/png") => Ok("png"),
        Some("image/webp") => Ok("webp"),
        _ => Err(ValidationError::new(
            "content_type",
            "only JPEG, PNG and WebP images are accepted",
        )),
    }
}

pub fn image_size(len: usize) -> Result<(), ValidationError> {
    if len == 0 {
        return Err(ValidationError::new("image", "must not be empty"));
    }
    if len > MAX_IMAGE_BYTES {
        return Err(ValidationError::new("image", "must be at most 5 MiB"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(email("  Seller@Kora.RW ").unwrap(), "seller@kora.rw");
        assert!(email("no-at-sign").is_err());
        assert!(email("a@b@c.rw").is_err());
        assert!(email("@kora.rw").is_err());
        assert!(email("user@").is_err());
        assert!(email("a@@kora.rw").is_err());
        assert_eq!(email("user@localhost").unwrap(), "user@localhost");
    }

    #[test]
    fn phone_numbers_are_normalised() {
        assert_eq!(rwanda_phone("0788 123 456").unwrap(), "+250788123456");
        assert_eq!(rwanda_phone("+250-722-000-111").unwrap(), "+250722000111");
        assert_eq!(rwanda_phone("250788123456").unwrap(), "+250788123456");
    }

    #[test]
    fn non_rwandan_or_landline_numbers_are_rejected() {
        assert!(rwanda_phone("+254712345678").is_err());
        assert!(rwanda_phone("0252123456").is_err());
        assert!(rwanda_phone("078812345").is_err());
    }

    #[test]
    fn quantity_bounds() {
        assert!(line_quantity(0).is_err());
        assert_eq!(line_quantity(1), Ok(1));
        assert_eq!(line_quantity(MAX_LINE_QUANTITY), Ok(MAX_LINE_QUANTITY));
        assert!(line_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn required_text_trims_and_rejects_blank() {
        assert_eq!(required_text("name", "  Ikawa  ").unwrap(), "Ikawa");
        let err = required_text("name", "   ").unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn optional_text_drops_blank_values() {
        assert_eq!(optional_text("notes", Some("  ")), Ok(None));
        assert_eq!(
            optional_text("notes", Some(" call first ")),
            Ok(Some("call first".to_string()))
        );
    }

    #[test]
    fn image_rules() {
        assert_eq!(image_extension("image/png"), Ok("png"));
        assert_eq!(image_extension("image/jpeg; charset=binary"), Ok("jpg"));
        assert!(image_extension("application/pdf").is_err());
        assert!(image_size(0).is_err());
        assert!(image_size(MAX_IMAGE_BYTES + 1).is_err());
    }
}
