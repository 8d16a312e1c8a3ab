//! Validation and sanitization of product image URLs.
//!
//! Both checks are synchronous and side-effect free apart from advisory
//! logging of rejected input.

use tracing::warn;
use url::Url;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];
const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

/// Scheme tokens that are rejected wherever they appear in the raw input,
/// even when the parsed scheme is http/https.
const BLOCKED_PATTERNS: [&str; 3] = ["javascript:", "data:", "vbscript:"];

pub const ERR_MISSING: &str = "No URL provided";
pub const ERR_FORMAT: &str = "Invalid URL format";
pub const ERR_PROTOCOL: &str = "Invalid protocol";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
    /// Advisory only; never affects `is_valid`.
    pub note: Option<String>,
}

impl ValidationResult {
    fn invalid(reason: &str) -> Self {
        Self {
            is_valid: false,
            error: Some(reason.to_string()),
            note: None,
        }
    }
}

pub fn validate_image_url(url: Option<&str>) -> ValidationResult {
    let Some(raw) = url.filter(|raw| !raw.is_empty()) else {
        return ValidationResult::invalid(ERR_MISSING);
    };

    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => return ValidationResult::invalid(ERR_FORMAT),
    };

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return ValidationResult::invalid(ERR_PROTOCOL);
    }

    let note = if has_image_extension(&parsed) {
        None
    } else {
        warn!(url = raw, "url may not be an image");
        Some(format!("URL may not be an image: {raw}"))
    };

    ValidationResult {
        is_valid: true,
        error: None,
        note,
    }
}

/// Returns the input unchanged when it is safe to hand to an image loader.
pub fn sanitize_image_url(url: Option<&str>) -> Option<String> {
    let raw = url.filter(|raw| !raw.is_empty())?;

    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(url = raw, "invalid image url format");
            return None;
        }
    };

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        warn!(url = raw, scheme = parsed.scheme(), "blocked non-http image url");
        return None;
    }

    if contains_blocked_pattern(raw) {
        warn!(url = raw, "blocked suspicious image url");
        return None;
    }

    Some(raw.to_string())
}

fn has_image_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.contains(ext))
}

fn contains_blocked_pattern(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    BLOCKED_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_is_invalid() {
        let result = validate_image_url(None);
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some(ERR_MISSING));
        assert_eq!(validate_image_url(Some("")).error.as_deref(), Some(ERR_MISSING));
        assert_eq!(sanitize_image_url(None), None);
        assert_eq!(sanitize_image_url(Some("")), None);
    }

    #[test]
    fn malformed_input_is_invalid() {
        let result = validate_image_url(Some("not a url"));
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some(ERR_FORMAT));
        assert_eq!(sanitize_image_url(Some("not a url")), None);
        assert_eq!(sanitize_image_url(Some("/images/bowl.png")), None);
    }

    #[test]
    fn non_http_schemes_are_rejected_by_both_checks() {
        for input in [
            "javascript:alert(1)",
            "data:image/png;base64,AAAA",
            "vbscript:msgbox(1)",
            "ftp://example.com/photo.jpg",
            "file:///etc/passwd",
            "mailto:someone@example.com",
        ] {
            let result = validate_image_url(Some(input));
            assert!(!result.is_valid, "{input} should be invalid");
            assert_eq!(result.error.as_deref(), Some(ERR_PROTOCOL), "{input}");
            assert_eq!(sanitize_image_url(Some(input)), None, "{input}");
        }
    }

    #[test]
    fn blocked_tokens_are_rejected_even_under_https() {
        for input in [
            "https://x/?x=javascript:alert(1)",
            "https://cdn.example.com/img.png?src=DATA:text/html",
            "http://example.com/VbScript:run/photo.jpg",
            "https://example.com/#JavaScript:void(0)",
        ] {
            assert!(validate_image_url(Some(input)).is_valid, "{input}");
            assert_eq!(sanitize_image_url(Some(input)), None, "{input}");
        }
    }

    #[test]
    fn http_and_https_pass_through_unchanged() {
        let input = "https://example.com/photo.jpg";
        let result = validate_image_url(Some(input));
        assert!(result.is_valid);
        assert_eq!(result.error, None);
        assert_eq!(result.note, None);
        assert_eq!(sanitize_image_url(Some(input)).as_deref(), Some(input));

        let plain = "http://shop.example.com/Images/Hose.PNG?v=2";
        assert_eq!(sanitize_image_url(Some(plain)).as_deref(), Some(plain));
        assert_eq!(validate_image_url(Some(plain)).note, None);
    }

    #[test]
    fn missing_extension_only_adds_a_note() {
        let result = validate_image_url(Some("https://example.com/products/12345"));
        assert!(result.is_valid);
        assert_eq!(result.error, None);
        assert!(result.note.unwrap().contains("may not be an image"));
    }
}
