//! Phone number normalization for outbound dialing.
//!
//! Accepts the formats humans type - `(555) 123-4567`, `555-123-4567`,
//! `+1 555 123 4567` - and produces an E.164-shaped string. Numbers without a
//! leading `+` are assumed to be national numbers in the configured default
//! country when the digit count matches; anything else gets a bare `+`
//! prefix.

/// Normalize a dialable number to E.164 form.
///
/// `default_country` is the country calling code without the `+`
/// (e.g. `"1"` for NANP).
pub fn normalize_phone_number(raw: &str, default_country: &str) -> String {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if has_plus {
        return format!("+{digits}");
    }

    // National number in the default country
    if digits.len() == 10 {
        return format!("+{default_country}{digits}");
    }
    // Already carries the country code
    if digits.len() == 11 && digits.starts_with(default_country) {
        return format!("+{digits}");
    }

    format!("+{digits}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e164_is_idempotent() {
        assert_eq!(normalize_phone_number("+15551234567", "1"), "+15551234567");
        assert_eq!(
            normalize_phone_number(
                &normalize_phone_number("+15551234567", "1"),
                "1"
            ),
            "+15551234567"
        );
    }

    #[test]
    fn test_ten_digit_national_number() {
        assert_eq!(normalize_phone_number("5551234567", "1"), "+15551234567");
    }

    #[test]
    fn test_formatted_variants_normalize_identically() {
        let expected = "+15551234567";
        assert_eq!(normalize_phone_number("(555) 123-4567", "1"), expected);
        assert_eq!(normalize_phone_number("555-123-4567", "1"), expected);
        assert_eq!(normalize_phone_number("555.123.4567", "1"), expected);
        assert_eq!(normalize_phone_number(" 555 123 4567 ", "1"), expected);
    }

    #[test]
    fn test_eleven_digits_with_country_code() {
        assert_eq!(normalize_phone_number("15551234567", "1"), "+15551234567");
    }

    #[test]
    fn test_unrecognized_length_gets_bare_plus() {
        assert_eq!(normalize_phone_number("4471234567890", "1"), "+4471234567890");
        assert_eq!(normalize_phone_number("911", "1"), "+911");
    }

    #[test]
    fn test_plus_with_formatting() {
        assert_eq!(
            normalize_phone_number("+1 (555) 123-4567", "1"),
            "+15551234567"
        );
    }

    #[test]
    fn test_other_default_country() {
        assert_eq!(normalize_phone_number("5551234567", "44"), "+445551234567");
    }
}
