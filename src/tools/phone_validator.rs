use crate::entities::{phone_suspicious_reason, PhoneType};
use phonenumber::Mode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneValidationResult {
    pub valid: bool,
    pub e164: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub phone_type: PhoneType,
    pub carrier: Option<String>,
    pub suspicious: bool,
    pub suspicious_reason: Option<String>,
}

const US_TOLL_FREE_PREFIXES: &[&str] = &["800", "888", "877", "866", "855", "844", "833"];
const US_PREMIUM_PREFIXES: &[&str] = &["900"];
const US_VOIP_PREFIXES: &[&str] = &["500"];

fn classify_phone_type(digits: &str) -> PhoneType {
    if digits.len() < 10 {
        return PhoneType::Unknown;
    }
    let area_code = &digits[..3];
    if US_PREMIUM_PREFIXES.contains(&area_code) {
        PhoneType::PremiumRate
    } else if US_TOLL_FREE_PREFIXES.contains(&area_code) {
        PhoneType::TollFree
    } else if US_VOIP_PREFIXES.contains(&area_code) {
        PhoneType::Voip
    } else {
        PhoneType::Landline
    }
}

/// Offline phone validation and suspicious-pattern check. Pure, never
/// performs network I/O — safe to call inline on the hot path.
pub fn validate(phone: &str, region: Option<&str>) -> PhoneValidationResult {
    let region_id: phonenumber::country::Id = region
        .unwrap_or("US")
        .parse()
        .unwrap_or(phonenumber::country::Id::US);

    let has_vanity = phone.chars().any(|c| c.is_ascii_alphabetic());

    let parsed = phonenumber::parse(Some(region_id), phone);
    let Ok(number) = parsed else {
        if !has_vanity {
            return PhoneValidationResult {
                valid: false,
                e164: None,
                country: None,
                region: None,
                phone_type: PhoneType::Unknown,
                carrier: None,
                suspicious: true,
                suspicious_reason: Some("Invalid phone number format".into()),
            };
        }
        return PhoneValidationResult {
            valid: false,
            e164: None,
            country: None,
            region: None,
            phone_type: PhoneType::Unknown,
            carrier: None,
            suspicious: false,
            suspicious_reason: None,
        };
    };

    let valid = phonenumber::is_valid(&number);
    let e164 = number.format().mode(Mode::E164).to_string();
    let country = number.country().id().map(|id| id.as_ref().to_string());
    let national = number.national().to_string();
    let national_digits: String = national.chars().filter(|c| c.is_ascii_digit()).collect();
    let phone_type = classify_phone_type(&national_digits);

    let local = if national_digits.len() > 7 {
        national_digits[national_digits.len() - 7..].to_string()
    } else {
        national_digits
    };
    let suspicious_reason = phone_suspicious_reason(&local, phone_type);

    PhoneValidationResult {
        valid,
        e164: Some(e164),
        country,
        region: None,
        phone_type,
        carrier: None,
        suspicious: suspicious_reason.is_some(),
        suspicious_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_format_without_vanity_is_suspicious() {
        let r = validate("abc", None);
        assert!(!r.valid);
        assert!(r.suspicious);
        assert_eq!(
            r.suspicious_reason.as_deref(),
            Some("Invalid phone number format")
        );
    }

    #[test]
    fn valid_mobile_number_not_suspicious() {
        let r = validate("+14155552671", None);
        assert!(r.valid);
        assert!(!r.suspicious);
    }

    #[test]
    fn premium_rate_number_is_suspicious() {
        let r = validate("+19005551234", None);
        assert_eq!(r.phone_type, PhoneType::PremiumRate);
        assert!(r.suspicious);
    }

    #[test]
    fn idempotent_on_reparsing_e164() {
        let first = validate("+14155552671", None);
        let second = validate(first.e164.as_deref().unwrap(), None);
        assert_eq!(first.e164, second.e164);
        assert_eq!(first.country, second.country);
        assert_eq!(first.phone_type, second.phone_type);
    }
}
