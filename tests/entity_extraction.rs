use scamwatch_agent::entities::{extract, ExtractOptions};
use scamwatch_agent::tools::validate_phone;

fn opts() -> ExtractOptions {
    ExtractOptions::default()
}

// "Toll-free with invalid pattern": a single phone entity normalizes to
// E.164 and the phone validator flags the all-zeros subscriber number.
#[test]
fn toll_free_invalid_pattern_extracts_suspicious_phone() {
    let extracted = extract("URGENT: Call 1-800-000-0000 now!", &opts());

    assert_eq!(extracted.phones.len(), 1);
    let phone = &extracted.phones[0];
    assert_eq!(phone.e164.as_deref(), Some("+18000000000"));
    assert!(phone.suspicious, "all-zeros toll-free number should be flagged suspicious");

    let revalidated = validate_phone(phone.e164.as_deref().unwrap(), phone.region.as_deref());
    assert!(revalidated.suspicious);
}

// "Multiple conflicting signals": one bitcoin address and one clean URL are
// both picked up, and high-risk indicators trip on the bitcoin payment alone.
#[test]
fn multiple_conflicting_signals_extracts_bitcoin_and_url() {
    let text = "Send 0.5 BTC to 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa, visit paypal.com";
    let extracted = extract(text, &opts());

    assert_eq!(extracted.payments.len(), 1);
    assert_eq!(extracted.urls.len(), 1);
    assert_eq!(extracted.urls[0].domain, "paypal.com");
    assert!(extracted.has_high_risk_indicators(&text.to_lowercase()));
}

// "Fast path": ordinary conversational text carries no extractable entities.
#[test]
fn benign_message_has_no_entities() {
    let extracted = extract("Hi Mom, dinner at 7?", &opts());
    assert!(!extracted.has_entities());
    assert_eq!(extracted.total_count(), 0);
}

// Invariant 4: extraction is idempotent on its own raw input.
#[test]
fn extraction_is_idempotent() {
    let text = "Login at http://secure-bank-2025.tk or email support@secure-bank-2025.tk";
    let first = extract(text, &opts());
    let second = extract(text, &opts());

    assert_eq!(first.urls.len(), second.urls.len());
    assert_eq!(first.emails.len(), second.emails.len());
    assert_eq!(first.urls[0].normalized, second.urls[0].normalized);
    assert_eq!(first.emails[0].normalized, second.emails[0].normalized);
}

// Boundary: input past the extraction cap is truncated before pattern
// matching runs, so entities past the cutoff are never found.
#[test]
fn oversized_input_is_truncated_before_extraction() {
    let padding = "x".repeat(6000);
    let text = format!("{padding} call +1-800-555-0199");
    let extracted = extract(&text, &opts());
    assert!(extracted.phones.is_empty(), "phone past the 5000-char cutoff should not be found");
}

// Invariant 5: phone normalization is idempotent on its own e164 output.
#[test]
fn phone_validation_is_idempotent() {
    let first = validate_phone("+1 (800) 555-1234", Some("US"));
    let e164 = first.e164.clone().expect("valid US number should normalize");
    let second = validate_phone(&e164, Some("US"));

    assert_eq!(first.e164, second.e164);
    assert_eq!(first.country, second.country);
    assert_eq!(first.phone_type, second.phone_type);
}
