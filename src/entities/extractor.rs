use super::patterns::*;
use super::types::*;
use phonenumber::Mode;
use std::collections::HashSet;

pub const MAX_INPUT_LEN: usize = 5000;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub default_region: String,
    pub filter_common_legit_domains: bool,
    pub filter_common_email_providers: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            default_region: "US".into(),
            filter_common_legit_domains: false,
            filter_common_email_providers: false,
        }
    }
}

const COMMON_LEGIT_DOMAINS: &[&str] = &[
    "google.com",
    "apple.com",
    "microsoft.com",
    "amazon.com",
    "wikipedia.org",
];

const COMMON_EMAIL_PROVIDERS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "icloud.com",
];

/// Replace common obfuscation tricks on a scratch copy of the text. The
/// caller keeps the original for `raw` fields.
pub fn deobfuscate(text: &str) -> String {
    let mut out = text.to_string();
    for (from, to) in DEOBFUSCATION_REPLACEMENTS {
        out = out.replace(from, to);
    }
    out.chars().filter(|c| !is_zero_width(*c)).collect()
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}

fn keypad_digit(c: char) -> Option<char> {
    match c.to_ascii_uppercase() {
        'A' | 'B' | 'C' => Some('2'),
        'D' | 'E' | 'F' => Some('3'),
        'G' | 'H' | 'I' => Some('4'),
        'J' | 'K' | 'L' => Some('5'),
        'M' | 'N' | 'O' => Some('6'),
        'P' | 'Q' | 'R' | 'S' => Some('7'),
        'T' | 'U' | 'V' => Some('8'),
        'W' | 'X' | 'Y' | 'Z' => Some('9'),
        _ => None,
    }
}

fn has_vanity_letters(candidate: &str) -> bool {
    candidate.chars().any(|c| c.is_ascii_alphabetic())
}

fn vanity_to_digits(candidate: &str) -> String {
    candidate
        .chars()
        .map(|c| keypad_digit(c).unwrap_or(c))
        .collect()
}

/// Suspicious-pattern detection over the dialing digits — the national
/// subscriber number, not the country calling code prefix. First match wins,
/// in the listed order.
pub fn phone_suspicious_reason(local_digits: &str, phone_type: PhoneType) -> Option<String> {
    let digits: String = local_digits.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    let bytes: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();

    if bytes.iter().all(|&d| d == 0) {
        return Some("all digits are zero".into());
    }
    if bytes.iter().all(|&d| d == bytes[0]) {
        return Some("all digits are the same".into());
    }
    if bytes.windows(2).all(|w| w[1] as i16 - w[0] as i16 == 1) {
        return Some("digits form a strictly ascending sequence".into());
    }
    if bytes.windows(2).all(|w| w[0] as i16 - w[1] as i16 == 1) {
        return Some("digits form a strictly descending sequence".into());
    }
    if let Some(block_len) = repeating_block_len(&bytes) {
        return Some(format!("digits repeat a {block_len}-digit block"));
    }
    if bytes.len() >= 7 {
        let mut counts = [0u32; 10];
        for &d in &bytes {
            counts[d as usize] += 1;
        }
        let max_count = counts.iter().copied().max().unwrap_or(0);
        if max_count as f64 / bytes.len() as f64 > 0.6 {
            return Some("one digit accounts for most of the number".into());
        }
    }
    if phone_type == PhoneType::PremiumRate {
        return Some("premium-rate number".into());
    }
    None
}

fn repeating_block_len(digits: &[u8]) -> Option<usize> {
    let n = digits.len();
    for block in 3..=(n / 2) {
        if n % block != 0 {
            continue;
        }
        let tiles = digits.chunks(block).all(|chunk| chunk == &digits[..block]);
        if tiles {
            return Some(block);
        }
    }
    None
}

const US_TOLL_FREE_PREFIXES: &[&str] = &["800", "888", "877", "866", "855", "844", "833"];
const US_PREMIUM_PREFIXES: &[&str] = &["900"];
const US_VOIP_PREFIXES: &[&str] = &["500"];

/// `phonenumber` does not expose a reliable cross-region line-type classifier
/// in the version this crate depends on; North American Numbering Plan area
/// codes carry enough signal for the toll-free/premium/VoIP distinction this
/// domain actually needs.
fn classify_phone_type(number: &phonenumber::PhoneNumber) -> PhoneType {
    let national = number.national().to_string();
    let digits: String = national.chars().filter(|c| c.is_ascii_digit()).collect();
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

fn extract_phones(text: &str, opts: &ExtractOptions) -> Vec<Phone> {
    let region: phonenumber::country::Id = opts
        .default_region
        .parse()
        .unwrap_or(phonenumber::country::Id::US);

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for m in PHONE_CANDIDATE.find_iter(text) {
        let raw = m.as_str().to_string();
        let digit_count = raw.chars().filter(|c| c.is_ascii_digit()).count();
        if digit_count < 7 {
            continue;
        }

        let vanity = has_vanity_letters(&raw);
        let normalized_candidate = if vanity { vanity_to_digits(&raw) } else { raw.clone() };

        let parsed = phonenumber::parse(Some(region), &normalized_candidate);
        let (e164, country, valid, phone_type, national_digits) = match parsed {
            Ok(number) => {
                let possible = number.is_possible();
                if !possible && !vanity {
                    continue;
                }
                let valid = phonenumber::is_valid(&number);
                let e164 = number.format().mode(Mode::E164).to_string();
                let country = number.country().id().map(|id| id.as_ref().to_string());
                let national_digits = number.national().to_string();
                (
                    Some(e164),
                    country,
                    valid,
                    classify_phone_type(&number),
                    Some(national_digits),
                )
            }
            Err(_) => {
                if vanity {
                    (None, None, false, PhoneType::Unknown, None)
                } else {
                    continue;
                }
            }
        };

        let key = e164.clone().unwrap_or_else(|| normalized_candidate.clone());
        if !seen.insert(key) {
            continue;
        }

        // Pattern-check the local subscriber number, excluding the area code —
        // "1-800-000-0000" is suspicious because the subscriber part is all
        // zeros, not because the toll-free prefix happens to contain an 8.
        let suspicious_reason = national_digits.as_deref().and_then(|d| {
            let digits_only: String = d.chars().filter(|c| c.is_ascii_digit()).collect();
            let local = if digits_only.len() > 7 {
                digits_only[digits_only.len() - 7..].to_string()
            } else {
                digits_only
            };
            phone_suspicious_reason(&local, phone_type)
        });

        out.push(Phone {
            raw,
            e164,
            country,
            region: None,
            phone_type,
            carrier: None,
            valid,
            suspicious: suspicious_reason.is_some(),
            suspicious_reason,
        });
    }

    out
}

fn strip_trailing_punct(s: &str) -> &str {
    s.trim_end_matches(|c: char| ".,;:!?)'\"".contains(c))
}

fn extract_urls(text: &str, opts: &ExtractOptions) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for m in URL_SCHEME.find_iter(text) {
        push_url(strip_trailing_punct(m.as_str()), &mut seen, &mut out, opts);
    }
    for m in URL_BARE_DOMAIN.find_iter(text) {
        let candidate = strip_trailing_punct(m.as_str());
        if candidate.contains("://") {
            continue;
        }
        push_url(candidate, &mut seen, &mut out, opts);
    }

    out
}

fn push_url(raw: &str, seen: &mut HashSet<String>, out: &mut Vec<Url>, opts: &ExtractOptions) {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let Ok(parsed) = url::Url::parse(&with_scheme) else {
        return;
    };
    let Some(host) = parsed.host_str() else {
        return;
    };
    let domain = host.to_lowercase();
    if opts.filter_common_legit_domains && COMMON_LEGIT_DOMAINS.contains(&domain.as_str()) {
        return;
    }

    let scheme = parsed.scheme().to_string();
    let mut normalized = format!("{scheme}://{domain}");
    if let Some(port) = parsed.port() {
        let default_port = match scheme.as_str() {
            "https" => 443,
            "http" => 80,
            _ => 0,
        };
        if port != default_port {
            normalized.push(':');
            normalized.push_str(&port.to_string());
        }
    }
    normalized.push_str(parsed.path());
    if let Some(q) = parsed.query() {
        normalized.push('?');
        normalized.push_str(q);
    }

    if !seen.insert(normalized.clone()) {
        return;
    }

    let is_shortener = SHORTENER_DOMAINS.iter().any(|s| &domain == s);

    out.push(Url {
        raw: raw.to_string(),
        normalized,
        scheme,
        domain,
        is_shortener,
    });
}

fn extract_emails(text: &str, opts: &ExtractOptions) -> Vec<Email> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for m in EMAIL.find_iter(text) {
        let raw = m.as_str().to_string();
        let normalized = raw.to_lowercase();
        let Some((local, domain)) = normalized.split_once('@') else {
            continue;
        };
        let local = local.to_string();
        let domain = domain.to_string();
        if opts.filter_common_email_providers && COMMON_EMAIL_PROVIDERS.contains(&domain.as_str()) {
            continue;
        }
        if !seen.insert(normalized.clone()) {
            continue;
        }
        out.push(Email {
            raw,
            normalized,
            local,
            domain,
        });
    }

    out
}

fn context_window(text: &str, start: usize, end: usize) -> String {
    let lo = text[..start].char_indices().rev().nth(19).map(|(i, _)| i).unwrap_or(0);
    let hi = text[end..]
        .char_indices()
        .nth(20)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[lo..hi].to_string()
}

fn extract_payments(text: &str, opts: &ExtractOptions) -> Vec<Payment> {
    let _ = opts;
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let lower = text.to_lowercase();

    for m in BITCOIN_ADDRESS.find_iter(text) {
        if seen.insert(m.as_str().to_string()) {
            out.push(Payment {
                kind: PaymentKind::Bitcoin,
                value: m.as_str().to_string(),
                context_window: context_window(text, m.start(), m.end()),
            });
        }
    }

    for m in PAYMENT_HANDLE.find_iter(text) {
        let raw = m.as_str();
        let kind = if raw.starts_with('$') {
            PaymentKind::Cashapp
        } else {
            PaymentKind::Venmo
        };
        if seen.insert(raw.to_string()) {
            out.push(Payment {
                kind,
                value: raw.to_string(),
                context_window: context_window(text, m.start(), m.end()),
            });
        }
    }

    for m in BANK_NUMBER.find_iter(text) {
        let window_lo = m.start().saturating_sub(30);
        let window_hi = (m.end() + 30).min(text.len());
        let ctx_lower = &lower[window_lo.min(lower.len())..window_hi.min(lower.len())];
        let keyword = BANK_NUMBER_CONTEXT_KEYWORDS
            .iter()
            .find(|kw| ctx_lower.contains(*kw));
        if let Some(kw) = keyword {
            let kind = if *kw == "routing" || *kw == "aba" {
                PaymentKind::Routing
            } else {
                PaymentKind::Account
            };
            if seen.insert(m.as_str().to_string()) {
                out.push(Payment {
                    kind,
                    value: m.as_str().to_string(),
                    context_window: context_window(text, m.start(), m.end()),
                });
            }
        }
    }

    if WIRE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        let key = "wire-transfer-keyword-cluster".to_string();
        if seen.insert(key) {
            out.push(Payment {
                kind: PaymentKind::Wire,
                value: "wire transfer".into(),
                context_window: text.chars().take(60).collect(),
            });
        }
    }

    out
}

fn extract_amounts(text: &str) -> Vec<Amount> {
    let mut out = Vec::new();
    for cap in AMOUNT.captures_iter(text) {
        let raw = cap.get(0).unwrap().as_str().to_string();
        let (symbol_or_code, numeric_str) = if let Some(n) = cap.get(2) {
            (cap.get(1).map(|m| m.as_str()), n.as_str())
        } else {
            (cap.get(4).map(|m| m.as_str()), cap.get(3).unwrap().as_str())
        };
        let cleaned: String = numeric_str.chars().filter(|c| *c != ',').collect();
        let Ok(numeric) = cleaned.parse::<f64>() else {
            continue;
        };
        let currency = match symbol_or_code {
            Some("$") | Some("USD") => "USD",
            Some("€") | Some("EUR") => "EUR",
            Some("£") | Some("GBP") => "GBP",
            Some("¥") | Some("JPY") => "JPY",
            Some(s) if s.eq_ignore_ascii_case("dollars") || s.eq_ignore_ascii_case("dollar") => {
                "USD"
            }
            _ => "USD",
        };
        out.push(Amount {
            numeric,
            currency: currency.to_string(),
            raw,
        });
    }
    out
}

fn extract_companies(text: &str) -> Vec<Company> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    if let Ok(matches) = COMPANY_SUFFIX.captures_iter(text).collect::<Result<Vec<_>, _>>() {
        for cap in matches {
            let name = cap.get(1).unwrap().as_str().trim();
            let suffix = cap.get(2).unwrap().as_str();
            let raw = format!("{name} {suffix}");
            let normalized = raw.to_lowercase();
            if seen.insert(normalized.clone()) {
                out.push(Company {
                    raw,
                    normalized,
                    country_hint: None,
                    is_department_variant: false,
                });
            }
        }
    }

    for cap in COMPANY_DEPARTMENT_VARIANT.captures_iter(text) {
        let name = cap.get(1).unwrap().as_str().trim();
        let suffix = cap.get(2).unwrap().as_str();
        let raw = format!("{name} {suffix}");
        let normalized = raw.to_lowercase();
        if seen.insert(normalized.clone()) {
            out.push(Company {
                raw,
                normalized,
                country_hint: None,
                is_department_variant: true,
            });
        }
    }

    out
}

/// Produce normalized, deduplicated entities from raw text. Pure and
/// idempotent: truncates long input head-first before any pattern runs.
pub fn extract(text: &str, opts: &ExtractOptions) -> ExtractedEntities {
    let truncated = if text.chars().count() > MAX_INPUT_LEN {
        text.chars().take(MAX_INPUT_LEN).collect::<String>()
    } else {
        text.to_string()
    };

    let scratch = deobfuscate(&truncated);

    ExtractedEntities {
        phones: extract_phones(&scratch, opts),
        urls: extract_urls(&scratch, opts),
        emails: extract_emails(&scratch, opts),
        payments: extract_payments(&scratch, opts),
        amounts: extract_amounts(&scratch),
        companies: extract_companies(&scratch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ExtractOptions {
        ExtractOptions::default()
    }

    #[test]
    fn empty_input_yields_empty_bundle() {
        let e = extract("", &opts());
        assert!(!e.has_entities());
    }

    #[test]
    fn garbage_input_yields_empty_bundle() {
        let e = extract("asdkjhasdkjh qweoiuqwe", &opts());
        assert!(!e.has_entities());
    }

    #[test]
    fn truncates_long_input() {
        let long = "a".repeat(MAX_INPUT_LEN + 500);
        let e = extract(&long, &opts());
        assert!(!e.has_entities());
    }

    #[test]
    fn extracts_toll_free_with_all_zeros() {
        let e = extract("URGENT: Call 1-800-000-0000 now!", &opts());
        assert_eq!(e.phones.len(), 1);
        let p = &e.phones[0];
        assert!(p.suspicious);
        assert_eq!(p.suspicious_reason.as_deref(), Some("all digits are zero"));
    }

    #[test]
    fn extracts_explicit_scheme_url_and_normalizes() {
        let e = extract("Login at http://secure-bank-2025.tk/path?x=1", &opts());
        assert_eq!(e.urls.len(), 1);
        assert_eq!(e.urls[0].domain, "secure-bank-2025.tk");
        assert_eq!(e.urls[0].scheme, "http");
    }

    #[test]
    fn flags_url_shortener() {
        let e = extract("click https://bit.ly/abc123", &opts());
        assert!(e.urls[0].is_shortener);
    }

    #[test]
    fn extracts_and_lowercases_email() {
        let e = extract("contact Support@Example.COM now", &opts());
        assert_eq!(e.emails[0].normalized, "support@example.com");
        assert_eq!(e.emails[0].domain, "example.com");
    }

    #[test]
    fn extracts_bitcoin_address() {
        let e = extract(
            "Send 0.5 BTC to 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa, visit paypal.com",
            &opts(),
        );
        assert_eq!(e.payments.len(), 1);
        assert_eq!(e.payments[0].kind, PaymentKind::Bitcoin);
        assert_eq!(e.urls.len(), 1);
        assert_eq!(e.urls[0].domain, "paypal.com");
    }

    #[test]
    fn extracts_account_number_with_context_keyword() {
        let e = extract("Please confirm your account number 123456789 today", &opts());
        assert_eq!(e.payments.len(), 1);
        assert_eq!(e.payments[0].kind, PaymentKind::Account);
    }

    #[test]
    fn ignores_bare_digits_without_context() {
        let e = extract("Order number 123456789 shipped", &opts());
        assert!(e.payments.is_empty());
    }

    #[test]
    fn extracts_amount_with_currency_symbol() {
        let e = extract("Please wire $1,250.00 immediately", &opts());
        assert_eq!(e.amounts.len(), 1);
        assert!((e.amounts[0].numeric - 1250.0).abs() < f64::EPSILON);
        assert_eq!(e.amounts[0].currency, "USD");
    }

    #[test]
    fn high_risk_indicator_for_large_amount_with_urgency() {
        let e = extract("Act now and wire $5,000 before it's too late", &opts());
        assert!(e.has_high_risk_indicators("act now and wire $5,000 before it's too late"));
    }

    #[test]
    fn extracts_company_suffix() {
        let e = extract("Please contact Acme Corp for details.", &opts());
        assert_eq!(e.companies.len(), 1);
        assert!(!e.companies[0].is_department_variant);
    }

    #[test]
    fn flags_department_variant() {
        let e = extract("Refunds handled by Acme Fraud Department.", &opts());
        assert_eq!(e.companies.len(), 1);
        assert!(e.companies[0].is_department_variant);
    }

    #[test]
    fn deduplicates_repeated_entities() {
        let e = extract("Call +18005551234 or +1 800 555 1234 again", &opts());
        assert_eq!(e.phones.len(), 1);
    }

    #[test]
    fn deobfuscate_reverses_common_tricks() {
        let out = deobfuscate("visit hxxps://evil[.]com or reach me (at) evil dot com");
        assert!(out.contains("https://evil.com"));
        assert!(out.contains('@'));
    }

    #[test]
    fn phone_suspicious_detects_repeating_block() {
        let reason = phone_suspicious_reason("123123123", PhoneType::Unknown);
        assert!(reason.unwrap().contains("repeat"));
    }

    #[test]
    fn phone_suspicious_detects_sequential() {
        let reason = phone_suspicious_reason("1234567", PhoneType::Unknown);
        assert!(reason.unwrap().contains("ascending"));
    }

    #[test]
    fn phone_not_suspicious_for_normal_number() {
        let reason = phone_suspicious_reason("5552671", PhoneType::Mobile);
        assert!(reason.is_none());
    }
}
