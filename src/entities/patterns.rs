use fancy_regex::Regex as FancyRegex;
use regex::Regex;
use std::sync::LazyLock;

/// Explicit-scheme URL: `https?://…`.
pub static URL_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bhttps?://[^\s<>\x22']+").unwrap()
});

/// Bare domain with a plausible TLD, no scheme.
pub static URL_BARE_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}\b").unwrap()
});

pub static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,24}\b").unwrap()
});

/// Matches a candidate phone number, including vanity-letter variants like
/// `1-800-FLOWERS`; letters are mapped to digits before parsing.
pub static PHONE_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?\d[\d\s().\-]{6,18}\d|\b1?[\s.-]?\(?[2-9][0-9]{2}\)?[\s.-]?[2-9A-Z]{3}[\s.-]?[0-9A-Z]{4}\b)")
        .unwrap()
});

pub static BITCOIN_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[13][a-km-zA-HJ-NP-Z1-9]{25,34}|bc1[a-z0-9]{25,59})\b").unwrap()
});

/// Venmo/CashApp style `$handle` or `@handle` tokens, case-sensitive on the sigil.
pub static PAYMENT_HANDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\$[A-Za-z][A-Za-z0-9_-]{2,30}|@[A-Za-z][A-Za-z0-9_-]{2,30})").unwrap()
});

/// Bank account/routing numbers, matched only with a nearby keyword —
/// applied by the extractor as a proximity check, not a bare digit scan.
pub static BANK_NUMBER_CONTEXT_KEYWORDS: &[&str] =
    &["account", "routing", "aba", "acct", "iban", "sort code"];
pub static BANK_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{6,17}\b").unwrap());

pub static WIRE_KEYWORDS: &[&str] = &[
    "wire transfer",
    "wire the money",
    "western union",
    "moneygram",
    "swift code",
];

pub static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:([$€£¥]|USD|EUR|GBP|JPY)\s?([0-9][0-9,]*(?:\.[0-9]+)?)|([0-9][0-9,]*(?:\.[0-9]+)?)\s?(USD|EUR|GBP|JPY|dollars?))")
        .unwrap()
});

/// Negative lookahead requires `fancy_regex`: suffix must not be immediately
/// preceded by "Department|Division|Unit|Center" (that's the suspicious variant,
/// matched separately by COMPANY_DEPARTMENT_VARIANT).
pub static COMPANY_SUFFIX: LazyLock<FancyRegex> = LazyLock::new(|| {
    FancyRegex::new(
        r"(?i)\b([A-Z][A-Za-z0-9&,.\s]{1,60}?)\s(Pte Ltd|Inc\.?|Corp\.?|Limited|LLC|Company|Corporation)\b",
    )
    .unwrap()
});

pub static COMPANY_DEPARTMENT_VARIANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z][A-Za-z0-9&,.\s]{1,60}?)\s(Department|Division|Unit|Center)\b")
        .unwrap()
});

pub const SHORTENER_DOMAINS: &[&str] = &[
    "bit.ly", "t.co", "tinyurl.com", "goo.gl", "ow.ly", "is.gd", "buff.ly", "rebrand.ly",
];

pub const TRUSTED_SEARCH_SOURCES: &[&str] = &[
    "reddit.com",
    "bbb.org",
    "ftc.gov",
    "consumer.ftc.gov",
    "trustpilot.com",
    "consumeraffairs.com",
    "complaintsboard.com",
    "ripoffreport.com",
    "ic3.gov",
    "scamwarners.com",
    "scamalert.sg",
];

/// Obfuscation reversal pairs applied in order; see `deobfuscate`.
pub const DEOBFUSCATION_REPLACEMENTS: &[(&str, &str)] = &[
    ("hxxps", "https"),
    ("hxxp", "http"),
    ("[.]", "."),
    ("(.)", "."),
    ("{dot}", "."),
    (" dot ", "."),
    ("[at]", "@"),
    ("(at)", "@"),
    (" at ", "@"),
];
