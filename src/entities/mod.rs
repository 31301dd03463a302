mod extractor;
mod patterns;
mod types;

pub use extractor::{deobfuscate, extract, phone_suspicious_reason, ExtractOptions, MAX_INPUT_LEN};
pub use patterns::{SHORTENER_DOMAINS, TRUSTED_SEARCH_SOURCES};
pub use types::{
    Amount, Company, Email, Entity, ExtractedEntities, Payment, PaymentKind, Phone, PhoneType,
    Url,
};
