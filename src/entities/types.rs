use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneType {
    Mobile,
    Landline,
    TollFree,
    Voip,
    PremiumRate,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phone {
    pub raw: String,
    pub e164: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    #[serde(rename = "type")]
    pub phone_type: PhoneType,
    pub carrier: Option<String>,
    pub valid: bool,
    pub suspicious: bool,
    pub suspicious_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Url {
    pub raw: String,
    pub normalized: String,
    pub scheme: String,
    pub domain: String,
    pub is_shortener: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub raw: String,
    pub normalized: String,
    pub local: String,
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Account,
    Routing,
    Bitcoin,
    Venmo,
    Cashapp,
    Wire,
    Generic,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Routing => "routing",
            Self::Bitcoin => "bitcoin",
            Self::Venmo => "venmo",
            Self::Cashapp => "cashapp",
            Self::Wire => "wire",
            Self::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub kind: PaymentKind,
    pub value: String,
    pub context_window: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amount {
    pub numeric: f64,
    pub currency: String,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub raw: String,
    pub normalized: String,
    pub country_hint: Option<String>,
    pub is_department_variant: bool,
}

/// Any single extracted entity — the unit the orchestrator fans tools out over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum Entity {
    Phone(Phone),
    Url(Url),
    Email(Email),
    Payment(Payment),
    Amount(Amount),
    Company(Company),
}

impl Entity {
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::Phone(_) => "phone",
            Self::Url(_) => "url",
            Self::Email(_) => "email",
            Self::Payment(p) => p.kind.as_str(),
            Self::Amount(_) => "amount",
            Self::Company(_) => "company",
        }
    }

    /// The normalized value used for dedup keys and registry lookups.
    pub fn normalized_key(&self) -> String {
        match self {
            Self::Phone(p) => p.e164.clone().unwrap_or_else(|| p.raw.clone()),
            Self::Url(u) => u.normalized.clone(),
            Self::Email(e) => e.normalized.clone(),
            Self::Payment(p) => p.value.clone(),
            Self::Amount(a) => format!("{}{}", a.currency, a.numeric),
            Self::Company(c) => c.normalized.clone(),
        }
    }
}

/// An immutable bundle of everything extracted from one piece of text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub phones: Vec<Phone>,
    pub urls: Vec<Url>,
    pub emails: Vec<Email>,
    pub payments: Vec<Payment>,
    pub amounts: Vec<Amount>,
    pub companies: Vec<Company>,
}

/// Phrases whose co-occurrence with a large amount or a wire/bitcoin payment
/// signals urgency manipulation, independent of any tool's verdict.
const URGENCY_PHRASES: &[&str] = &[
    "act now",
    "urgent",
    "immediately",
    "right away",
    "verify your account",
    "suspended",
    "final notice",
    "limited time",
    "within 24 hours",
    "before it's too late",
];

impl ExtractedEntities {
    pub fn has_entities(&self) -> bool {
        !self.phones.is_empty()
            || !self.urls.is_empty()
            || !self.emails.is_empty()
            || !self.payments.is_empty()
            || !self.amounts.is_empty()
            || !self.companies.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.phones.len()
            + self.urls.len()
            + self.emails.len()
            + self.payments.len()
            + self.amounts.len()
            + self.companies.len()
    }

    /// True if any bitcoin/wire payment is present, or a large amount
    /// co-occurs with urgency language in the source text.
    pub fn has_high_risk_indicators(&self, source_text_lower: &str) -> bool {
        let has_bitcoin_or_wire = self
            .payments
            .iter()
            .any(|p| matches!(p.kind, PaymentKind::Bitcoin | PaymentKind::Wire));
        if has_bitcoin_or_wire {
            return true;
        }
        let has_large_amount = self.amounts.iter().any(|a| a.numeric >= 500.0);
        if !has_large_amount {
            return false;
        }
        URGENCY_PHRASES
            .iter()
            .any(|phrase| source_text_lower.contains(phrase))
    }

    pub fn into_entities(self) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.total_count());
        out.extend(self.phones.into_iter().map(Entity::Phone));
        out.extend(self.urls.into_iter().map(Entity::Url));
        out.extend(self.emails.into_iter().map(Entity::Email));
        out.extend(self.payments.into_iter().map(Entity::Payment));
        out.extend(self.amounts.into_iter().map(Entity::Amount));
        out.extend(self.companies.into_iter().map(Entity::Company));
        out
    }
}
