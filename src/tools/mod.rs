pub mod domain_reputation;
pub mod phone_validator;
pub mod registry;
pub mod websearch;

pub use domain_reputation::{DomainReputationResult, DomainReputationTool, RiskLevel};
pub use phone_validator::{validate as validate_phone, PhoneValidationResult};
pub use registry::{risk_score, ScamLookupResult, ScamRegistry};
pub use websearch::{SearchResponse, SearchResult, WebSearchTool};
