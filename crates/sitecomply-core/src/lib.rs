pub mod cache;
pub mod fetch;
pub mod fix;
pub mod provider;
pub mod report;
pub mod sanitize;
pub mod scan;
pub mod score;
pub mod telemetry;

pub use cache::{AuthoritativeCache, AuthoritativeSource, CacheEntry, CacheError, CacheKey, DocumentType};
pub use fetch::{Fetch, FetchError, HttpFetcher, RenderDecision, RenderDelegate, RenderMethod, RenderPool, RenderedDocument};
pub use fix::{ArtifactType, FixEngine, FixError, FixRequest, FixResult, FixSource, FixStatus, Handler};
pub use provider::{ProviderClient, ProviderError, ProviderKind, ProviderSettings, RetryPolicy};
pub use sanitize::{SanitizerConfig, WhiteLabelSanitizer};
pub use scan::{
    CancelToken, Category, Check, CheckKind, CheckSet, Finding, ScanError, ScanRequest, Severity,
    SiteContext,
};
pub use score::{RiskBand, ScanResult, ScoreConfig};
pub use telemetry::{CallOutcome, ProviderCallRecord, Telemetry};
