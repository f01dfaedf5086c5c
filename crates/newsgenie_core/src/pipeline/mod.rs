//! Article enrichment stages and the service that chains them.

pub mod analysis;
pub mod annotate;
pub mod expand;
pub mod extract;
pub mod fetch;

pub use analysis::{AnalysisResult, AnalysisService, SegmentDetail};
pub use annotate::{AnnotatedSegment, TermAnnotator};
pub use expand::DetailExpander;
pub use extract::{ExtractedArticle, SegmentExtractor};
pub use fetch::{validate_article_url, ContentFetcher};
