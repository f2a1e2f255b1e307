// Conversational turn pipeline tasks
pub mod compose_response;
pub mod context_summary;
pub mod extract_details;
pub mod extraction_failed;

// Shared modules
pub mod types;

// Re-export task implementations
pub use compose_response::ComposeResponseTask;
pub use context_summary::ContextSummaryTask;
pub use extract_details::ExtractDetailsTask;
pub use extraction_failed::ExtractionFailedTask;

// Re-export session keys
pub use types::{BestEffort, session_keys};
