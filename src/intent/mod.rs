//! C5: turns a natural-language question into a `QueryPlan`, backed by an
//! injected `Completer` and a process-wide plan cache.
//!
//! - `llm`: the `Completer` trait boundary (pure function, model excluded).
//! - `plan`: the `QueryPlan` contract and extraction output.
//! - `extractor`: prompt construction, ordinal/disambiguation/smart-default
//!   rules, semantic-search fallback, and the plan cache.

pub mod error;
pub mod extractor;
pub mod llm;
pub mod plan;

pub use error::{IntentError, IntentResult};
pub use extractor::{plan_cache_key, IntentExtractor, PlanCache};
pub use llm::{Completer, FixedCompleter};
pub use plan::{
    ConversationTurn, ExtractionOutput, FilterOperator, OrderBy, PlanFilter, QueryPlan, SortDir,
    TimeGrain, TimeRange, MAX_HISTORY_TURNS,
};
