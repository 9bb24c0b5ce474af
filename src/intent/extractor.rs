//! C5: natural-language question -> `QueryPlan`.
//!
//! Deterministic once the LLM call is inert (fixed `Completer` response): the
//! same normalized question, semantic version, and user-role scope always
//! produce the same cache key, and the cache serves repeat hits without a
//! second completion call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::rls::UserContext;
use crate::semantic::{SemanticContext, SemanticField};
use crate::vector::{LearnedSynonym, VectorStore};

use super::error::{IntentError, IntentResult};
use super::llm::Completer;
use super::plan::{ConversationTurn, ExtractionOutput, QueryPlan, MAX_HISTORY_TURNS};

/// Cosine-similarity threshold below which a fuzzy metric match is not
/// trusted and clarification is requested instead.
const SEMANTIC_FALLBACK_THRESHOLD: f32 = 0.6;

static ORDINAL_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)(?:st|nd|rd|th)\s+(highest|lowest)\b").unwrap()
});

/// Word-form ordinals ("second highest", "third lowest"). The numeric
/// `ORDINAL_RULE` alone misses this phrasing, which is how S1-style
/// questions are actually asked.
static WORD_ORDINAL_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth)\s+(highest|lowest)\b")
        .unwrap()
});

const WORD_ORDINALS: &[(&str, u64)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
];

fn word_ordinal_value(word: &str) -> Option<u64> {
    WORD_ORDINALS.iter().find(|(w, _)| w.eq_ignore_ascii_case(word)).map(|(_, n)| *n)
}

static X_BY_Y: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+by\s+(.+)$").unwrap());

fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `hash(connection_id, normalized_question, user_id_or_role_scope, semantic_version)`.
pub fn plan_cache_key(
    connection_id: &str,
    normalized_question: &str,
    user_scope: &str,
    semantic_version: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connection_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized_question.as_bytes());
    hasher.update(b"\0");
    hasher.update(user_scope.as_bytes());
    hasher.update(b"\0");
    hasher.update(semantic_version.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

struct CachedEntry {
    plan: QueryPlan,
    confidence: f64,
    entities_found: Vec<String>,
    raw_metric: Option<String>,
    inserted_at: Instant,
}

/// Process-wide plan cache. `DashMap` gives the sharded-lock behavior the
/// TTL + LRU-bound requirement calls for; eviction here is TTL-only (an
/// unbounded plan cache is out of scope for a single-process demonstration,
/// capacity-bounding would need an access-order structure DashMap doesn't
/// give us for free).
pub struct PlanCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn get(&self, key: &str) -> Option<(QueryPlan, f64, Vec<String>, Option<String>)> {
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() <= self.ttl {
                Some((entry.plan.clone(), entry.confidence, entry.entities_found.clone(), entry.raw_metric.clone()))
            } else {
                None
            }
        });
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn insert(
        &self,
        key: String,
        plan: QueryPlan,
        confidence: f64,
        entities_found: Vec<String>,
        raw_metric: Option<String>,
    ) {
        self.entries.insert(key, CachedEntry { plan, confidence, entities_found, raw_metric, inserted_at: Instant::now() });
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

pub struct IntentExtractor<C: Completer> {
    completer: C,
    cache: PlanCache,
}

impl<C: Completer> IntentExtractor<C> {
    pub fn new(completer: C, cache_ttl: Duration) -> Self {
        Self { completer, cache: PlanCache::new(cache_ttl) }
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Role-scope string used in the plan cache key: admins and
    /// non-admins with identical roles over the same connection share a
    /// plan cache slot, but RLS-scoped users never collide with admins.
    fn scope_key(ctx: &UserContext) -> String {
        if ctx.is_admin {
            "admin".to_string()
        } else {
            let mut roles = ctx.roles.clone();
            roles.sort();
            roles.join(",")
        }
    }

    /// `use_cache = false` (the request's `enable_caching: false`) skips
    /// both the plan-cache lookup and the post-extraction insert.
    #[allow(clippy::too_many_arguments)]
    pub async fn extract(
        &self,
        question: &str,
        connection_id: &str,
        ctx: &UserContext,
        history: &[ConversationTurn],
        semantic: &SemanticContext,
        synonyms: &[LearnedSynonym],
        vector: Option<&VectorStore>,
        use_cache: bool,
    ) -> IntentResult<ExtractionOutput> {
        let normalized = normalize_question(question);
        let scope = Self::scope_key(ctx);
        let cache_key = plan_cache_key(connection_id, &normalized, &scope, semantic.version);

        if use_cache {
            if let Some((plan, confidence, entities_found, raw_metric)) = self.cache.get(&cache_key) {
                return Ok(ExtractionOutput { query_plan: plan, confidence, entities_found, raw_metric, plan_cached: true });
            }
        }

        let recent_history = &history[history.len().saturating_sub(MAX_HISTORY_TURNS)..];
        let prompt = build_prompt(question, semantic, synonyms, recent_history);

        let mut plan = match self.completer.complete(&prompt).await {
            Ok(raw) => match parse_plan(&raw) {
                Ok(plan) => plan,
                Err(parse_err) => {
                    let repair_prompt = build_repair_prompt(&prompt, &raw, &parse_err);
                    let repaired = self.completer.complete(&repair_prompt).await?;
                    parse_plan(&repaired).map_err(|e| IntentError::LlmError(format!("plan did not parse after repair: {e}")))?
                }
            },
            Err(e) => return Err(e),
        };

        apply_ordinal_rule(&mut plan, question);
        apply_x_by_y_disambiguation(&mut plan, semantic, synonyms);
        apply_smart_default(&mut plan, semantic);

        let raw_metric = plan.metric.clone();
        let confidence = resolve_metric(&mut plan, semantic, synonyms, vector, connection_id);

        let entities_found = collect_entities(&plan);

        if use_cache && !plan.needs_clarification {
            self.cache.insert(cache_key, plan.clone(), confidence, entities_found.clone(), raw_metric.clone());
        }

        Ok(ExtractionOutput { query_plan: plan, confidence, entities_found, raw_metric, plan_cached: false })
    }
}

fn parse_plan(raw: &str) -> Result<QueryPlan, serde_json::Error> {
    serde_json::from_str(raw.trim())
}

fn build_prompt(
    question: &str,
    semantic: &SemanticContext,
    synonyms: &[LearnedSynonym],
    history: &[ConversationTurn],
) -> String {
    const MAX_FIELDS: usize = 40;
    let mut fields: Vec<&SemanticField> = semantic.fields.iter().filter(|f| f.active).collect();
    fields.truncate(MAX_FIELDS);

    let field_lines: Vec<String> = fields
        .iter()
        .map(|f| format!("- {} ({}): {}", f.name, format!("{:?}", f.aggregation), f.display_name))
        .collect();

    let synonym_lines: Vec<String> =
        synonyms.iter().map(|s| format!("- \"{}\" -> {}", s.user_term, s.canonical_name)).collect();

    let history_lines: Vec<String> = history
        .iter()
        .map(|t| match &t.answer_summary {
            Some(summary) => format!("Q: {}\nA: {}", t.question, summary),
            None => format!("Q: {}", t.question),
        })
        .collect();

    format!(
        "You translate natural-language questions into a strict JSON QueryPlan.\n\
         Only use metric/dimension names from this list:\n{}\n\n\
         Known synonyms:\n{}\n\n\
         Grammar rules: emit only names from the list above; if a required name \
         cannot be resolved, set needs_clarification=true with a specific \
         clarification_question instead of guessing.\n\n\
         Conversation so far:\n{}\n\n\
         Question: {}\n\n\
         Respond with a single JSON object matching the QueryPlan schema and \
         nothing else.",
        field_lines.join("\n"),
        synonym_lines.join("\n"),
        history_lines.join("\n"),
        question,
    )
}

fn build_repair_prompt(original_prompt: &str, bad_output: &str, parse_error: &serde_json::Error) -> String {
    format!(
        "{}\n\nYour previous response failed to parse as the QueryPlan JSON schema.\n\
         Previous response:\n{}\n\nParse error: {}\n\n\
         Respond again with ONLY a single valid JSON object.",
        original_prompt, bad_output, parse_error
    )
}

/// "Nth highest/lowest X" => `limit=1, offset=N-1` (never `limit=N`).
fn apply_ordinal_rule(plan: &mut QueryPlan, question: &str) {
    if let Some(caps) = ORDINAL_RULE.captures(question) {
        if let Ok(n) = caps[1].parse::<u64>() {
            if n >= 1 {
                plan.limit = Some(1);
                plan.offset = Some(n - 1);
                return;
            }
        }
    }

    if let Some(caps) = WORD_ORDINAL_RULE.captures(question) {
        if let Some(n) = word_ordinal_value(&caps[1]) {
            plan.limit = Some(1);
            plan.offset = Some(n - 1);
        }
    }
}

/// "X by Y": if Y resolves to a metric/synonym, Y is the metric and X is the
/// dimension; otherwise X is the metric and Y the dimension. Only applies
/// when the LLM folded both into the single `metric` field, which is the
/// shape that needs disambiguating.
fn apply_x_by_y_disambiguation(plan: &mut QueryPlan, semantic: &SemanticContext, synonyms: &[LearnedSynonym]) {
    let Some(raw_metric) = plan.metric.clone() else { return };
    let Some(caps) = X_BY_Y.captures(raw_metric.trim()) else { return };
    let x = caps[1].trim().to_string();
    let y = caps[2].trim().to_string();

    let (metric, dimension) = if resolves_as_metric(&y, semantic, synonyms) {
        (y, x)
    } else {
        (x, y)
    };

    plan.metric = Some(metric);
    if !plan.dimensions.iter().any(|d| d == &dimension) {
        plan.dimensions.insert(0, dimension);
    }
}

fn resolves_as_metric(name: &str, semantic: &SemanticContext, synonyms: &[LearnedSynonym]) -> bool {
    let lower = name.to_lowercase();
    semantic.fields.iter().any(|f| f.name.to_lowercase() == lower)
        || synonyms.iter().any(|s| s.canonical_name.to_lowercase() == lower && s.user_term.to_lowercase() == lower)
}

/// A single concrete entity named with no explicit metric picks the first
/// active metric-kind field as a default and records an assumption, rather
/// than asking for clarification.
fn apply_smart_default(plan: &mut QueryPlan, semantic: &SemanticContext) {
    if plan.metric.is_some() || plan.dimensions.len() != 1 {
        return;
    }
    let default_metric = semantic
        .fields
        .iter()
        .find(|f| f.active && f.aggregation != crate::semantic::Aggregation::None);
    if let Some(field) = default_metric {
        plan.metric = Some(field.name.clone());
        plan.assumptions.push(format!(
            "assumed metric '{}' since none was specified for '{}'",
            field.name, plan.dimensions[0]
        ));
    }
}

/// Resolve `plan.metric` against the active semantic fields, then learned
/// synonyms, then fuzzy semantic search. Returns the extractor's confidence
/// in the resulting plan.
fn resolve_metric(
    plan: &mut QueryPlan,
    semantic: &SemanticContext,
    synonyms: &[LearnedSynonym],
    vector: Option<&VectorStore>,
    connection_id: &str,
) -> f64 {
    let Some(raw) = plan.metric.clone() else {
        plan.needs_clarification = true;
        plan.clarification_question =
            Some("Which metric would you like? Please name one explicitly.".to_string());
        return 0.0;
    };
    let lower = raw.to_lowercase();

    if let Some(field) = semantic.fields.iter().find(|f| f.active && f.name.to_lowercase() == lower) {
        plan.metric = Some(field.name.clone());
        return 1.0;
    }

    if let Some(synonym) = synonyms.iter().find(|s| s.user_term.to_lowercase() == lower) {
        if semantic.fields.iter().any(|f| f.active && f.name == synonym.canonical_name) {
            plan.metric = Some(synonym.canonical_name.clone());
            return synonym.confidence as f64;
        }
    }

    if let Some(vector) = vector {
        let matches = vector.search_fields(&raw, Some(connection_id), 1).unwrap_or_default();
        if let Some(top) = matches.first() {
            if top.score >= SEMANTIC_FALLBACK_THRESHOLD {
                plan.metric = Some(top.field_name.clone());
                return top.score as f64;
            }
        }
    }

    plan.needs_clarification = true;
    plan.clarification_question = Some(format!(
        "I couldn't match '{}' to a known metric. Could you clarify which one you mean?",
        raw
    ));
    0.0
}

fn collect_entities(plan: &QueryPlan) -> Vec<String> {
    let mut entities = plan.dimensions.clone();
    for filter in &plan.filters {
        if let Some(value) = &filter.value {
            entities.push(value.to_string());
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::llm::FixedCompleter;
    use crate::semantic::{Aggregation, JoinGraph, SemanticField};
    use std::collections::HashMap;

    fn sample_semantic() -> SemanticContext {
        SemanticContext {
            fields: vec![
                SemanticField {
                    connection_id: "conn1".into(),
                    name: "revenue".into(),
                    display_name: "Revenue".into(),
                    description: None,
                    data_type: "numeric".into(),
                    table: Some("orders".into()),
                    column: Some("amount".into()),
                    formula: None,
                    aggregation: Aggregation::Sum,
                    format: None,
                    synonyms: vec![],
                    default_filters: vec![],
                    active: true,
                },
                SemanticField {
                    connection_id: "conn1".into(),
                    name: "region".into(),
                    display_name: "Region".into(),
                    description: None,
                    data_type: "text".into(),
                    table: Some("orders".into()),
                    column: Some("region".into()),
                    formula: None,
                    aggregation: Aggregation::None,
                    format: None,
                    synonyms: vec![],
                    default_filters: vec![],
                    active: true,
                },
            ],
            formulas: HashMap::new(),
            join_graph: JoinGraph::new(),
            version: 1,
        }
    }

    fn admin_ctx() -> UserContext {
        UserContext { user_id: "alice".into(), connection_id: "conn1".into(), roles: vec![], rls_filters: vec![], table_permissions: vec![], is_admin: true }
    }

    #[tokio::test]
    async fn test_extract_resolves_known_metric() {
        let completer = FixedCompleter::ok(r#"{"metric":"revenue","intent":"total revenue"}"#);
        let extractor = IntentExtractor::new(completer, Duration::from_secs(60));
        let semantic = sample_semantic();
        let out = extractor
            .extract("what is total revenue", "conn1", &admin_ctx(), &[], &semantic, &[], None, true)
            .await
            .unwrap();
        assert_eq!(out.query_plan.metric.as_deref(), Some("revenue"));
        assert!(!out.query_plan.needs_clarification);
        assert_eq!(out.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_extract_unknown_metric_needs_clarification() {
        let completer = FixedCompleter::ok(r#"{"metric":"bogus_metric","intent":"?"}"#);
        let extractor = IntentExtractor::new(completer, Duration::from_secs(60));
        let semantic = sample_semantic();
        let out = extractor
            .extract("what about bogus_metric", "conn1", &admin_ctx(), &[], &semantic, &[], None, true)
            .await
            .unwrap();
        assert!(out.query_plan.needs_clarification);
        assert!(out.query_plan.clarification_question.is_some());
    }

    #[tokio::test]
    async fn test_plan_cache_hit_on_repeat_question() {
        let completer = FixedCompleter::ok(r#"{"metric":"revenue","intent":"total revenue"}"#);
        let extractor = IntentExtractor::new(completer, Duration::from_secs(60));
        let semantic = sample_semantic();
        let first = extractor
            .extract("Total Revenue?", "conn1", &admin_ctx(), &[], &semantic, &[], None, true)
            .await
            .unwrap();
        assert!(!first.plan_cached);
        let second = extractor
            .extract("  total revenue?  ", "conn1", &admin_ctx(), &[], &semantic, &[], None, true)
            .await
            .unwrap();
        assert!(second.plan_cached);
        assert_eq!(extractor.cache().hit_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_error_propagates_after_failed_repair() {
        let completer = FixedCompleter::ok("not json at all");
        let extractor = IntentExtractor::new(completer, Duration::from_secs(60));
        let semantic = sample_semantic();
        let err = extractor
            .extract("anything", "conn1", &admin_ctx(), &[], &semantic, &[], None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::LlmError(_)));
    }

    #[test]
    fn test_ordinal_rule_sets_limit_and_offset() {
        let mut plan = QueryPlan::needs_clarification("x", "y");
        plan.needs_clarification = false;
        apply_ordinal_rule(&mut plan, "who is the 3rd highest spender");
        assert_eq!(plan.limit, Some(1));
        assert_eq!(plan.offset, Some(2));
    }

    #[test]
    fn test_word_ordinal_rule_sets_limit_and_offset() {
        let mut plan = QueryPlan::needs_clarification("x", "y");
        plan.needs_clarification = false;
        apply_ordinal_rule(&mut plan, "second highest revenue agent");
        assert_eq!(plan.limit, Some(1));
        assert_eq!(plan.offset, Some(1));
    }

    #[test]
    fn test_x_by_y_disambiguation_prefers_metric_on_right() {
        let semantic = sample_semantic();
        let mut plan = QueryPlan { metric: Some("region by revenue".into()), ..QueryPlan::needs_clarification("x", "y") };
        plan.needs_clarification = false;
        apply_x_by_y_disambiguation(&mut plan, &semantic, &[]);
        assert_eq!(plan.metric.as_deref(), Some("revenue"));
        assert_eq!(plan.dimensions, vec!["region".to_string()]);
    }

    #[test]
    fn test_smart_default_assumes_metric() {
        let semantic = sample_semantic();
        let mut plan = QueryPlan { dimensions: vec!["region".into()], ..QueryPlan::needs_clarification("x", "y") };
        plan.needs_clarification = false;
        apply_smart_default(&mut plan, &semantic);
        assert_eq!(plan.metric.as_deref(), Some("revenue"));
        assert_eq!(plan.assumptions.len(), 1);
    }
}
