// Smart decision / retry strategy
//
// Decides whether a search-style step's result is good enough to proceed, and
// otherwise which parameter variant to try next. Variants are generated up
// front as an ordered list (lower priority number = tried first): title
// synonyms crossed with a radius escalation ladder, then nationwide-only,
// then skill-keyword and inferred-category fallbacks.
//
// Scoring constants are policy, not derived from data. They live in
// DecisionConfig so deployments can tune them.
//
// The tolerant result-shape readers (flat vs nested under `result` vs
// `tool_result`) exist because the calling agent's response shape is not
// strictly controlled upstream. New code should emit the flat shape; the
// tolerance stays at this boundary only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use regex::Regex;

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::step::WorkflowStep;

/// Context key under which the generated variant list is stored
pub const SEARCH_VARIANTS_KEY: &str = "search_variants_list";

/// Tunable scoring and escalation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Minimum quality score considered "good enough"
    pub acceptable_score: i64,
    /// Score contribution per result, capped at 100
    pub score_per_result: i64,
    /// Bonus for an exact original-parameter match at zero radius
    pub exact_match_bonus: i64,
    /// Penalty applied to late-fallback variants
    pub late_fallback_penalty: i64,
    /// Variants with priority at or beyond this are "late fallbacks"
    pub late_fallback_priority: u32,
    /// Radius escalation ladder, in distance units
    pub radius_ladder: Vec<u32>,
    /// How many skill keywords to turn into their own variants
    pub max_skill_variants: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            acceptable_score: 30,
            score_per_result: 10,
            exact_match_bonus: 20,
            late_fallback_penalty: 15,
            late_fallback_priority: 10,
            radius_ladder: vec![0, 10, 20, 50, 100],
            max_skill_variants: 3,
        }
    }
}

/// Search signal extracted from a step plan or prior analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub title: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl SearchCriteria {
    /// Pull title/location/skills out of a loosely-shaped parameter map
    pub fn from_value(params: &Value) -> Self {
        let get_str = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| params.get(*k))
                .filter_map(Value::as_str)
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };
        let skills = params
            .get("skills")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title: get_str(&["title", "job_title", "what"]),
            location: get_str(&["location", "city", "where"]),
            skills,
        }
    }
}

/// One parameter variant to try, in priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchVariant {
    pub parameters: Value,
    /// Lower = tried first
    pub priority: u32,
    pub description: String,
    /// Original title at zero radius; qualifies for the exact-match bonus
    pub is_exact: bool,
}

/// Outcome of evaluating one search attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub is_acceptable: bool,
    pub quality_score: i64,
    pub result_count: u64,
    pub variant_priority: u32,
}

impl DecisionOutcome {
    /// Shape merged into the execution context as a decision step's result.
    ///
    /// `has_results` is only set when the attempt is acceptable; the skip
    /// policy keys off it to decide whether later retry variants still run.
    pub fn to_result(&self) -> Value {
        json!({
            "is_acceptable": self.is_acceptable,
            "quality_score": self.quality_score,
            "result_count": self.result_count,
            "has_results": self.is_acceptable,
            "should_retry": !self.is_acceptable,
            "retry_needed": !self.is_acceptable,
            "variant_priority": self.variant_priority,
        })
    }
}

/// Title synonym fallbacks, tried after the original title
fn title_synonyms(title: &str) -> Vec<String> {
    let table: &[(&str, &[&str])] = &[
        (
            "softwareentwickler",
            &["programmierer", "software engineer", "entwickler"],
        ),
        ("software engineer", &["software developer", "programmer"]),
        (
            "krankenpfleger",
            &["pflegefachkraft", "gesundheits- und krankenpfleger"],
        ),
        ("verkäufer", &["vertriebsmitarbeiter", "sales"]),
        ("buchhalter", &["finanzbuchhalter", "accountant"]),
        ("data scientist", &["data analyst", "machine learning engineer"]),
        ("projektmanager", &["project manager", "projektleiter"]),
    ];

    let needle = title.to_lowercase();
    table
        .iter()
        .find(|(key, _)| needle.contains(key))
        .map(|(_, synonyms)| synonyms.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

/// Infer a search category from skill keywords
fn inferred_category(skills: &[String]) -> Option<&'static str> {
    let joined = skills.join(" ").to_lowercase();
    let table: &[(&[&str], &str)] = &[
        (
            &["rust", "java", "python", "typescript", "sql", "devops"],
            "IT und Softwareentwicklung",
        ),
        (&["pflege", "medizin", "patienten"], "Gesundheit und Pflege"),
        (&["verkauf", "vertrieb", "kundenberatung"], "Vertrieb und Verkauf"),
        (&["buchhaltung", "controlling", "steuern"], "Finanzen"),
    ];
    table
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| joined.contains(k)))
        .map(|(_, category)| *category)
}

/// Build the prioritized variant list for a search.
///
/// Fails fast with `NoSearchCriteria` when neither a title nor any skills are
/// available; without a signal the retry cascade would loop pointlessly.
pub fn generate_variants(
    criteria: &SearchCriteria,
    config: &DecisionConfig,
) -> Result<Vec<SearchVariant>> {
    if criteria.title.is_none() && criteria.skills.is_empty() {
        return Err(EngineError::NoSearchCriteria);
    }

    let mut variants = Vec::new();
    let mut priority = 1u32;
    let mut push = |parameters: Value, description: String, is_exact: bool, priority: &mut u32| {
        variants.push(SearchVariant {
            parameters,
            priority: *priority,
            description,
            is_exact,
        });
        *priority += 1;
    };

    // (a) title synonyms crossed with (b) the radius ladder
    if let Some(title) = &criteria.title {
        let mut titles = vec![title.clone()];
        titles.extend(title_synonyms(title));

        for (title_idx, t) in titles.iter().enumerate() {
            if let Some(location) = &criteria.location {
                for radius in &config.radius_ladder {
                    push(
                        json!({"what": t, "where": location, "radius": radius}),
                        format!("'{t}' im Umkreis von {radius} um {location}"),
                        title_idx == 0 && *radius == 0,
                        &mut priority,
                    );
                }
            } else {
                // (c) nationwide-only when no location was given
                push(
                    json!({"what": t, "nationwide": true}),
                    format!("'{t}' bundesweit"),
                    title_idx == 0,
                    &mut priority,
                );
            }
        }
    }

    // (d) skill-keyword variants
    for skill in criteria.skills.iter().take(config.max_skill_variants) {
        let mut params = Map::new();
        params.insert("what".into(), json!(skill));
        if let Some(location) = &criteria.location {
            params.insert("where".into(), json!(location));
            params.insert(
                "radius".into(),
                json!(config.radius_ladder.last().copied().unwrap_or(100)),
            );
        } else {
            params.insert("nationwide".into(), json!(true));
        }
        push(
            Value::Object(params),
            format!("Suche nach Skill '{skill}'"),
            false,
            &mut priority,
        );
    }

    // (e) inferred-category variants from skill keywords
    if let Some(category) = inferred_category(&criteria.skills) {
        push(
            json!({"category": category, "nationwide": criteria.location.is_none()}),
            format!("Kategorie-Suche '{category}'"),
            false,
            &mut priority,
        );
    }

    Ok(variants)
}

/// Score one attempt's result against the variant that produced it
pub fn evaluate(result: &Value, variant: &SearchVariant, config: &DecisionConfig) -> DecisionOutcome {
    let count = result_count(result).unwrap_or(0);

    let mut score = (count as i64 * config.score_per_result).min(100);
    if variant.is_exact && count > 0 {
        score += config.exact_match_bonus;
    }
    if variant.priority >= config.late_fallback_priority {
        score -= config.late_fallback_penalty;
    }

    DecisionOutcome {
        is_acceptable: score >= config.acceptable_score,
        quality_score: score,
        result_count: count,
        variant_priority: variant.priority,
    }
}

// ============================================================================
// Tolerant result-shape readers
// ============================================================================

/// Unwrap a step result that may be flat or nested under `result` /
/// `tool_result`
fn unwrap_result(value: &Value) -> &Value {
    for key in ["result", "tool_result"] {
        if let Some(inner) = value.get(key) {
            if looks_like_search_result(inner) {
                return inner;
            }
        }
    }
    value
}

/// Recognize a search-shaped result: a tool-name tag or count/list fields
fn looks_like_search_result(value: &Value) -> bool {
    if let Some(tool) = value.get("tool_name").and_then(Value::as_str) {
        if tool.contains("search") || tool.contains("suche") {
            return true;
        }
    }
    ["job_count", "result_count", "count", "total_results"]
        .iter()
        .any(|k| value.get(*k).is_some())
        || ["jobs", "results", "items"]
            .iter()
            .any(|k| value.get(*k).map(Value::is_array).unwrap_or(false))
}

/// Whether a step result is recognizable as a search attempt, in any of the
/// tolerated shapes
pub fn is_search_shaped(value: &Value) -> bool {
    looks_like_search_result(unwrap_result(value))
}

/// Number of results in a search-shaped value, from a count field or list length
pub fn result_count(value: &Value) -> Option<u64> {
    let value = unwrap_result(value);
    for key in ["job_count", "result_count", "count", "total_results"] {
        if let Some(n) = value.get(key).and_then(Value::as_u64) {
            return Some(n);
        }
    }
    for key in ["jobs", "results", "items"] {
        if let Some(items) = value.get(key).and_then(Value::as_array) {
            return Some(items.len() as u64);
        }
    }
    None
}

/// Scan the context backward for the most recent search-shaped step result
pub fn find_last_result(ctx: &ExecutionContext) -> Option<(String, Value)> {
    let mut step_keys: Vec<(i32, &String)> = ctx
        .keys()
        .filter_map(|k| {
            k.strip_prefix("step_")
                .and_then(|n| n.parse::<i32>().ok())
                .map(|n| (n, k))
        })
        .collect();
    step_keys.sort_by_key(|(n, _)| std::cmp::Reverse(*n));

    for (_, key) in step_keys {
        if let Some(value) = ctx.get(key) {
            let unwrapped = unwrap_result(value);
            if looks_like_search_result(unwrapped) {
                return Some((key.clone(), unwrapped.clone()));
            }
        }
    }
    None
}

/// Scan all prior step results and pick the attempt with the most results
pub fn find_best_attempt(ctx: &ExecutionContext) -> Option<(String, Value)> {
    let mut best: Option<(String, Value, u64)> = None;
    for key in ctx.keys() {
        if !key.starts_with("step_") {
            continue;
        }
        let Some(value) = ctx.get(key) else { continue };
        let unwrapped = unwrap_result(value);
        if !looks_like_search_result(unwrapped) {
            continue;
        }
        let count = result_count(unwrapped).unwrap_or(0);
        let better = match &best {
            Some((_, _, best_count)) => count > *best_count,
            None => true,
        };
        if better {
            best = Some((key.clone(), unwrapped.clone(), count));
        }
    }
    best.map(|(key, value, _)| (key, value))
}

// ============================================================================
// Step classification and skip policy
// ============================================================================

fn attempt_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(versuch|attempt)\s*\d+").unwrap())
}

/// Heuristic: is this step part of a retry cascade?
///
/// Keyword sniffing on the free-text description is fragile but matches how
/// plans are generated today. Kept behind this single function so a future
/// step-metadata tag (e.g. a retry-group field) can replace it without
/// touching callers.
pub fn is_retry_step(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("retry")
        || lower.contains("fallback")
        || lower.contains("falls leer")
        || lower.contains("erneut")
        || attempt_phrase_re().is_match(description)
}

/// Heuristic: is this decision step a search evaluation this strategy owns?
/// Same caveat and same replacement path as [`is_retry_step`].
pub fn is_search_decision(description: &str) -> bool {
    let lower = description.to_lowercase();
    ["job", "stellen", "suchergebnis", "search result", "treffer"]
        .iter()
        .any(|k| lower.contains(k))
}

/// Skip policy: a retry-cascade step is redundant when the immediately
/// preceding step already signalled success. The caller must carry the
/// preceding result forward instead of re-running.
pub fn should_skip(step: &WorkflowStep, ctx: &ExecutionContext) -> bool {
    if !is_retry_step(&step.description) {
        return false;
    }
    let Some(prev) = ctx.get(&format!("step_{}", step.step_number - 1)) else {
        return false;
    };
    let has_results = prev.get("has_results").and_then(Value::as_bool) == Some(true);
    let retry_not_needed = prev.get("retry_needed").and_then(Value::as_bool) == Some(false);
    has_results || retry_not_needed
}
