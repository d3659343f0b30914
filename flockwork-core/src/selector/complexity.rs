//! Complexity scoring: a weighted sum of four sub-scores, each in `[0,1]`
//! (§4.F). The keyword-counting shape here is the same one the teacher used
//! to guess an agent type from a task description — generalized from a
//! discrete pick into a continuous score.

const REASONING_KEYWORDS: &[&str] = &[
    "design",
    "architect",
    "refactor",
    "optimize",
    "complex",
    "integration",
    "security",
    "performance",
];

const CODE_KEYWORDS: &[&str] = &["implement", "create", "build", "develop"];

const CONTEXT_KEYWORDS: &[&str] = &[
    "across",
    "all",
    "entire",
    "throughout",
    "integrate",
    "coordinate",
    "multiple",
    "various",
];

const DATABASE_KEYWORDS: &[&str] = &["database", "sql", "schema", "migration", "query"];
const SECURITY_KEYWORDS: &[&str] = &["security", "auth", "encrypt", "vulnerability", "permission"];
const FRONTEND_KEYWORDS: &[&str] = &["frontend", "ui", "component", "react", "css"];
const DEVOPS_KEYWORDS: &[&str] = &["devops", "deploy", "ci/cd", "pipeline", "infrastructure"];

const WEIGHT_REASONING: f64 = 0.35;
const WEIGHT_CODE: f64 = 0.25;
const WEIGHT_DOMAIN: f64 = 0.25;
const WEIGHT_CONTEXT: f64 = 0.15;

/// The four sub-scores plus their weighted combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityScore {
    pub reasoning_depth: f64,
    pub code_complexity: f64,
    pub domain_specificity: f64,
    pub context_requirements: f64,
    pub overall: f64,
}

fn keyword_score(text: &str, keywords: &[&str]) -> f64 {
    let lower = text.to_lowercase();
    let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
    (hits as f64 / 3.0).min(1.0)
}

fn matches_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(*k))
}

/// `lines_estimate`, when known (e.g. from a predicted-files count), takes
/// precedence over the keyword fallback for code complexity (§4.F).
pub fn score(description: &str, action: &str, lines_estimate: Option<u64>) -> ComplexityScore {
    let text = format!("{description} {action}");

    let reasoning_depth = keyword_score(&text, REASONING_KEYWORDS);

    let code_complexity = match lines_estimate {
        Some(lines) => (5.0f64.min(lines as f64 / 100.0 + 1.0)) / 5.0,
        None => keyword_score(&text, CODE_KEYWORDS),
    };

    let domain_specificity = if matches_any(&text, DATABASE_KEYWORDS)
        || matches_any(&text, SECURITY_KEYWORDS)
        || matches_any(&text, FRONTEND_KEYWORDS)
        || matches_any(&text, DEVOPS_KEYWORDS)
    {
        1.0
    } else {
        0.4
    };

    let context_requirements = keyword_score(&text, CONTEXT_KEYWORDS);

    let overall = WEIGHT_REASONING * reasoning_depth
        + WEIGHT_CODE * code_complexity
        + WEIGHT_DOMAIN * domain_specificity
        + WEIGHT_CONTEXT * context_requirements;

    ComplexityScore {
        reasoning_depth,
        code_complexity,
        domain_specificity,
        context_requirements,
        overall,
    }
}
