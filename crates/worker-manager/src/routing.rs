//! Heuristic task classifier backing `GET /orchestrate/route`. Not a
//! learned model — just keyword and size signals over the task text,
//! cheap enough to run on every dispatch decision.

use crate::types::{RoutingRecommendation, TaskRequest};

const COMPLEX_KEYWORDS: &[&str] = &[
    "refactor", "migrate", "architecture", "redesign", "security",
    "concurrency", "race condition", "across the codebase", "breaking change",
];

const SIMPLE_KEYWORDS: &[&str] = &["typo", "rename", "comment", "log message", "one-line", "bump version"];

pub fn classify(task: &TaskRequest) -> RoutingRecommendation {
    let text = format!(
        "{} {}",
        task.title.to_lowercase(),
        task.description.as_deref().unwrap_or("").to_lowercase()
    );

    let complex_hits = COMPLEX_KEYWORDS.iter().filter(|kw| text.contains(*kw)).count();
    let simple_hits = SIMPLE_KEYWORDS.iter().filter(|kw| text.contains(*kw)).count();
    let word_count = text.split_whitespace().count();

    if complex_hits > 0 || word_count > 120 {
        RoutingRecommendation {
            complexity: "complex",
            strategy: "swarm",
            model: "opus",
            confidence: if complex_hits > 1 { 0.85 } else { 0.65 },
        }
    } else if simple_hits > 0 && word_count < 30 {
        RoutingRecommendation {
            complexity: "simple",
            strategy: "single",
            model: "haiku",
            confidence: 0.8,
        }
    } else {
        RoutingRecommendation {
            complexity: "moderate",
            strategy: "pair",
            model: "sonnet",
            confidence: 0.6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str, description: &str) -> TaskRequest {
        TaskRequest { id: "t1".to_string(), title: title.to_string(), description: Some(description.to_string()) }
    }

    #[test]
    fn refactor_keyword_routes_to_swarm() {
        let rec = classify(&task("Refactor auth module", "spans several files"));
        assert_eq!(rec.complexity, "complex");
        assert_eq!(rec.strategy, "swarm");
    }

    #[test]
    fn typo_fix_routes_to_single() {
        let rec = classify(&task("Fix typo in README", "one-line change"));
        assert_eq!(rec.complexity, "simple");
        assert_eq!(rec.strategy, "single");
    }

    #[test]
    fn default_is_moderate_pair() {
        let rec = classify(&task("Add pagination to the search endpoint", "needs a new query param and tests"));
        assert_eq!(rec.complexity, "moderate");
        assert_eq!(rec.strategy, "pair");
    }
}
