//! Task domain classification (§4.G `classify`).

use crate::model::{Domain, Task};

const DATABASE: &[&str] = &["database", "sql", "schema", "migration", "query", "postgres", "sqlite"];
const API: &[&str] = &["api", "endpoint", "route", "request", "response", "rest", "grpc"];
const FRONTEND: &[&str] = &["frontend", "ui", "component", "react", "css", "html", "button", "form"];
const TESTING: &[&str] = &["test", "spec", "assertion", "fixture", "coverage", "mock"];
const SECURITY: &[&str] = &["security", "auth", "encrypt", "vulnerability", "permission", "token", "secret"];
const DEPLOYMENT: &[&str] = &["deploy", "ci/cd", "pipeline", "infrastructure", "docker", "kubernetes", "release"];

const DOMAINS: &[(Domain, &[&str])] = &[
    (Domain::Database, DATABASE),
    (Domain::Api, API),
    (Domain::Frontend, FRONTEND),
    (Domain::Testing, TESTING),
    (Domain::Security, SECURITY),
    (Domain::Deployment, DEPLOYMENT),
];

fn keyword_hits(text: &str, keywords: &[&str]) -> u32 {
    let lower = text.to_lowercase();
    keywords.iter().filter(|k| lower.contains(*k)).count() as u32
}

/// Weighted keyword matching over description, action, and predicted file
/// paths (path-level keywords carry weight 2). Ties break toward
/// `previous_domain`, the domain already learned for this task's epic;
/// otherwise `general`.
pub fn classify(task: &Task, previous_domain: Option<Domain>) -> Domain {
    let text = format!("{} {}", task.description, task.action);
    let paths: String = task
        .predicted_files()
        .iter()
        .filter_map(|p| p.to_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut best_domain = Domain::General;
    let mut best_score = 0u32;
    let mut tied = false;

    for (domain, keywords) in DOMAINS {
        let score = keyword_hits(&text, keywords) + 2 * keyword_hits(&paths, keywords);
        if score == 0 {
            continue;
        }
        match score.cmp(&best_score) {
            std::cmp::Ordering::Greater => {
                best_score = score;
                best_domain = *domain;
                tied = false;
            }
            std::cmp::Ordering::Equal => tied = true,
            std::cmp::Ordering::Less => {}
        }
    }

    if best_score == 0 {
        return Domain::General;
    }
    if tied {
        if let Some(previous) = previous_domain {
            return previous;
        }
        return Domain::General;
    }
    best_domain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyType, EpicId, TaskId};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn task(description: &str, action: &str, files: Vec<&str>) -> Task {
        Task {
            id: TaskId::from("t1"),
            epic_id: EpicId::from("e1"),
            priority: 0,
            description: description.to_string(),
            action: action.to_string(),
            depends_on: BTreeSet::new(),
            dependency_type: DependencyType::Hard,
            done: false,
            predicted_files: if files.is_empty() {
                None
            } else {
                Some(files.into_iter().map(PathBuf::from).collect())
            },
        }
    }

    #[test]
    fn unrecognized_text_classifies_as_general() {
        assert_eq!(classify(&task("Update the changelog", "edit", vec![]), None), Domain::General);
    }

    #[test]
    fn database_keywords_classify_as_database() {
        assert_eq!(
            classify(&task("Add a migration for the new schema", "alter table", vec![]), None),
            Domain::Database
        );
    }

    #[test]
    fn path_level_keywords_carry_double_weight() {
        let t = task("Update logic", "edit", vec!["src/auth/token.rs"]);
        assert_eq!(classify(&t, None), Domain::Security);
    }

    #[test]
    fn ties_break_toward_previous_domain() {
        let t = task("api test endpoint", "write spec", vec![]);
        assert_eq!(classify(&t, Some(Domain::Testing)), Domain::Testing);
    }

    #[test]
    fn ties_without_previous_domain_fall_back_to_general() {
        let t = task("api test endpoint", "write spec", vec![]);
        assert_eq!(classify(&t, None), Domain::General);
    }
}
