//! String similarity helpers used for duplicate detection.

use std::collections::BTreeSet;

/// Words that, followed by a number, mark a naming ordinal (`team-2`, `project 3`).
const ORDINAL_WORDS: &[&str] = &["team", "project", "group", "lab", "tp", "td"];

/// Edit-distance similarity in `[0, 1]`; two empty strings score 0.
pub fn normalized_levenshtein(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

/// Lowercase alphanumeric tokens.
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard index of two token sets. Empty inputs score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

pub fn token_overlap(a: &str, b: &str) -> f64 {
    jaccard(&tokens(a), &tokens(b))
}

/// Comparison key for repository names: lowercase, separators collapsed,
/// digits and `team N` / `project N` ordinals removed.
pub fn normalize_name_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    let raw: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let token = raw[i];
        if ORDINAL_WORDS.contains(&token)
            && raw
                .get(i + 1)
                .is_some_and(|next| next.chars().all(|c| c.is_ascii_digit()))
        {
            i += 2;
            continue;
        }
        let stripped: String = token.chars().filter(|c| !c.is_ascii_digit()).collect();
        let was_numbered = stripped.len() != token.len();
        if stripped.is_empty() || (was_numbered && ORDINAL_WORDS.contains(&stripped.as_str())) {
            i += 1;
            continue;
        }
        out.push(stripped);
        i += 1;
    }
    out.join(" ")
}

/// Similarity of two repository names after [`normalize_name_key`].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize_name_key(a), &normalize_name_key(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_numbers_and_ordinals() {
        assert_eq!(
            normalize_name_key("2023-2024-project-3-widget-team-2"),
            "widget"
        );
        assert_eq!(normalize_name_key("Chess_Engine_v2"), "chess engine v");
        assert_eq!(normalize_name_key("team2-robot"), "robot");
    }

    #[test]
    fn name_similarity_ignores_ordinals() {
        assert_eq!(name_similarity("robot-team-1", "robot-team-7"), 1.0);
        assert!(name_similarity("weather-app", "chess-engine") < 0.5);
        assert_eq!(name_similarity("2024", "2025"), 0.0);
    }

    #[test]
    fn jaccard_counts_shared_tokens() {
        assert_eq!(
            token_overlap("blockchain hackathon 2024", "Hackathon-Blockchain-2024"),
            1.0
        );
        assert_eq!(
            token_overlap("blockchain hackathon 2024", "hackathon blockchain 2024 vierzon"),
            0.75
        );
        assert_eq!(token_overlap("", "anything"), 0.0);
    }

    #[test]
    fn normalized_levenshtein_scales_edit_distance() {
        let score = normalized_levenshtein("kitten", "sitting");
        assert!((score - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
        assert_eq!(normalized_levenshtein("", ""), 0.0);
    }
}
