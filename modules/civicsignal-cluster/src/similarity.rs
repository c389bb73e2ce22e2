//! Bounded lexical-overlap similarity between report texts.
//!
//! Token-set Jaccard over normalized tokens. Duplicate reports of one physical
//! problem share vocabulary ("jalan berlubang", street names, house numbers)
//! even when phrased differently; this is not a semantic model.

use std::collections::BTreeSet;

/// Tokens considered per text. Keeps comparison cost bounded for long reports.
const MAX_TOKENS: usize = 256;

const STOPWORDS: &[&str] = &[
    "di", "ke", "dari", "dan", "yang", "ini", "itu", "ada", "sudah", "sangat", "sekali", "juga",
    "dengan", "untuk", "pada", "the", "a", "an", "of", "at", "in", "on", "is", "and", "to",
];

/// Collapse common street abbreviations onto their full form.
fn canonical(token: &str) -> &str {
    match token {
        "jl" | "jln" => "jalan",
        "gg" => "gang",
        _ => token,
    }
}

/// Lowercased alphanumeric tokens minus stopwords, deduplicated. The first
/// `MAX_TOKENS` distinct tokens are kept; repeats do not count toward the cap.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    let mut tokens = BTreeSet::new();
    for raw in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
    {
        if tokens.len() >= MAX_TOKENS {
            break;
        }
        tokens.insert(canonical(raw).to_string());
    }
    tokens
}

/// |A ∩ B| / |A ∪ B|. Two empty sets carry no evidence and score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityMatcher;

impl SimilarityMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Symmetric similarity in [0, 1].
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        jaccard(&tokenize(a), &tokenize(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviations_and_stopwords_normalize() {
        let tokens = tokenize("Jalan berlubang di Jl. Mawar");
        let expected: BTreeSet<String> =
            ["jalan", "berlubang", "mawar"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn rephrased_duplicate_clears_threshold() {
        let m = SimilarityMatcher::new();
        let sim = m.similarity("jalan berlubang di Jl. Mawar", "jalan berlubang besar di jl mawar");
        assert!((sim - 0.75).abs() < 1e-9, "got {sim}");
    }

    #[test]
    fn unrelated_reports_score_low() {
        let m = SimilarityMatcher::new();
        let sim = m.similarity("jalan berlubang di Jl. Mawar", "lampu taman padam sejak senin");
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let m = SimilarityMatcher::new();
        let a = "sampah menumpuk dekat pasar baru";
        let b = "tumpukan sampah di pasar baru bau";
        assert_eq!(m.similarity(a, b), m.similarity(b, a));
    }

    #[test]
    fn identical_text_scores_one() {
        let m = SimilarityMatcher::new();
        assert_eq!(m.similarity("banjir di gg. melati", "Banjir di Gang Melati"), 1.0);
    }

    #[test]
    fn empty_texts_score_zero() {
        let m = SimilarityMatcher::new();
        assert_eq!(m.similarity("", ""), 0.0);
        assert_eq!(m.similarity("di ke dari", "yang"), 0.0);
    }

    #[test]
    fn repeated_words_do_not_crowd_out_later_tokens() {
        let text = format!("{} got mampet", "banjir ".repeat(1_000));
        let tokens = tokenize(&text);
        assert_eq!(tokens.len(), 3);
        assert!(tokens.contains("mampet"));
    }

    #[test]
    fn distinct_tokens_are_capped() {
        let text: Vec<String> = (0..400).map(|i| format!("kata{i}")).collect();
        let tokens = tokenize(&text.join(" "));
        assert_eq!(tokens.len(), MAX_TOKENS);
        assert!(tokens.contains("kata0"));
        assert!(!tokens.contains("kata399"));
    }

    #[test]
    fn seven_shared_of_ten_scores_exactly_point_seven() {
        let m = SimilarityMatcher::new();
        let sim = m.similarity(
            "got mampet air meluap rumah warga rt 05 kelurahan gambir",
            "got mampet air meluap rumah warga rt",
        );
        assert_eq!(sim, 0.7);
    }

    #[test]
    fn result_is_bounded() {
        let m = SimilarityMatcher::new();
        let long = "kata ".repeat(10_000);
        let sim = m.similarity(&long, "kata lain");
        assert!((0.0..=1.0).contains(&sim));
    }
}
