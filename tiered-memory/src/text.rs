//! Text utilities shared by retrieval and the optimizer
//!
//! Tokenization, set similarity, edit distance and the content transforms
//! used by compression.

use std::collections::HashSet;

/// Tokenize text into lowercase alphanumeric terms
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Distinct tokens of a text
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of two token sets, 0.0 when both are empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity of two texts
pub fn text_jaccard(a: &str, b: &str) -> f64 {
    jaccard(&token_set(a), &token_set(b))
}

/// Levenshtein distance in characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Edit distance divided by the longer length, inverted into [0, 1]
pub fn normalized_similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Fuzzy similarity of a query against a text
///
/// 1.0 when the text contains the whole query; otherwise each query token
/// takes its best normalized similarity against the text's tokens and the
/// results are averaged.
pub fn fuzzy_score(query: &str, text: &str) -> f32 {
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return 0.0;
    }
    if text.to_lowercase().contains(&query_lower) {
        return 1.0;
    }

    let query_tokens = tokenize(&query_lower);
    let text_tokens = token_set(text);
    if query_tokens.is_empty() || text_tokens.is_empty() {
        return 0.0;
    }

    let total: f32 = query_tokens
        .iter()
        .map(|q| {
            text_tokens
                .iter()
                .map(|t| normalized_similarity(q, t))
                .fold(0.0_f32, f32::max)
        })
        .sum();

    (total / query_tokens.len() as f32).clamp(0.0, 1.0)
}

/// Containment score: 1.0 for equality, 0.9 when the text contains the
/// query, otherwise the fraction of query tokens present in the text
pub fn containment_score(query: &str, text: &str) -> f32 {
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return 0.0;
    }
    let text_lower = text.trim().to_lowercase();
    if text_lower == query_lower {
        return 1.0;
    }
    if text_lower.contains(&query_lower) {
        return 0.9;
    }

    let query_tokens = token_set(&query_lower);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens = token_set(&text_lower);
    let found = query_tokens.iter().filter(|t| text_tokens.contains(*t)).count();
    found as f32 / query_tokens.len() as f32
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences, keeping terminal punctuation
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Keep the longest `ratio` share of sentences, in their original order
pub fn keep_longest_sentences(text: &str, ratio: f64) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return normalize_whitespace(text);
    }

    let keep = ((sentences.len() as f64 * ratio.clamp(0.0, 1.0)).ceil() as usize).max(1);

    let mut ranked: Vec<usize> = (0..sentences.len()).collect();
    ranked.sort_by(|&a, &b| {
        sentences[b]
            .chars()
            .count()
            .cmp(&sentences[a].chars().count())
            .then(a.cmp(&b))
    });
    let mut kept: Vec<usize> = ranked.into_iter().take(keep).collect();
    kept.sort_unstable();

    kept.into_iter()
        .map(|i| sentences[i].as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Head + tail truncation summary
pub fn head_tail_summary(text: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= head + tail {
        return text.to_string();
    }
    let head_part: String = chars[..head].iter().collect();
    let tail_part: String = chars[chars.len() - tail..].iter().collect();
    format!("{} ... {}", head_part.trim_end(), tail_part.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("Hello, World! Cats are mammals.");
        assert_eq!(tokens, vec!["hello", "world", "cats", "are", "mammals"]);
    }

    #[test]
    fn test_jaccard() {
        let a = token_set("the quick brown fox");
        let b = token_set("the quick brown dog");
        assert!((jaccard(&a, &b) - 0.6).abs() < 1e-9);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
        assert_eq!(text_jaccard("same words", "words same"), 1.0);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("cat", "cat"), 0);
        assert_eq!(normalized_similarity("", ""), 1.0);
        assert!((normalized_similarity("cat", "bat") - (2.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_fuzzy_score() {
        assert_eq!(fuzzy_score("cat", "cat"), 1.0);
        assert_eq!(fuzzy_score("cat", "cats are mammals"), 1.0);
        assert!(fuzzy_score("cat", "dogs bark") < 0.5);
        assert!(fuzzy_score("mamals", "cats are mammals") > 0.8);
        assert_eq!(fuzzy_score("", "anything"), 0.0);
    }

    #[test]
    fn test_containment_score() {
        assert_eq!(containment_score("cat", "Cat"), 1.0);
        assert_eq!(containment_score("cat", "cats are mammals"), 0.9);
        assert!((containment_score("dogs cats", "dogs bark") - 0.5).abs() < 1e-6);
        assert_eq!(containment_score("zebra", "dogs bark"), 0.0);
    }

    #[test]
    fn test_keep_longest_sentences() {
        let text = "Short. This sentence is clearly the longest one here. Medium length one. Tiny.";
        let kept = keep_longest_sentences(text, 0.5);
        assert_eq!(
            kept,
            "This sentence is clearly the longest one here. Medium length one."
        );
    }

    #[test]
    fn test_head_tail_summary() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(head_tail_summary(text, 3, 2), "abc ... yz");
        assert_eq!(head_tail_summary("short", 3, 2), "short");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\n b\t c "), "a b c");
    }
}
