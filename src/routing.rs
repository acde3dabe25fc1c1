//! Delegation routing
//!
//! Coordinators pick sub-agents by routing label. With keyword routing the
//! task text is matched against each label and its keywords; with model
//! routing the coordinator's backend names a label and [`match_label`] maps
//! that answer back onto a configured route.

/// Lowercased alphanumeric words of `text`.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True when `term` occurs in `text_words` as a whole word or phrase.
fn contains_term(text_words: &[String], term: &str) -> bool {
    let term_words = words(term);
    if term_words.is_empty() {
        return false;
    }
    text_words
        .windows(term_words.len())
        .any(|window| window == term_words.as_slice())
}

/// Indices of the candidates whose label or any keyword occurs in `text`,
/// in candidate order.
pub fn keyword_matches<'a, I>(text: &str, candidates: I) -> Vec<usize>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let text_words = words(text);
    candidates
        .into_iter()
        .enumerate()
        .filter(|(_, (label, keywords))| {
            contains_term(&text_words, label)
                || keywords.iter().any(|k| contains_term(&text_words, k))
        })
        .map(|(index, _)| index)
        .collect()
}

/// Map a backend's routing answer onto one of `labels`.
///
/// An exact (case-insensitive) answer wins; otherwise the first label that
/// occurs in the answer as a whole word.
pub fn match_label<'a, I>(answer: &str, labels: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let labels: Vec<&str> = labels.into_iter().collect();
    let trimmed = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(index) = labels.iter().position(|l| l.to_lowercase() == trimmed) {
        return Some(index);
    }
    let answer_words = words(answer);
    labels
        .iter()
        .position(|label| contains_term(&answer_words, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Vec<(String, Vec<String>)> {
        vec![
            ("billing".into(), vec!["refund".into(), "credit card".into()]),
            ("support".into(), vec!["broken".into()]),
            ("sales".into(), Vec::new()),
        ]
    }

    fn matches(text: &str) -> Vec<usize> {
        let routes = routes();
        keyword_matches(
            text,
            routes.iter().map(|(l, k)| (l.as_str(), k.as_slice())),
        )
    }

    #[test]
    fn test_keyword_routes_to_label() {
        assert_eq!(matches("refund"), vec![0]);
        assert_eq!(matches("I want a REFUND please"), vec![0]);
        assert_eq!(matches("talk to sales"), vec![2]);
    }

    #[test]
    fn test_whole_words_only() {
        // "refunded" is not the keyword "refund"
        assert!(matches("it was refunded").is_empty());
        assert!(matches("wholesales").is_empty());
    }

    #[test]
    fn test_phrase_keywords() {
        assert_eq!(matches("my credit card was charged twice"), vec![0]);
        assert!(matches("my credit was fine, card too").is_empty());
    }

    #[test]
    fn test_multiple_matches_keep_order() {
        assert_eq!(matches("sales says my refund is broken"), vec![0, 1, 2]);
    }

    #[test]
    fn test_no_match() {
        assert!(matches("what's the weather").is_empty());
        assert!(matches("").is_empty());
    }

    #[test]
    fn test_match_label() {
        let labels = ["billing", "support"];
        assert_eq!(match_label("billing", labels), Some(0));
        assert_eq!(match_label("  \"Support\". ", labels), Some(1));
        assert_eq!(match_label("I would route this to billing.", labels), Some(0));
        assert_eq!(match_label("nobody", labels), None);
        assert_eq!(match_label("", labels), None);
    }
}
