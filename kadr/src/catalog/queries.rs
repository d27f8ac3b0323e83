/// Labels at or above this length are descriptions, not titles.
const MAX_LABEL_CHARS: usize = 40;
/// Only the first few short labels are worth a lookup.
const MAX_LABELS: usize = 3;
const MIN_QUERY_CHARS: usize = 3;

/// Title lookup queries for a recognised image, most promising first.
///
/// The first non-blank line of `text` comes first, then up to three short fallback labels.
/// Queries of two characters or fewer are dropped, as are repeats.
pub fn derive_queries(text: &str, labels: &[String]) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if candidate.chars().count() >= MIN_QUERY_CHARS
            && !queries.iter().any(|q| q == candidate)
        {
            queries.push(candidate.to_string());
        }
    };

    if let Some(first_line) = text.lines().map(str::trim).find(|line| !line.is_empty()) {
        push(first_line);
    }

    labels
        .iter()
        .filter(|label| label.trim().chars().count() < MAX_LABEL_CHARS)
        .take(MAX_LABELS)
        .for_each(|label| push(label));

    queries
}
