//! Local heuristics deciding whether retrieval is worth a round trip, and
//! how retrieved passages become prompt context.

use super::base::Passage;

/// Small talk that never needs knowledge lookup.
const CONVERSATIONAL_PHRASES: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "thanks",
    "thank you",
    "okay",
    "ok",
    "yes",
    "no",
    "bye",
    "goodbye",
    "sure",
    "alright",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
];

const MIN_QUERY_WORDS: usize = 3;

/// Cheap check run before embedding: skip greetings, acknowledgements and
/// anything too short to carry a question.
pub fn needs_knowledge(text: &str) -> bool {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalized.is_empty() || CONVERSATIONAL_PHRASES.contains(&normalized.as_str()) {
        return false;
    }
    normalized.split(' ').count() >= MIN_QUERY_WORDS
}

/// Join passages at or above `min_score`, best first, into at most
/// `max_chars` characters. Returns `None` when nothing qualifies.
pub fn build_context(passages: &[Passage], min_score: f32, max_chars: usize) -> Option<String> {
    let mut ranked: Vec<&Passage> = passages
        .iter()
        .filter(|p| p.score >= min_score && !p.text.trim().is_empty())
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut context = String::new();
    for passage in ranked {
        let text = passage.text.trim();
        let separator = if context.is_empty() { 0 } else { 2 };
        let remaining = max_chars.saturating_sub(context.chars().count() + separator);
        if remaining == 0 {
            break;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        if text.chars().count() <= remaining {
            context.push_str(text);
        } else {
            context.extend(text.chars().take(remaining));
            break;
        }
    }

    (!context.is_empty()).then_some(context)
}
