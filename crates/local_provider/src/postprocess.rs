//! Пост-обработка ответа модели: стоп-последовательности и лимит длины.

use crate::config::InferenceConfig;

/// Обрезает текст перед самой ранней стоп-последовательностью.
/// При совпадении позиций выигрывает та, что раньше в списке. Пустые игнорируются.
pub fn truncate_at_stop_sequence<'a, S: AsRef<str>>(text: &'a str, stops: &[S]) -> &'a str {
    let cut = stops
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s))
        .min();
    match cut {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Не больше `max_chars` символов, по границе символа.
pub fn truncate_to_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn postprocess(raw: &str, config: &InferenceConfig) -> String {
    let stopped = truncate_at_stop_sequence(raw, &config.stop_sequences);
    truncate_to_chars(stopped, config.char_budget()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earliest_stop_sequence_wins() {
        let text = "The council approved the budget.<|im_end|>junk</s>more";
        assert_eq!(
            truncate_at_stop_sequence(text, &["</s>", "<|im_end|>"]),
            "The council approved the budget."
        );
    }

    #[test]
    fn test_no_stop_sequence_keeps_text() {
        assert_eq!(truncate_at_stop_sequence("plain text", &["</s>"]), "plain text");
        assert_eq!(truncate_at_stop_sequence("plain text", &[""]), "plain text");
        let none: [&str; 0] = [];
        assert_eq!(truncate_at_stop_sequence("plain text", &none), "plain text");
    }

    #[test]
    fn test_stop_at_start_gives_empty() {
        assert_eq!(truncate_at_stop_sequence("</s>tail", &["</s>"]), "");
    }

    #[test]
    fn test_char_budget_respects_char_boundaries() {
        assert_eq!(truncate_to_chars("привет мир", 6), "привет");
        assert_eq!(truncate_to_chars("short", 100), "short");
        assert_eq!(truncate_to_chars("abc", 0), "");
    }

    #[test]
    fn test_postprocess_applies_stop_then_budget() {
        let config = InferenceConfig::new(2, 0.0, 1.0).with_stop_sequences(["###"]);
        assert_eq!(postprocess("abcdefghijk", &config), "abcdefgh");
        assert_eq!(postprocess("abc###defghijk", &config), "abc");
    }
}
