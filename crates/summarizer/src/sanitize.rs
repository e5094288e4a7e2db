//! Очистка ответа модели перед показом: маркеры шаблона чата, «утёкшие»
//! префиксы инструкции, пробелы по краям.

/// Более длинные маркеры идут раньше своих префиксов.
const TEMPLATE_MARKERS: &[&str] = &[
    "<|im_start|>assistant",
    "<|im_start|>system",
    "<|im_start|>user",
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|eot_id|>",
    "<|assistant|>",
    "<|system|>",
    "<|user|>",
    "<|end|>",
    "[INST]",
    "[/INST]",
    "<s>",
    "</s>",
];

/// Сравниваются без учёта регистра (ASCII).
const LEAKAGE_PREFIXES: &[&str] = &[
    "here is the summary:",
    "here's the summary:",
    "here is a summary:",
    "here's a summary:",
    "summary:",
    "tl;dr:",
    "assistant:",
];

/// Идемпотентна: `sanitize(&sanitize(s)) == sanitize(s)`.
pub fn sanitize(text: &str) -> String {
    let mut current = sanitize_pass(text);
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_pass(text: &str) -> String {
    let mut out = text.to_string();
    for marker in TEMPLATE_MARKERS {
        if out.contains(marker) {
            out = out.replace(marker, "");
        }
    }
    strip_leakage_prefix(out.trim()).trim().to_string()
}

fn strip_leakage_prefix(text: &str) -> &str {
    for prefix in LEAKAGE_PREFIXES {
        let matches = text
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if matches {
            return &text[prefix.len()..];
        }
    }
    text
}
