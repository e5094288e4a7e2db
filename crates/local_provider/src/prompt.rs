//! Сборка промпта в шаблон чата (ChatML), который ждёт нативный слой.

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// Пустой или пробельный системный промпт пропускается.
pub fn assemble_prompt(prompt: &str, system_prompt: Option<&str>) -> String {
    let system = system_prompt.map(str::trim).filter(|s| !s.is_empty());
    let mut out = String::with_capacity(prompt.len() + system.map_or(0, str::len) + 64);
    if let Some(system) = system {
        out.push_str(IM_START);
        out.push_str("system\n");
        out.push_str(system);
        out.push_str(IM_END);
        out.push('\n');
    }
    out.push_str(IM_START);
    out.push_str("user\n");
    out.push_str(prompt);
    out.push_str(IM_END);
    out.push('\n');
    out.push_str(IM_START);
    out.push_str("assistant\n");
    out
}
