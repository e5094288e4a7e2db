//! Файловый лог запросов суммаризации (summary.log).
//!
//! Одна строка на завершённый запрос. Без директории лог не пишется.

use std::path::Path;

pub const SUMMARY_LOG: &str = "summary.log";

/// Дописывает строку в файл лога. Ошибки ввода-вывода игнорируются.
pub fn append_log(dir: Option<&Path>, filename: &str, line: &str) {
    let Some(dir) = dir else {
        return;
    };
    if std::fs::create_dir_all(dir).is_err() {
        return;
    }
    let path = dir.join(filename);
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let full_line = format!("[{}] {}\n", timestamp, line);
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| std::io::Write::write_all(&mut f, full_line.as_bytes()));
}
