//! 文本清理工具

use regex::Regex;
use std::sync::LazyLock;

/// 截断标记
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// 典型的代码行：导入语句、交互式提示符、DataFrame/绘图调用、赋值语句
static CODE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:import\s|from\s+\S+\s+import\s|>>>|\.\.\.\s|In\s*\[\d*\]|Out\s*\[\d*\]|(?:df|plt|sns|pd|np)\s*[\.\[]|print\(|[A-Za-z_][A-Za-z0-9_]*\s*=\s*[^=])",
    )
    .expect("code line pattern is valid")
});

/// 去掉代码块以及明显不是自然语言的行，保留分析结论
///
/// 全部内容都被过滤掉时返回原文，避免丢失结果。
pub fn sanitize_prose(text: &str) -> String {
    let mut in_fence = false;
    let mut kept: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || CODE_LINE.is_match(trimmed) {
            continue;
        }
        // 连续空行只保留一个
        if trimmed.is_empty() && kept.last().is_none_or(|l| l.trim().is_empty()) {
            continue;
        }
        kept.push(line.trim_end());
    }

    let cleaned = kept.join("\n").trim().to_string();
    if cleaned.is_empty() {
        text.trim().to_string()
    } else {
        cleaned
    }
}

/// 按字符数截断，超出时追加截断标记
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}\n{}", &text[..byte_index], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
