use crate::IoError;

/// 逐行读取文本并记录行号。
pub(crate) struct LineReader<'a> {
    lines: std::str::Lines<'a>,
    line_number: usize,
}

impl<'a> LineReader<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            line_number: 0,
        }
    }

    /// 返回下一非空行（已去掉首尾空白与 `\r`）及其行号。
    pub(crate) fn next_line(&mut self) -> Option<(usize, &'a str)> {
        for line in self.lines.by_ref() {
            self.line_number += 1;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some((self.line_number, trimmed));
            }
        }
        None
    }
}

/// 按空白切分，双引号包裹的片段保留为一个记号（去掉引号）。
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if ch == '"' {
            chars.next();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '"' {
                    closed = true;
                    break;
                }
                token.push(ch);
            }
            if !closed {
                return Err("引号未闭合".to_string());
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                token.push(ch);
                chars.next();
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// 若 `line` 以给定关键字序列开头（不区分大小写），返回其后的剩余部分。
pub(crate) fn strip_keywords<'a>(line: &'a str, keywords: &[&str]) -> Option<&'a str> {
    let mut rest = line.trim_start();
    for keyword in keywords {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if !rest[..end].eq_ignore_ascii_case(keyword) {
            return None;
        }
        rest = rest[end..].trim_start();
    }
    Some(rest)
}

/// 含空白的名称需要加引号。
pub(crate) fn quote_if_needed(name: &str) -> String {
    if name.contains(char::is_whitespace) {
        format!("\"{name}\"")
    } else {
        name.to_string()
    }
}

pub(crate) fn syntax(line: usize, message: impl Into<String>) -> IoError {
    IoError::Syntax {
        line,
        message: message.into(),
    }
}
