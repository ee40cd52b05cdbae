//! Compiler-style diagnostics: `file:line:col: message`, the offending line and a caret.

use std::fmt::Write as _;

pub fn render(file: &str, src: &str, line: usize, col: usize, msg: &str) -> String {
    let mut out = format!("{file}:{line}:{col}: {msg}\n");
    if let Some(text) = src.lines().nth(line.saturating_sub(1)) {
        let gutter = line.to_string();
        let _ = writeln!(out, "{gutter} | {text}");
        let pad: String = text
            .chars()
            .take(col.saturating_sub(1))
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        let _ = writeln!(out, "{} | {pad}^", " ".repeat(gutter.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn caret_under_column() {
        let src = "int main() {\n\treturn x;\n}";
        let got = render("a.cas", src, 2, 9, "undefined identifier `x`");
        assert_eq!(got, "a.cas:2:9: undefined identifier `x`\n2 | \treturn x;\n  | \t       ^\n");
    }

    #[test]
    fn line_past_end_has_no_excerpt() {
        assert_eq!(render("f", "", 3, 1, "eof"), "f:3:1: eof\n");
    }
}
