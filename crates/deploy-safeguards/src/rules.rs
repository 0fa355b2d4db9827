//! Splitting of a rule specification into individual rules.
//!
//! A specification is a block of text with rules joined by `&&`, possibly
//! spread over several lines and interleaved with comments:
//!
//! ```text
//! // Stage must be "dev"
//! jsonata("declaration.provider[stage='dev']") // structured query
//! &&
//! declaration.provider.region == 'us-east-1'
//! ```

/// Combinator joining rules in a specification.
pub const AND_COMBINATOR: &str = "&&";

/// Splits a rule specification into trimmed, non-empty rules in order.
///
/// `&&` only separates rules at the top level: occurrences inside quoted
/// text or inside brackets stay part of their rule.
pub fn split(rule_spec: &str) -> Vec<String> {
    let joined = strip_comments(rule_spec);

    let mut rules = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth: usize = 0;
    let mut chars = joined.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '&' if depth == 0 && chars.peek() == Some(&'&') => {
                chars.next();
                push_rule(&mut rules, &current);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    push_rule(&mut rules, &current);

    rules
}

fn push_rule(rules: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        rules.push(trimmed.to_string());
    }
}

/// Drops blank and comment-only lines, strips trailing `//` comments and
/// joins what is left with newlines.
pub(crate) fn strip_comments(rule_spec: &str) -> String {
    rule_spec
        .lines()
        .filter(|line| !is_comment_line(line))
        .map(strip_trailing_comment)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with('#')
}

fn strip_trailing_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev_slash = false;

    for (i, c) in line.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                prev_slash = false;
            }
            '/' if prev_slash => return &line[..i - 1],
            '/' => prev_slash = true,
            _ => prev_slash = false,
        }
    }
    line
}
