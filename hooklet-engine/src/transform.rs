//! Macro shorthand transformer
//!
//! Rewrites the reserved-prefix shorthand operators (`@NAME`, `#name`,
//! `%name`) into real expressions before a snippet is shipped to a worker.
//! The scan is lexically aware: trigger characters inside string literals,
//! template literals and comments are copied through byte-for-byte.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Fixed expansions for the `@` macro family
static MACRO_TABLE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("@BODY", "$body"),
        ("@QUERY", "$query"),
        ("@PARAMS", "$params"),
        ("@SHARE", "$share"),
        ("@DATA", "$data"),
        ("@RESULT", "$result"),
        ("@STATUS", "$statusCode"),
        ("@USER", "$user"),
        ("@REQ", "$req"),
        ("@RES", "$res"),
        ("@CACHE", "$cache"),
        ("@HEADERS", "$headers"),
        ("@THROW", "$throw"),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    SingleQuoted,
    DoubleQuoted,
    TemplateLiteral,
    LineComment,
    BlockComment,
}

fn is_upper_token_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand macro shorthand in `source`
///
/// Total and deterministic; transforming already-transformed output is a
/// no-op since no expansion reintroduces a trigger character. Unterminated
/// strings and comments are tolerated and copied through as-is.
pub fn transform(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = LexState::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            LexState::Code => match c {
                '"' => {
                    out.push(c);
                    state = LexState::DoubleQuoted;
                    i += 1;
                }
                '\'' => {
                    out.push(c);
                    state = LexState::SingleQuoted;
                    i += 1;
                }
                '`' => {
                    out.push(c);
                    state = LexState::TemplateLiteral;
                    i += 1;
                }
                '/' if chars.get(i + 1) == Some(&'/') => {
                    out.push_str("//");
                    state = LexState::LineComment;
                    i += 2;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    out.push_str("/*");
                    state = LexState::BlockComment;
                    i += 2;
                }
                '@' => {
                    let body: String = chars[i + 1..]
                        .iter()
                        .take_while(|c| is_upper_token_char(**c))
                        .collect();
                    if body.is_empty() {
                        // Bare trigger, no token
                        out.push('@');
                        i += 1;
                    } else {
                        let token = format!("@{}", body);
                        match MACRO_TABLE.get(token.as_str()) {
                            Some(expansion) => out.push_str(expansion),
                            // Unknown macros are literal text, not errors
                            None => out.push_str(&token),
                        }
                        i += 1 + body.chars().count();
                    }
                }
                '#' => {
                    let name: String = chars[i + 1..]
                        .iter()
                        .take_while(|c| is_name_char(**c))
                        .collect();
                    if name.is_empty() {
                        out.push('#');
                        i += 1;
                    } else {
                        out.push_str(&format!("$repos[\"{}\"]", name));
                        i += 1 + name.chars().count();
                    }
                }
                '%' => {
                    let name: String = chars[i + 1..]
                        .iter()
                        .take_while(|c| is_name_char(**c))
                        .collect();
                    if name.is_empty() {
                        out.push('%');
                        i += 1;
                    } else {
                        out.push_str(&format!("$modules[\"{}\"]", name));
                        i += 1 + name.chars().count();
                    }
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            },

            LexState::SingleQuoted | LexState::DoubleQuoted | LexState::TemplateLiteral => {
                if c == '\\' {
                    // Escape consumes the next character verbatim so an
                    // escaped quote cannot end the literal early
                    out.push(c);
                    if let Some(next) = chars.get(i + 1) {
                        out.push(*next);
                        i += 2;
                    } else {
                        i += 1;
                    }
                } else {
                    let closes = matches!(
                        (state, c),
                        (LexState::SingleQuoted, '\'')
                            | (LexState::DoubleQuoted, '"')
                            | (LexState::TemplateLiteral, '`')
                    );
                    out.push(c);
                    if closes {
                        state = LexState::Code;
                    }
                    i += 1;
                }
            }

            LexState::LineComment => {
                out.push(c);
                if c == '\n' {
                    state = LexState::Code;
                }
                i += 1;
            }

            LexState::BlockComment => {
                if c == '*' && chars.get(i + 1) == Some(&'/') {
                    out.push_str("*/");
                    state = LexState::Code;
                    i += 2;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
        }
    }

    out
}
