use regex::Regex;
use std::iter::Peekable;
use std::sync::LazyLock;

/// Upper bound on surrounding quote layers peeled in one pass.
const MAX_QUOTE_LAYERS: usize = 3;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A decode attempt. `None` means the strategy does not apply or failed.
type Decoder = fn(&str) -> Option<String>;

const QUOTED_DECODERS: [Decoder; 2] = [decode_quoted_literal, decode_escapes];
const PLAIN_DECODERS: [Decoder; 1] = [decode_escapes];

/// Normalize a free-text field coming out of semi-structured storage.
/// Absent stays absent. Idempotent.
pub fn normalize_text(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_str)
}

/// Run cleaning passes until the text stops changing. Every pass that
/// changes already-cleaned text makes it strictly shorter, so this ends.
pub fn normalize_str(raw: &str) -> String {
    let mut current = clean_pass(raw);
    loop {
        let next = clean_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(raw: &str) -> String {
    let mut s = raw.trim().to_string();

    let decoders: &[Decoder] = if looks_quoted(&s) {
        &QUOTED_DECODERS
    } else {
        &PLAIN_DECODERS
    };
    if let Some(decoded) = decoders.iter().find_map(|decode| decode(&s)) {
        s = decoded;
    }

    for _ in 0..MAX_QUOTE_LAYERS {
        match strip_matching_quotes(&s) {
            Some(inner) => s = inner.to_string(),
            None => break,
        }
    }

    s.retain(|c| c != '\\');
    WHITESPACE.replace_all(&s, " ").trim().to_string()
}

fn looks_quoted(s: &str) -> bool {
    s.starts_with('"') || s.starts_with('\'') || s.starts_with("\\\"") || s.starts_with("\\'")
}

fn strip_matching_quotes(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if first == last && (first == b'"' || first == b'\'') {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Decode `s` as a single quoted string literal with backslash escapes.
/// Fails on unterminated literals, raw newlines inside the quotes, bad
/// escapes, or anything after the closing quote.
fn decode_quoted_literal(s: &str) -> Option<String> {
    let mut chars = s.chars().peekable();
    let quote = match chars.next() {
        Some(c @ ('"' | '\'')) => c,
        _ => return None,
    };

    let mut out = String::with_capacity(s.len());
    loop {
        match chars.next()? {
            c if c == quote => break,
            '\n' => return None,
            '\\' => {
                let c = chars.next()?;
                unescape_into(c, &mut chars, &mut out)?;
            }
            c => out.push(c),
        }
    }

    if chars.all(char::is_whitespace) {
        Some(out)
    } else {
        None
    }
}

/// Decode backslash escapes anywhere in `s`. Unknown escapes are kept
/// verbatim; malformed numeric escapes or a dangling backslash fail.
fn decode_escapes(s: &str) -> Option<String> {
    let mut chars = s.chars().peekable();
    let mut out = String::with_capacity(s.len());
    while let Some(c) = chars.next() {
        if c == '\\' {
            let next = chars.next()?;
            unescape_into(next, &mut chars, &mut out)?;
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn unescape_into<I: Iterator<Item = char>>(
    c: char,
    chars: &mut Peekable<I>,
    out: &mut String,
) -> Option<()> {
    match c {
        '\n' => {}
        '\\' | '\'' | '"' => out.push(c),
        'a' => out.push('\u{07}'),
        'b' => out.push('\u{08}'),
        'f' => out.push('\u{0C}'),
        'n' => out.push('\n'),
        'r' => out.push('\r'),
        't' => out.push('\t'),
        'v' => out.push('\u{0B}'),
        '0'..='7' => {
            let mut code = c.to_digit(8)?;
            for _ in 0..2 {
                match chars.peek().and_then(|d| d.to_digit(8)) {
                    Some(d) => {
                        code = code * 8 + d;
                        chars.next();
                    }
                    None => break,
                }
            }
            out.push(char::from_u32(code)?);
        }
        'x' => out.push(read_hex(chars, 2)?),
        'u' => out.push(read_hex(chars, 4)?),
        'U' => out.push(read_hex(chars, 8)?),
        other => {
            out.push('\\');
            out.push(other);
        }
    }
    Some(())
}

fn read_hex<I: Iterator<Item = char>>(chars: &mut I, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}
