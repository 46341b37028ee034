//! Version Module
//!
//! Loose version comparison used by the startup update check.
//!
//! Versions are split into numeric and alphabetic tokens; dots only
//! separate. Numeric tokens compare by value, text tokens lexically, and a
//! numeric token sorts below a text token. A version that runs out of
//! tokens first is the older one.

use std::cmp::Ordering;

#[derive(Debug, Clone)]
enum Token<'a> {
    Number(&'a str),
    Text(&'a str),
}

impl PartialEq for Token<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Token<'_> {}

impl Ord for Token<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Number(a), Token::Number(b)) => compare_digits(a, b),
            (Token::Text(a), Token::Text(b)) => a.cmp(b),
            (Token::Number(_), Token::Text(_)) => Ordering::Less,
            (Token::Text(_), Token::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Token<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare digit runs by value without overflowing
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    Digit,
    Lower,
    Dot,
    Other,
}

fn class_of(c: char) -> Class {
    if c.is_ascii_digit() {
        Class::Digit
    } else if c.is_ascii_lowercase() {
        Class::Lower
    } else if c == '.' {
        Class::Dot
    } else {
        Class::Other
    }
}

fn tokenize(version: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut current: Option<Class> = None;

    for (idx, c) in version.char_indices() {
        let class = class_of(c);
        // every dot is its own separator
        if current != Some(class) || class == Class::Dot {
            if let Some(prev) = current {
                push_token(&mut tokens, prev, &version[start..idx]);
            }
            start = idx;
            current = Some(class);
        }
    }
    if let Some(prev) = current {
        push_token(&mut tokens, prev, &version[start..]);
    }

    tokens
}

fn push_token<'a>(tokens: &mut Vec<Token<'a>>, class: Class, text: &'a str) {
    match class {
        Class::Dot => {}
        Class::Digit => tokens.push(Token::Number(text)),
        Class::Lower | Class::Other => tokens.push(Token::Text(text)),
    }
}

/// Compare `current` against `latest`.
///
/// `Less` means the running version is older than the latest one.
pub fn compare(current: &str, latest: &str) -> Ordering {
    // slice ordering already treats a proper prefix as smaller
    tokenize(current).cmp(&tokenize(latest))
}

/// Whether an upgrade should be offered.
///
/// No latest release record counts as "already up to date".
pub fn upgrade_available(current: &str, latest: Option<&str>) -> bool {
    let latest = latest.unwrap_or(current);
    compare(current, latest) == Ordering::Less
}
