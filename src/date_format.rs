//! Timestamp prefixes for captured log lines.
//!
//! Ecosystem files express `log_date_format` with moment-style tokens
//! (`YYYY-MM-DD HH:mm:ss Z`). The pattern is translated once into a chrono
//! strftime string at load time and reused for every line.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use serde::{Serialize, Serializer};

/// Token table, longest tokens first so `YYYY` wins over `YY`.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("MMMM", "%B"),
    ("dddd", "%A"),
    ("MMM", "%b"),
    ("ddd", "%a"),
    ("SSS", "%3f"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("ZZ", "%z"),
    ("M", "%-m"),
    ("D", "%-d"),
    ("H", "%-H"),
    ("h", "%-I"),
    ("m", "%-M"),
    ("s", "%-S"),
    ("A", "%p"),
    ("a", "%P"),
    ("Z", "%:z"),
    ("X", "%s"),
];

/// A compiled `log_date_format` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDateFormat {
    source: String,
    strftime: String,
}

impl LogDateFormat {
    /// Compile a moment-style pattern.
    ///
    /// Text inside `[...]` is copied literally. Characters that are not
    /// tokens pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns a reason if the pattern is empty or has an unterminated `[`.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if pattern.trim().is_empty() {
            return Err("log_date_format cannot be empty".to_string());
        }

        let chars: Vec<char> = pattern.chars().collect();
        let mut out = String::with_capacity(pattern.len() * 2);
        let mut i = 0;

        'outer: while i < chars.len() {
            let c = chars[i];

            if c == '[' {
                let Some(len) = chars[i + 1..].iter().position(|&ch| ch == ']') else {
                    return Err(format!("unterminated '[' at position {i} in '{pattern}'"));
                };
                for &lit in &chars[i + 1..i + 1 + len] {
                    push_literal(&mut out, lit);
                }
                i += len + 2;
                continue;
            }

            for (token, spec) in TOKENS {
                let token_len = token.len();
                if i + token_len <= chars.len()
                    && chars[i..i + token_len].iter().copied().eq(token.chars())
                {
                    out.push_str(spec);
                    i += token_len;
                    continue 'outer;
                }
            }

            push_literal(&mut out, c);
            i += 1;
        }

        if StrftimeItems::new(&out).any(|item| matches!(item, Item::Error)) {
            return Err(format!("unsupported log_date_format '{pattern}'"));
        }

        Ok(Self {
            source: pattern.to_string(),
            strftime: out,
        })
    }

    /// The pattern as written in the ecosystem file.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The translated chrono format string.
    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    /// Format a timestamp with this pattern.
    pub fn format<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        at.format(&self.strftime).to_string()
    }

    /// Format the current local time.
    pub fn now(&self) -> String {
        self.format(&Local::now())
    }
}

impl Serialize for LogDateFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
