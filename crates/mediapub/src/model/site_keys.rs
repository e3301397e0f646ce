//! Text encoding of a publish job's site keys.
//!
//! Each key is wrapped in single quotes with embedded quotes escaped as `\'`,
//! and keys are joined with commas: `'storymaker','bob\'s blog'`.
//!
//! Parsing is quote-aware, so commas inside a key survive. Unquoted segments
//! are accepted verbatim. A key ending in a backslash cannot be told apart
//! from an escaped closing quote and does not round-trip.

use crate::error::ValidationError;

pub fn serialize(keys: &[String]) -> String {
    keys.iter()
        .map(|key| format!("'{}'", key.replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn deserialize(raw: &str) -> Result<Vec<String>, ValidationError> {
    let malformed = |reason: &str| ValidationError::MalformedSiteKeys {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut keys = Vec::new();
    if raw.is_empty() {
        return Ok(keys);
    }

    let mut chars = raw.chars().peekable();
    loop {
        let mut key = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' if chars.peek() == Some(&'\'') => {
                        chars.next();
                        key.push('\'');
                    }
                    '\'' => {
                        closed = true;
                        break;
                    }
                    other => key.push(other),
                }
            }
            if !closed {
                return Err(malformed("unterminated quote"));
            }
            match chars.next() {
                None => {
                    keys.push(key);
                    return Ok(keys);
                }
                Some(',') => keys.push(key),
                Some(_) => return Err(malformed("expected ',' after closing quote")),
            }
        } else {
            let mut more = false;
            for c in chars.by_ref() {
                if c == ',' {
                    more = true;
                    break;
                }
                key.push(c);
            }
            keys.push(key);
            if !more {
                return Ok(keys);
            }
        }
    }
}
