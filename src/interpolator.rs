use std::time::{SystemTime, UNIX_EPOCH};

use crate::request::Request;
use crate::session::Session;

/// Expands template tokens in scripted response bodies.
///
/// A single left-to-right scanner over `&str`, not a general parser:
/// each token is recognised by its leading sigil (`:`, `[`, `{`),
/// expanded immediately, and the scan resumes *after* the token in the
/// original source. Expansions are never re-scanned, so an interpolated
/// value that itself looks like a token stays inert.
pub struct Interpolator;

impl Interpolator {
    /// Expands `template` against `request` and, if present, a valid
    /// session. Unresolvable tokens expand to the empty string, except
    /// `{name}` with no valid session, which is preserved literally to
    /// keep the token visible for diagnostics.
    pub fn expand(template: &str, request: &Request, session: Option<&Session>) -> String {
        let mut out = String::with_capacity(template.len());
        let chars: Vec<char> = template.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                ':' => {
                    if let Some((name, end)) = read_identifier(&chars, i + 1) {
                        let value = request.params.get(&name).cloned().unwrap_or_default();
                        out.push_str(&value);
                        i = end;
                        continue;
                    }
                    out.push(c);
                    i += 1;
                }
                '[' => {
                    if let Some(end) = find_close(&chars, i, ']') {
                        let inner: String = chars[i + 1..end].iter().collect();
                        out.push_str(&expand_bracket(&inner, request));
                        i = end + 1;
                        continue;
                    }
                    out.push(c);
                    i += 1;
                }
                '{' => {
                    if let Some(end) = find_close(&chars, i, '}') {
                        let name: String = chars[i + 1..end].iter().collect();
                        match session.filter(|s| s.is_valid()).and_then(|s| s.get(&name)) {
                            Some(value) => out.push_str(&value),
                            None if session.is_some_and(|s| s.is_valid()) => {
                                // valid session, attribute just absent: empty expansion.
                            }
                            None => {
                                // no valid session at all: preserve the literal token.
                                out.push('{');
                                out.push_str(&name);
                                out.push('}');
                            }
                        }
                        i = end + 1;
                        continue;
                    }
                    out.push(c);
                    i += 1;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        out
    }
}

fn read_identifier(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut end = start;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '-')
    {
        end += 1;
    }
    if end == start {
        None
    } else {
        Some((chars[start..end].iter().collect(), end))
    }
}

fn find_close(chars: &[char], open: usize, close: char) -> Option<usize> {
    chars.iter().skip(open + 1).position(|&c| c == close).map(|p| open + 1 + p)
}

fn expand_bracket(inner: &str, request: &Request) -> String {
    if let Some(name) = inner.strip_prefix("request?") {
        return request.request_param(name).unwrap_or_default();
    }
    if let Some(name) = inner.strip_prefix("request$") {
        return request.header(name).map(str::to_string).unwrap_or_default();
    }
    match inner {
        "request.body" => request.get_body_as_string(),
        "request.method" => request.method.to_string(),
        "request.path" => request.path.clone(),
        "request.query" => request.query_raw.clone(),
        "request.major" => request.version_major.to_string(),
        "request.minor" => request.version_minor.to_string(),
        "request.target" => request.raw_target.clone(),
        "request.time" => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
