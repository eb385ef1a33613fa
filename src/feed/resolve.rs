use thiserror::Error;
use url::Url;

/// Errors that can occur while turning a stored reference into an absolute URL.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The base URL could not be parsed.
    #[error("Invalid base URL '{base}': {source}")]
    InvalidBase {
        base: String,
        #[source]
        source: url::ParseError,
    },
    /// The candidate is not a valid URI-reference.
    #[error("Invalid URI reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
}

/// Resolves `candidate` against `base` and returns an absolute URL.
///
/// References that already start with `http://` or `https://` are returned
/// untouched. Everything else is validated as a URI-reference and joined to
/// the base with standard relative resolution, which percent-encodes
/// characters such as spaces.
///
/// # Errors
///
/// Returns [`ResolveError`] if:
/// - `base` cannot be parsed ([`ResolveError::InvalidBase`])
/// - `candidate` contains control characters, a malformed `%` escape, or a
///   colon in its first segment without a valid scheme
///   ([`ResolveError::InvalidReference`])
///
/// # Examples
///
/// ```
/// use podfeed::feed::resolve;
///
/// assert_eq!(resolve("http://x.com", "/a.mp3").unwrap(), "http://x.com/a.mp3");
/// assert_eq!(
///     resolve("http://x.com", "http://y.com/a.mp3").unwrap(),
///     "http://y.com/a.mp3"
/// );
/// assert_eq!(
///     resolve("http://x.com", "/my file.mp3").unwrap(),
///     "http://x.com/my%20file.mp3"
/// );
/// assert!(resolve("http://x.com", "ht!tp://bad").is_err());
/// ```
pub fn resolve(base: &str, candidate: &str) -> Result<String, ResolveError> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Ok(candidate.to_owned());
    }

    check_reference(candidate).map_err(|reason| ResolveError::InvalidReference {
        reference: candidate.to_owned(),
        reason,
    })?;

    let base_url = Url::parse(base).map_err(|source| ResolveError::InvalidBase {
        base: base.to_owned(),
        source,
    })?;

    let joined = base_url
        .join(candidate)
        .map_err(|e| ResolveError::InvalidReference {
            reference: candidate.to_owned(),
            reason: e.to_string(),
        })?;

    Ok(joined.into())
}

/// Rejects strings that are not RFC 3986 URI-references.
///
/// The `url` crate is deliberately forgiving and would happily treat
/// `ht!tp://host` as a relative path; a stored reference like that is
/// corrupt, not relative.
fn check_reference(candidate: &str) -> Result<(), String> {
    if let Some(c) = candidate.chars().find(|c| c.is_control()) {
        return Err(format!("control character {:?}", c));
    }

    let bytes = candidate.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(format!("malformed percent escape at byte {i}"));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let first_segment_end = candidate
        .find(['/', '?', '#'])
        .unwrap_or(candidate.len());
    if let Some(colon) = candidate[..first_segment_end].find(':') {
        if !is_scheme(&candidate[..colon]) {
            return Err("colon in first path segment".to_string());
        }
    }

    Ok(())
}

/// `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`
fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
