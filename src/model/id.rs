use chrono::{DateTime, Utc};

/// Longest slug kept in an episode id.
pub const MAX_SLUG_LEN: usize = 50;

/// Builds an episode id of the form `ep-<YYYYMMDD>-<slug>`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use podfeed::model::episode_id;
///
/// let date = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
/// assert_eq!(episode_id("Hello, World!", date), "ep-20240501-hello-world");
/// ```
pub fn episode_id(title: &str, pub_date: DateTime<Utc>) -> String {
    format!("ep-{}-{}", pub_date.format("%Y%m%d"), slugify(title))
}

/// Lowercases `title`, collapses every run of characters outside `[a-z0-9]`
/// into one hyphen, trims hyphens from both ends and truncates.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_hyphen = false;

    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    // ASCII only at this point, so byte truncation is char-safe.
    slug.truncate(MAX_SLUG_LEN);
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_slugify_collapses_runs() {
        assert_eq!(slugify("Hello,   World!!"), "hello-world");
        assert_eq!(slugify("--Leading and trailing--"), "leading-and-trailing");
        assert_eq!(slugify("Episode #12: The Return"), "episode-12-the-return");
    }

    #[test]
    fn test_slugify_drops_non_ascii() {
        assert_eq!(slugify("Café Über Alles"), "caf-ber-alles");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn test_slugify_truncates() {
        let title = "a".repeat(80);
        assert_eq!(slugify(&title).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn test_episode_id_uses_date() {
        let date = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(episode_id("Year End", date), "ep-20231231-year-end");
    }

    proptest! {
        #[test]
        fn prop_slug_is_url_safe(title in "\\PC{0,120}") {
            let slug = slugify(&title);
            prop_assert!(slug.len() <= MAX_SLUG_LEN);
            prop_assert!(slug.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-'));
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.contains("--"));
        }
    }
}
