use chrono::{DateTime, Utc};
use std::collections::HashSet;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use url::Url;

use crate::model::{episode_id, Channel, Episode, Podcast};

/// Errors that can occur while decoding feed markup.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Well-formed XML, but not an `<rss><channel>` document.
    #[error("Not an RSS feed: {0}")]
    Shape(String),
}

#[derive(Default)]
struct ChannelDraft {
    title: String,
    link: String,
    description: String,
    language: String,
    pub_date: Option<String>,
    author: String,
    subtitle: String,
    summary: String,
    itunes_image: Option<String>,
    rss_image: Option<String>,
    explicit: Option<String>,
    itunes_category: Option<String>,
    category: Option<String>,
}

#[derive(Default)]
struct ItemDraft {
    title: String,
    description: String,
    pub_date: Option<String>,
    guid: String,
    enclosure_url: String,
    enclosure_length: u64,
    enclosure_type: String,
    duration: Option<String>,
    explicit: Option<String>,
    episode: Option<String>,
    season: Option<String>,
    episode_type: Option<String>,
}

/// Decodes RSS 2.0 + iTunes markup into a [`Podcast`].
///
/// Tolerant of feeds written by other generators: unknown elements are
/// ignored, a date that fails to parse becomes the current time, and
/// unrecognized iTunes values decode to `None`. Episode ids are taken from
/// the guid; items without one get an id derived from title and date. A
/// repeated id gets a numeric suffix so ids stay unique. Raw HTML inside a
/// text field is flattened to its text.
///
/// Entity declarations are never expanded (quick-xml 0.37 only knows the
/// five predefined entities), so a document with custom entities fails to
/// decode rather than leaking content.
///
/// # Errors
///
/// Returns [`DecodeError::Xml`] for malformed markup and
/// [`DecodeError::Shape`] when the root is not `<rss>`, there is no
/// `<channel>`, or the document ends with open elements.
pub fn decode(data: &[u8]) -> Result<Podcast, DecodeError> {
    let mut reader = Reader::from_reader(data);

    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    // One text buffer per open element.
    let mut texts: Vec<String> = Vec::new();
    let mut saw_channel = false;

    let mut channel = ChannelDraft::default();
    let mut item: Option<ItemDraft> = None;
    let mut items: Vec<ItemDraft> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                check_root(&stack, &name)?;
                if stack.len() == 1 && name == "channel" {
                    saw_channel = true;
                }
                if stack.len() == 2 && name == "item" && stack[1] == "channel" {
                    item = Some(ItemDraft::default());
                }
                read_attributes(&e, &reader, &stack, &mut channel, item.as_mut());
                stack.push(name);
                texts.push(String::new());
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e);
                check_root(&stack, &name)?;
                if stack.len() == 1 && name == "channel" {
                    saw_channel = true;
                }
                if stack.len() == 2 && name == "item" && stack[1] == "channel" {
                    items.push(ItemDraft::default());
                }
                read_attributes(&e, &reader, &stack, &mut channel, item.as_mut());
            }
            Ok(Event::Text(e)) => {
                let unescaped = e
                    .unescape()
                    .map_err(|e| DecodeError::Xml(e.to_string()))?;
                if let Some(text) = texts.last_mut() {
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(text) = texts.last_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    return Err(DecodeError::Shape("unbalanced closing tag".to_string()));
                };
                let raw = texts.pop().unwrap_or_default();
                let parent = stack.last().map(String::as_str);

                // Unescaped inline markup inside a field (`Hello <b>x</b>`)
                // contributes its text to the field.
                if !matches!(parent, None | Some("rss" | "channel" | "item")) {
                    if let Some(outer) = texts.last_mut() {
                        outer.push_str(&raw);
                    }
                }
                let value = raw.trim().to_string();

                match (stack.len(), parent) {
                    (2, Some("channel")) if name == "item" => {
                        if let Some(done) = item.take() {
                            items.push(done);
                        }
                    }
                    (2, Some("channel")) => assign_channel_field(&mut channel, &name, value),
                    (3, Some("image")) if name == "url" && stack[1] == "channel" => {
                        channel.rss_image = Some(value);
                    }
                    (3, Some("item")) => {
                        if let Some(draft) = item.as_mut() {
                            assign_item_field(draft, &name, value);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DecodeError::Xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(DecodeError::Shape(format!(
            "document ended inside <{}>",
            stack.join("><")
        )));
    }
    if !saw_channel {
        return Err(DecodeError::Shape("missing <channel> element".to_string()));
    }

    let mut episodes: Vec<Episode> = items.into_iter().map(build_episode).collect();
    dedupe_ids(&mut episodes);
    Ok(Podcast {
        channel: build_channel(channel),
        episodes,
    })
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn check_root(stack: &[String], name: &str) -> Result<(), DecodeError> {
    if stack.is_empty() && name != "rss" {
        return Err(DecodeError::Shape(format!(
            "expected <rss> root element, found <{name}>"
        )));
    }
    Ok(())
}

/// Picks up the attribute-carried fields: enclosure, iTunes image and category.
fn read_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    stack: &[String],
    channel: &mut ChannelDraft,
    mut item: Option<&mut ItemDraft>,
) {
    enum Target {
        Enclosure,
        Image,
        Category,
    }

    let in_channel = stack.len() == 2 && stack[1] == "channel";
    let in_item = stack.len() == 3 && stack[2] == "item";
    let target = match e.name().as_ref() {
        b"enclosure" if in_item => Target::Enclosure,
        b"itunes:image" if in_channel => Target::Image,
        b"itunes:category" if in_channel => Target::Category,
        _ => return,
    };

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed feed attribute");
                continue;
            }
        };
        let decode = || match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => Some(v.into_owned()),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable feed attribute");
                None
            }
        };

        match (&target, attr.key.as_ref()) {
            (Target::Image, b"href") => channel.itunes_image = decode(),
            (Target::Category, b"text") => channel.itunes_category = decode(),
            (Target::Enclosure, key) => {
                let Some(draft) = item.as_deref_mut() else {
                    continue;
                };
                match key {
                    b"url" => draft.enclosure_url = decode().unwrap_or_default(),
                    b"length" => {
                        draft.enclosure_length = decode()
                            .and_then(|v| v.trim().parse().ok())
                            .unwrap_or(0);
                    }
                    b"type" => draft.enclosure_type = decode().unwrap_or_default(),
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn assign_channel_field(channel: &mut ChannelDraft, name: &str, value: String) {
    match name {
        "title" => channel.title = value,
        "link" => channel.link = value,
        "description" => channel.description = value,
        "language" => channel.language = value,
        "pubDate" => channel.pub_date = Some(value),
        "itunes:author" => channel.author = value,
        "itunes:subtitle" => channel.subtitle = value,
        "itunes:summary" => channel.summary = value,
        // Some generators write the href as element text.
        "itunes:image" if !value.is_empty() => {
            channel.itunes_image.get_or_insert(value);
        }
        "itunes:explicit" => channel.explicit = Some(value),
        "category" => channel.category = Some(value),
        _ => {}
    }
}

fn assign_item_field(item: &mut ItemDraft, name: &str, value: String) {
    match name {
        "title" => item.title = value,
        "description" => item.description = value,
        "pubDate" => item.pub_date = Some(value),
        "guid" => item.guid = value.trim().to_string(),
        "itunes:duration" => item.duration = Some(value),
        "itunes:explicit" => item.explicit = Some(value),
        "itunes:episode" => item.episode = Some(value),
        "itunes:season" => item.season = Some(value),
        "itunes:episodeType" => item.episode_type = Some(value),
        _ => {}
    }
}

fn build_channel(draft: ChannelDraft) -> Channel {
    Channel {
        title: draft.title,
        link: draft.link,
        description: draft.description,
        language: draft.language,
        pub_date: parse_date(draft.pub_date.as_deref(), "channel pubDate"),
        author: draft.author,
        subtitle: draft.subtitle,
        summary: draft.summary,
        image_url: draft.itunes_image.or(draft.rss_image).unwrap_or_default(),
        explicit: parse_optional(draft.explicit, "itunes:explicit"),
        category: draft
            .itunes_category
            .or(draft.category)
            .unwrap_or_default(),
    }
}

fn build_episode(draft: ItemDraft) -> Episode {
    let pub_date = parse_date(draft.pub_date.as_deref(), "item pubDate");
    let id = if draft.guid.is_empty() {
        episode_id(&draft.title, pub_date)
    } else {
        draft.guid.clone()
    };
    let filename = filename_from_url(&draft.enclosure_url);

    Episode {
        id,
        title: draft.title,
        description: draft.description,
        pub_date,
        guid: draft.guid,
        audio_url: draft.enclosure_url,
        audio_length: draft.enclosure_length,
        audio_type: draft.enclosure_type,
        duration: draft.duration.filter(|d| !d.is_empty()),
        explicit: parse_optional(draft.explicit, "itunes:explicit"),
        episode_number: parse_optional::<u32>(draft.episode, "itunes:episode").filter(|n| *n > 0),
        season_number: parse_optional::<u32>(draft.season, "itunes:season").filter(|n| *n > 0),
        episode_type: parse_optional(draft.episode_type, "itunes:episodeType"),
        filename,
        uploaded_at: None,
    }
}

/// Gives every repeated id a `-2`, `-3`, ... suffix, first occurrence wins.
///
/// Foreign feeds may repeat a guid, and guid-less items with the same title
/// and date generate the same id.
fn dedupe_ids(episodes: &mut [Episode]) {
    let mut seen: HashSet<String> = HashSet::with_capacity(episodes.len());
    for episode in episodes.iter_mut() {
        if seen.insert(episode.id.clone()) {
            continue;
        }
        let unique = (2u32..)
            .map(|n| format!("{}-{}", episode.id, n))
            .find(|candidate| !seen.contains(candidate))
            .unwrap_or_default();
        tracing::warn!(id = %episode.id, renamed = %unique, "Duplicate episode id in feed, renaming");
        episode.id = unique.clone();
        seen.insert(unique);
    }
}

/// RFC 2822 date, or now when missing or unparsable.
fn parse_date(raw: Option<&str>, field: &str) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    match DateTime::parse_from_rfc2822(raw.trim()) {
        Ok(date) => date.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(field, value = %raw, error = %e, "Unparsable feed date, using current time");
            Utc::now()
        }
    }
}

fn parse_optional<T: std::str::FromStr>(raw: Option<String>, field: &str) -> Option<T> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!(field, value = %trimmed, "Ignoring unrecognized feed value");
            None
        }
    }
}

/// Last path segment of an enclosure URL, percent-decoded.
fn filename_from_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let parsed = Url::parse(raw).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(raw))
    });
    let segment = match &parsed {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default(),
        Err(_) => return String::new(),
    };
    percent_decode(segment)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(byte) = s
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EpisodeType, Explicit};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const FOREIGN_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Other Show</title>
    <link>https://other.example.com</link>
    <description><![CDATA[A <b>bold</b> show]]></description>
    <language>en</language>
    <pubDate>Tue, 05 Mar 2024 10:00:00 +0100</pubDate>
    <lastBuildDate>Tue, 05 Mar 2024 10:00:00 +0100</lastBuildDate>
    <image>
      <url>https://other.example.com/logo.png</url>
      <title>Other Show</title>
    </image>
    <itunes:author>Someone</itunes:author>
    <itunes:explicit>false</itunes:explicit>
    <itunes:category text="Comedy"><itunes:category text="Improv"/></itunes:category>
    <item>
      <title>Pilot</title>
      <description>First one</description>
      <pubDate>Mon, 04 Mar 2024 09:00:00 +0000</pubDate>
      <guid isPermaLink="false">pilot-guid</guid>
      <enclosure url="https://cdn.example.com/shows/the%20pilot.mp3" length="999" type="audio/mpeg"/>
      <itunes:duration>12:34</itunes:duration>
      <itunes:episode>1</itunes:episode>
      <itunes:season>2</itunes:season>
      <itunes:episodeType>trailer</itunes:episodeType>
      <itunes:explicit>yes</itunes:explicit>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_decode_foreign_feed() {
        let podcast = decode(FOREIGN_FEED.as_bytes()).unwrap();
        let channel = &podcast.channel;

        assert_eq!(channel.title, "Other Show");
        assert_eq!(channel.description, "A <b>bold</b> show");
        assert_eq!(channel.language, "en");
        assert_eq!(
            channel.pub_date,
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()
        );
        assert_eq!(channel.image_url, "https://other.example.com/logo.png");
        assert_eq!(channel.explicit, Some(Explicit::No));
        assert_eq!(channel.category, "Comedy");

        assert_eq!(podcast.episodes.len(), 1);
        let ep = &podcast.episodes[0];
        assert_eq!(ep.id, "pilot-guid");
        assert_eq!(ep.guid, "pilot-guid");
        assert_eq!(ep.audio_url, "https://cdn.example.com/shows/the%20pilot.mp3");
        assert_eq!(ep.audio_length, 999);
        assert_eq!(ep.duration.as_deref(), Some("12:34"));
        assert_eq!(ep.episode_number, Some(1));
        assert_eq!(ep.season_number, Some(2));
        assert_eq!(ep.episode_type, Some(EpisodeType::Trailer));
        assert_eq!(ep.explicit, Some(Explicit::Yes));
        assert_eq!(ep.filename, "the pilot.mp3");
        assert_eq!(ep.uploaded_at, None);
    }

    #[test]
    fn test_bad_date_becomes_now() {
        let xml = r#"<rss><channel><title>T</title><pubDate>yesterday-ish</pubDate>
            <item><title>A</title><guid>a</guid><pubDate>not a date</pubDate></item>
        </channel></rss>"#;

        let before = Utc::now();
        let podcast = decode(xml.as_bytes()).unwrap();
        let after = Utc::now();

        assert!(podcast.channel.pub_date >= before && podcast.channel.pub_date <= after);
        let ep_date = podcast.episodes[0].pub_date;
        assert!(ep_date >= before && ep_date <= after);
    }

    #[test]
    fn test_missing_guid_gets_generated_id() {
        let xml = r#"<rss><channel><title>T</title>
            <item><title>Hello World</title><pubDate>Mon, 04 Mar 2024 09:00:00 +0000</pubDate></item>
        </channel></rss>"#;

        let podcast = decode(xml.as_bytes()).unwrap();
        assert_eq!(podcast.episodes[0].id, "ep-20240304-hello-world");
        assert_eq!(podcast.episodes[0].guid, "");
    }

    #[test]
    fn test_relative_enclosure_kept_verbatim() {
        let xml = r#"<rss><channel><title>T</title>
            <item><guid>a</guid><enclosure url="/audio/a%20b.mp3" length="x" type="audio/mpeg"/></item>
        </channel></rss>"#;

        let ep = &decode(xml.as_bytes()).unwrap().episodes[0];
        assert_eq!(ep.audio_url, "/audio/a%20b.mp3");
        assert_eq!(ep.audio_length, 0);
        assert_eq!(ep.filename, "a b.mp3");
    }

    #[test]
    fn test_unknown_itunes_values_ignored() {
        let xml = r#"<rss><channel><title>T</title>
            <item><guid>a</guid><itunes:explicit>sometimes</itunes:explicit>
            <itunes:episode>seven</itunes:episode><itunes:episodeType>teaser</itunes:episodeType></item>
        </channel></rss>"#;

        let ep = &decode(xml.as_bytes()).unwrap().episodes[0];
        assert_eq!(ep.explicit, None);
        assert_eq!(ep.episode_number, None);
        assert_eq!(ep.episode_type, None);
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(decode(b"<rss><channel><title>x</channel></rss>").is_err());
        assert!(decode(b"<not valid xml").is_err());
    }

    #[test]
    fn test_unterminated_document_error() {
        let err = decode(b"<rss><channel><title>x</title>").unwrap_err();
        assert!(matches!(err, DecodeError::Shape(_)));
    }

    #[test]
    fn test_wrong_root_error() {
        let err = decode(br#"<opml version="2.0"><body/></opml>"#).unwrap_err();
        assert!(matches!(err, DecodeError::Shape(_)));
    }

    #[test]
    fn test_missing_channel_error() {
        let err = decode(b"<rss version=\"2.0\"></rss>").unwrap_err();
        assert!(matches!(err, DecodeError::Shape(_)));
        assert!(decode(b"").is_err());
    }

    #[test]
    fn test_custom_entity_not_expanded() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<rss><channel><title>&xxe;</title></channel></rss>"#;

        match decode(xml.as_bytes()) {
            Ok(podcast) => assert!(!podcast.channel.title.contains("root:")),
            Err(_) => {}
        }
    }

    #[test]
    fn test_repeated_guids_get_unique_ids() {
        let xml = r#"<rss><channel><title>T</title>
            <item><guid>same</guid><title>First</title></item>
            <item><guid>same</guid><title>Second</title></item>
            <item><guid>same</guid><title>Third</title></item>
        </channel></rss>"#;

        let podcast = decode(xml.as_bytes()).unwrap();
        let ids: Vec<&str> = podcast.episodes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["same", "same-2", "same-3"]);
        assert_eq!(podcast.episode("same").unwrap().title, "First");
        assert_eq!(podcast.episode("same-2").unwrap().title, "Second");
    }

    #[test]
    fn test_guidless_twins_get_unique_ids() {
        let xml = r#"<rss><channel><title>T</title>
            <item><title>Twin</title><pubDate>Fri, 01 Mar 2024 10:00:00 +0000</pubDate></item>
            <item><title>Twin</title><pubDate>Fri, 01 Mar 2024 10:00:00 +0000</pubDate></item>
        </channel></rss>"#;

        let podcast = decode(xml.as_bytes()).unwrap();
        assert_eq!(podcast.episodes[0].id, "ep-20240301-twin");
        assert_eq!(podcast.episodes[1].id, "ep-20240301-twin-2");
    }

    #[test]
    fn test_self_closing_channel_is_empty_feed() {
        let podcast = decode(br#"<rss version="2.0"><channel/></rss>"#).unwrap();
        assert_eq!(podcast.channel.title, "");
        assert!(podcast.episodes.is_empty());
    }

    #[test]
    fn test_inline_markup_text_kept() {
        let xml = r#"<rss><channel><title>T</title>
            <description>Show <i>about</i> things</description>
            <item><guid>a</guid>
              <description>Hello <b>x</b> world</description>
            </item>
        </channel></rss>"#;

        let podcast = decode(xml.as_bytes()).unwrap();
        assert_eq!(podcast.channel.description, "Show about things");
        assert_eq!(podcast.episodes[0].description, "Hello x world");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
