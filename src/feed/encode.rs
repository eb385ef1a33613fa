use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::{Cursor, Write};
use thiserror::Error;

use super::resolve::resolve;
use crate::model::{Episode, Podcast, DEFAULT_AUDIO_TYPE};

/// Namespace URI for the `itunes:` prefix.
pub const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

const GENERATOR: &str = concat!("podfeed ", env!("CARGO_PKG_VERSION"));

/// Errors that abort feed generation as a whole.
///
/// Per-episode URL problems never end up here; those episodes are skipped.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to write feed XML: {0}")]
    Xml(String),
}

/// An episode left out of the feed because its audio reference would not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEpisode {
    pub id: String,
    pub audio_url: String,
    pub reason: String,
}

/// Output of [`encode`]: the markup plus what had to be dropped.
#[derive(Debug, Clone)]
pub struct EncodedFeed {
    pub xml: Vec<u8>,
    pub skipped: Vec<SkippedEpisode>,
}

/// Encodes a podcast as an RSS 2.0 + iTunes feed.
///
/// Items are written newest first; the podcast itself is not reordered.
/// Relative references are resolved against `base_url`. An episode whose
/// audio reference cannot be resolved is logged, recorded in
/// [`EncodedFeed::skipped`] and left out; a channel image that cannot be
/// resolved is dropped from the channel. Output depends only on the input,
/// so the same state always yields the same bytes.
pub fn encode(podcast: &Podcast, base_url: &str) -> Result<EncodedFeed, EncodeError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let mut skipped = Vec::new();

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:itunes", ITUNES_NS));
    writer.write_event(Event::Start(rss)).map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .map_err(xml_err)?;

    write_channel(&mut writer, podcast, base_url)?;

    let mut episodes: Vec<&Episode> = podcast.episodes.iter().collect();
    episodes.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    for episode in episodes {
        let audio_url = if episode.audio_url.is_empty() {
            None
        } else {
            match resolve(base_url, &episode.audio_url) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(
                        episode = %episode.id,
                        audio_url = %episode.audio_url,
                        error = %e,
                        "Skipping episode with unresolvable audio URL"
                    );
                    skipped.push(SkippedEpisode {
                        id: episode.id.clone(),
                        audio_url: episode.audio_url.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            }
        };
        write_item(&mut writer, episode, audio_url.as_deref())?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .map_err(xml_err)?;

    let mut xml = writer.into_inner().into_inner();
    xml.push(b'\n');
    Ok(EncodedFeed { xml, skipped })
}

/// Shorthand for [`encode`] when only the bytes matter.
pub fn encode_xml(podcast: &Podcast, base_url: &str) -> Result<Vec<u8>, EncodeError> {
    encode(podcast, base_url).map(|feed| feed.xml)
}

fn write_channel<W: Write>(
    writer: &mut Writer<W>,
    podcast: &Podcast,
    base_url: &str,
) -> Result<(), EncodeError> {
    let channel = &podcast.channel;

    text_element(writer, "title", &channel.title)?;
    text_element(writer, "link", &channel.link)?;
    text_element(writer, "description", &channel.description)?;
    text_element(writer, "language", &channel.language)?;
    text_element(writer, "pubDate", &channel.pub_date.to_rfc2822())?;
    text_element(writer, "generator", GENERATOR)?;

    optional_text_element(writer, "itunes:author", &channel.author)?;
    optional_text_element(writer, "itunes:subtitle", &channel.subtitle)?;
    optional_text_element(writer, "itunes:summary", &channel.summary)?;

    if !channel.image_url.is_empty() {
        match resolve(base_url, &channel.image_url) {
            Ok(href) => {
                let mut image = BytesStart::new("itunes:image");
                image.push_attribute(("href", href.as_str()));
                writer.write_event(Event::Empty(image)).map_err(xml_err)?;
            }
            Err(e) => {
                tracing::warn!(
                    image_url = %channel.image_url,
                    error = %e,
                    "Omitting podcast image with unresolvable URL"
                );
            }
        }
    }

    if let Some(explicit) = channel.explicit {
        text_element(writer, "itunes:explicit", explicit.as_str())?;
    }

    if !channel.category.is_empty() {
        let mut category = BytesStart::new("itunes:category");
        category.push_attribute(("text", channel.category.as_str()));
        writer.write_event(Event::Empty(category)).map_err(xml_err)?;
    }

    Ok(())
}

fn write_item<W: Write>(
    writer: &mut Writer<W>,
    episode: &Episode,
    audio_url: Option<&str>,
) -> Result<(), EncodeError> {
    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .map_err(xml_err)?;

    text_element(writer, "title", &episode.title)?;
    text_element(writer, "description", &episode.description)?;
    text_element(writer, "pubDate", &episode.pub_date.to_rfc2822())?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    writer.write_event(Event::Start(guid)).map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(episode.effective_guid())))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("guid")))
        .map_err(xml_err)?;

    if let Some(url) = audio_url {
        let length = episode.audio_length.to_string();
        let mime = if episode.audio_type.is_empty() {
            DEFAULT_AUDIO_TYPE
        } else {
            episode.audio_type.as_str()
        };
        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", url));
        enclosure.push_attribute(("length", length.as_str()));
        enclosure.push_attribute(("type", mime));
        writer.write_event(Event::Empty(enclosure)).map_err(xml_err)?;
    }

    if let Some(duration) = &episode.duration {
        optional_text_element(writer, "itunes:duration", duration)?;
    }
    if let Some(explicit) = episode.explicit {
        text_element(writer, "itunes:explicit", explicit.as_str())?;
    }
    if let Some(n) = episode.episode_number.filter(|n| *n > 0) {
        text_element(writer, "itunes:episode", &n.to_string())?;
    }
    if let Some(n) = episode.season_number.filter(|n| *n > 0) {
        text_element(writer, "itunes:season", &n.to_string())?;
    }
    if let Some(kind) = episode.episode_type {
        text_element(writer, "itunes:episodeType", kind.as_str())?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("item")))
        .map_err(xml_err)?;
    Ok(())
}

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), EncodeError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

fn optional_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), EncodeError> {
    if text.is_empty() {
        return Ok(());
    }
    text_element(writer, name, text)
}

fn xml_err(e: impl std::fmt::Display) -> EncodeError {
    EncodeError::Xml(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, EpisodeType, Explicit};
    use chrono::{TimeZone, Utc};

    fn podcast(episodes: Vec<Episode>) -> Podcast {
        Podcast {
            channel: Channel {
                title: "Test Podcast".to_string(),
                link: "http://example.com".to_string(),
                description: "Test Description".to_string(),
                language: "en-us".to_string(),
                pub_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                author: "Test Author".to_string(),
                subtitle: String::new(),
                summary: String::new(),
                image_url: String::new(),
                explicit: None,
                category: String::new(),
            },
            episodes,
        }
    }

    fn episode(id: &str, day: u32, audio: &str) -> Episode {
        Episode::new(
            id,
            format!("Title {id}"),
            "desc",
            Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap(),
            audio,
            12345,
        )
    }

    fn encode_str(p: &Podcast, base: &str) -> String {
        String::from_utf8(encode_xml(p, base).unwrap()).unwrap()
    }

    #[test]
    fn test_relative_audio_url_becomes_absolute() {
        let p = podcast(vec![episode("ep1", 1, "/audio/episode1.mp3")]);
        let xml = encode_str(&p, "http://example.com:8080");

        assert!(xml.contains(r#"url="http://example.com:8080/audio/episode1.mp3""#));
        assert!(!xml.contains(r#"url="/audio/episode1.mp3""#));
    }

    #[test]
    fn test_relative_image_becomes_absolute() {
        let mut p = podcast(vec![]);
        p.channel.image_url = "/static/artwork/cover.jpg".to_string();
        let xml = encode_str(&p, "https://mypodcast.com");

        assert!(xml.contains(r#"<itunes:image href="https://mypodcast.com/static/artwork/cover.jpg"/>"#));
    }

    #[test]
    fn test_unresolvable_image_is_omitted() {
        let mut p = podcast(vec![]);
        p.channel.image_url = "ht!tp://broken".to_string();
        let xml = encode_str(&p, "https://mypodcast.com");

        assert!(!xml.contains("itunes:image"));
        assert!(xml.contains("<title>Test Podcast</title>"));
    }

    #[test]
    fn test_malformed_episode_skipped_others_kept() {
        let p = podcast(vec![
            episode("ep1", 1, "/audio/valid.mp3"),
            episode("ep2", 2, "ht!tp://bad-url"),
            episode("ep3", 3, "/audio/valid2.mp3"),
        ]);

        let feed = encode(&p, "http://example.com").unwrap();
        let xml = String::from_utf8(feed.xml).unwrap();

        assert_eq!(xml.matches("<item>").count(), 2);
        assert!(xml.contains("Title ep1"));
        assert!(xml.contains("Title ep3"));
        assert!(!xml.contains("Title ep2"));
        assert_eq!(feed.skipped.len(), 1);
        assert_eq!(feed.skipped[0].id, "ep2");
    }

    #[test]
    fn test_items_newest_first_without_touching_input() {
        let p = podcast(vec![
            episode("old", 1, "/a.mp3"),
            episode("new", 20, "/b.mp3"),
            episode("mid", 10, "/c.mp3"),
        ]);
        let xml = encode_str(&p, "http://example.com");

        let new = xml.find("Title new").unwrap();
        let mid = xml.find("Title mid").unwrap();
        let old = xml.find("Title old").unwrap();
        assert!(new < mid && mid < old);

        let ids: Vec<_> = p.episodes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["old", "new", "mid"]);
    }

    #[test]
    fn test_guid_falls_back_to_id() {
        let mut with_guid = episode("ep1", 1, "/a.mp3");
        with_guid.guid = "custom-guid".to_string();
        let p = podcast(vec![with_guid, episode("ep2", 2, "/b.mp3")]);
        let xml = encode_str(&p, "http://example.com");

        assert!(xml.contains(r#"<guid isPermaLink="false">custom-guid</guid>"#));
        assert!(xml.contains(r#"<guid isPermaLink="false">ep2</guid>"#));
    }

    #[test]
    fn test_optional_item_fields_only_when_set() {
        let bare = podcast(vec![episode("ep1", 1, "/a.mp3")]);
        let xml = encode_str(&bare, "http://example.com");
        for tag in [
            "itunes:duration",
            "itunes:explicit",
            "itunes:episode>",
            "itunes:season",
            "itunes:episodeType",
            "itunes:subtitle",
            "itunes:category",
        ] {
            assert!(!xml.contains(tag), "unexpected {tag}");
        }

        let mut full = episode("ep1", 1, "/a.mp3");
        full.duration = Some("00:42:00".to_string());
        full.explicit = Some(Explicit::Clean);
        full.episode_number = Some(7);
        full.season_number = Some(0);
        full.episode_type = Some(EpisodeType::Bonus);
        let xml = encode_str(&podcast(vec![full]), "http://example.com");

        assert!(xml.contains("<itunes:duration>00:42:00</itunes:duration>"));
        assert!(xml.contains("<itunes:explicit>clean</itunes:explicit>"));
        assert!(xml.contains("<itunes:episode>7</itunes:episode>"));
        assert!(!xml.contains("itunes:season"));
        assert!(xml.contains("<itunes:episodeType>bonus</itunes:episodeType>"));
    }

    #[test]
    fn test_special_characters_escaped() {
        let mut ep = episode("ep1", 1, "/a.mp3");
        ep.title = "Q&A <live>".to_string();
        let xml = encode_str(&podcast(vec![ep]), "http://example.com");

        assert!(xml.contains("<title>Q&amp;A &lt;live&gt;</title>"));
    }

    #[test]
    fn test_episode_without_audio_has_no_enclosure() {
        let xml = encode_str(&podcast(vec![episode("ep1", 1, "")]), "http://example.com");
        assert!(xml.contains("<item>"));
        assert!(!xml.contains("<enclosure"));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let p = podcast(vec![episode("ep1", 1, "/a.mp3"), episode("ep2", 2, "/b.mp3")]);
        assert_eq!(
            encode_xml(&p, "http://example.com").unwrap(),
            encode_xml(&p, "http://example.com").unwrap()
        );
    }
}
