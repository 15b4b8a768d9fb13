//! Quick-XML based EPG parser
//!
//! Reads the whole feed with a pull parser, keeping only the fields the
//! pipeline stores. Programmes may appear before the channel they reference,
//! so channel lookup happens once the document has been read to the end.

use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::models::{DayKey, FeedChannel, Program};
use crate::utils::text::truncate_chars;
use crate::utils::time::parse_feed_timestamp;

/// Counters describing what the parser kept and why it dropped the rest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub channels_seen: usize,
    pub programmes_seen: usize,
    pub programs_kept: usize,
    /// Programmes whose start falls on another day
    pub other_day: usize,
    /// Programmes referencing a channel id the feed never declares
    pub orphan: usize,
    pub invalid_timestamp: usize,
    /// Kept programmes whose stop is not after their start
    pub non_positive_duration: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedGuide {
    /// Channels keyed by feed id, in document order
    pub channels: IndexMap<String, FeedChannel>,
    /// Programs grouped by channel name, in first-sighting order
    pub programs: IndexMap<String, Vec<Program>>,
    pub report: ParseReport,
}

impl ParsedGuide {
    pub fn program_count(&self) -> usize {
        self.programs.values().map(Vec::len).sum()
    }

    /// Days covered by the kept programs, ascending
    pub fn days(&self) -> Vec<DayKey> {
        let mut days: Vec<DayKey> = self
            .programs
            .values()
            .flatten()
            .map(|p| p.day)
            .collect();
        days.sort();
        days.dedup();
        days
    }
}

/// A `<programme>` element before channel resolution
#[derive(Debug, Default)]
struct RawProgramme {
    channel: String,
    start: String,
    stop: String,
    title: String,
    desc: String,
    icon: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EpgParser {
    description_limit: usize,
}

impl EpgParser {
    pub fn new(description_limit: usize) -> Self {
        Self { description_limit }
    }

    /// Parse the feed keeping only programmes that start on `target`
    pub fn parse(&self, xml: &str, target: DayKey) -> AppResult<ParsedGuide> {
        self.parse_filtered(xml, Some(target))
    }

    /// Parse the feed keeping programmes of every day
    pub fn parse_all(&self, xml: &str) -> AppResult<ParsedGuide> {
        self.parse_filtered(xml, None)
    }

    fn parse_filtered(&self, xml: &str, target: Option<DayKey>) -> AppResult<ParsedGuide> {
        let document = read_document(xml)?;
        let mut report = ParseReport {
            channels_seen: document.channels_seen,
            programmes_seen: document.programmes.len(),
            ..Default::default()
        };
        let mut programs: IndexMap<String, Vec<Program>> = IndexMap::new();

        for raw in document.programmes {
            let Some(day) = DayKey::from_feed_timestamp(raw.start.trim()) else {
                report.invalid_timestamp += 1;
                continue;
            };
            if target.is_some_and(|t| t != day) {
                report.other_day += 1;
                continue;
            }
            let Some(channel) = document.channels.get(&raw.channel) else {
                report.orphan += 1;
                continue;
            };
            let (Some(start), Some(end)) = (
                parse_feed_timestamp(&raw.start),
                parse_feed_timestamp(&raw.stop),
            ) else {
                report.invalid_timestamp += 1;
                continue;
            };
            if end <= start {
                report.non_positive_duration += 1;
            }

            let channel_name = channel.display_name().to_string();
            let raw_description = raw.desc.trim().to_string();
            let program = Program {
                channel_id: raw.channel,
                channel_name: channel_name.clone(),
                day,
                start,
                end,
                title: raw.title.trim().to_string(),
                description: truncate_chars(&raw_description, self.description_limit).to_string(),
                raw_description,
                icon_url: raw.icon,
                image_url: raw.image,
            };
            programs.entry(channel_name).or_default().push(program);
            report.programs_kept += 1;
        }

        match target {
            Some(day) => info!(
                "Parsed feed for {}: {} channels, {} of {} programmes kept",
                day, report.channels_seen, report.programs_kept, report.programmes_seen
            ),
            None => info!(
                "Parsed full feed: {} channels, {} of {} programmes kept",
                report.channels_seen, report.programs_kept, report.programmes_seen
            ),
        }
        debug!(
            "Dropped programmes: other_day={} orphan={} invalid_timestamp={}; non_positive_duration={}",
            report.other_day, report.orphan, report.invalid_timestamp, report.non_positive_duration
        );

        Ok(ParsedGuide {
            channels: document.channels,
            programs,
            report,
        })
    }
}

impl Default for EpgParser {
    fn default() -> Self {
        Self::new(crate::config::defaults::DEFAULT_DESCRIPTION_LIMIT)
    }
}

struct FeedDocument {
    channels: IndexMap<String, FeedChannel>,
    channels_seen: usize,
    programmes: Vec<RawProgramme>,
}

#[derive(Default)]
struct DocumentBuilder {
    channels: IndexMap<String, FeedChannel>,
    channels_seen: usize,
    programmes: Vec<RawProgramme>,
    current_channel: Option<FeedChannel>,
    current_programme: Option<RawProgramme>,
    text: String,
}

impl DocumentBuilder {
    fn open(&mut self, name: &[u8], element: &BytesStart) {
        match name {
            b"channel" => {
                let attrs = parse_attributes(element);
                self.current_channel = Some(FeedChannel {
                    id: attrs.get("id").cloned().unwrap_or_default(),
                    display_names: Vec::new(),
                    icon: None,
                });
            }
            b"programme" => {
                let mut attrs = parse_attributes(element);
                self.current_programme = Some(RawProgramme {
                    channel: attrs.remove("channel").unwrap_or_default(),
                    start: attrs.remove("start").unwrap_or_default(),
                    stop: attrs.remove("stop").unwrap_or_default(),
                    ..Default::default()
                });
            }
            b"icon" => {
                let src = parse_attributes(element).remove("src");
                if let Some(programme) = self.current_programme.as_mut() {
                    programme.icon = src.or(programme.icon.take());
                } else if let Some(channel) = self.current_channel.as_mut() {
                    channel.icon = src.or(channel.icon.take());
                }
            }
            b"programme-image" => {
                if let Some(programme) = self.current_programme.as_mut()
                    && let Some(src) = parse_attributes(element).remove("src")
                {
                    programme.image = Some(src);
                }
            }
            _ => {}
        }
        self.text.clear();
    }

    fn close(&mut self, name: &[u8]) {
        let text = std::mem::take(&mut self.text);
        match name {
            b"display-name" => {
                if let Some(channel) = self.current_channel.as_mut() {
                    channel.display_names.push(text.trim().to_string());
                }
            }
            b"title" => {
                if let Some(programme) = self.current_programme.as_mut() {
                    programme.title = text;
                }
            }
            b"desc" => {
                if let Some(programme) = self.current_programme.as_mut() {
                    programme.desc = text;
                }
            }
            b"programme-image" => {
                if let Some(programme) = self.current_programme.as_mut()
                    && programme.image.is_none()
                    && !text.trim().is_empty()
                {
                    programme.image = Some(text.trim().to_string());
                }
            }
            b"channel" => {
                if let Some(channel) = self.current_channel.take() {
                    self.channels_seen += 1;
                    // First declaration of an id wins
                    self.channels.entry(channel.id.clone()).or_insert(channel);
                }
            }
            b"programme" => {
                if let Some(programme) = self.current_programme.take() {
                    self.programmes.push(programme);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> FeedDocument {
        FeedDocument {
            channels: self.channels,
            channels_seen: self.channels_seen,
            programmes: self.programmes,
        }
    }
}

fn malformed(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::malformed_feed(format!("{context}: {e}"))
}

fn read_document(xml: &str) -> AppResult<FeedDocument> {
    let mut reader = Reader::from_str(xml);
    let mut builder = DocumentBuilder::default();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if depth == 0 && saw_root {
                    return Err(AppError::malformed_feed("multiple root elements"));
                }
                saw_root = true;
                depth += 1;
                builder.open(e.local_name().as_ref(), e);
            }
            Ok(Event::End(ref e)) => {
                depth = depth.saturating_sub(1);
                builder.close(e.local_name().as_ref());
            }
            Ok(Event::Empty(ref e)) => {
                if depth == 0 && saw_root {
                    return Err(AppError::malformed_feed("multiple root elements"));
                }
                saw_root = true;
                let name = e.local_name();
                builder.open(name.as_ref(), e);
                builder.close(name.as_ref());
            }
            Ok(Event::Text(e)) => {
                let text = std::str::from_utf8(&e).map_err(|e| malformed("Invalid UTF-8 in text", e))?;
                builder.text.push_str(text);
            }
            Ok(Event::CData(e)) => {
                let text =
                    std::str::from_utf8(&e).map_err(|e| malformed("Invalid UTF-8 in CDATA", e))?;
                builder.text.push_str(text);
            }
            Ok(Event::GeneralRef(e)) => {
                let entity = std::str::from_utf8(&e)
                    .map_err(|e| malformed("Invalid UTF-8 in entity reference", e))?;
                builder.text.push_str(&resolve_entity(entity)?);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(malformed(
                    &format!("XML parsing error at position {}", reader.error_position()),
                    e,
                ));
            }
            _ => {} // Declarations, comments and processing instructions
        }
    }

    if !saw_root {
        return Err(AppError::malformed_feed("document has no root element"));
    }
    if depth != 0 {
        return Err(AppError::malformed_feed(format!(
            "unexpected end of document with {depth} unclosed element(s)"
        )));
    }
    Ok(builder.finish())
}

/// Expand a predefined (`amp`) or numeric (`#233`, `#xE9`) entity name
fn resolve_entity(entity: &str) -> AppResult<String> {
    if let Some(value) = resolve_predefined_entity(entity) {
        return Ok(value.to_string());
    }
    let code = match entity.strip_prefix('#') {
        Some(hex) if hex.starts_with('x') || hex.starts_with('X') => {
            u32::from_str_radix(&hex[1..], 16).ok()
        }
        Some(decimal) => decimal.parse().ok(),
        None => None,
    };
    code.and_then(char::from_u32)
        .map(String::from)
        .ok_or_else(|| AppError::malformed_feed(format!("unknown entity '&{entity};'")))
}

/// Parse element attributes, unescaping their values
fn parse_attributes(element: &BytesStart) -> HashMap<String, String> {
    let mut attrs = HashMap::new();

    for attr in element.attributes().flatten() {
        let Ok(key) = std::str::from_utf8(attr.key.local_name().into_inner()) else {
            continue;
        };
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attrs.insert(key.to_string(), value);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <programme channel="c1" start="20240601200000 +0200" stop="20240601213000 +0200">
    <title>Telediario &amp; Deportes</title>
    <desc><![CDATA[2023 | 16 | 8/10
Drama / Thriller · A gripping tale]]></desc>
    <icon src="https://img.example/td.png"/>
  </programme>
  <channel id="c1">
    <display-name>La 1</display-name>
    <display-name>TVE 1</display-name>
    <icon src="https://img.example/la1.png"/>
  </channel>
  <channel id="c2">
    <display-name>UnknownChan</display-name>
  </channel>
  <programme channel="c1" start="2024060100000" stop="20240601010000">
    <title>Noticias</title>
  </programme>
  <programme channel="c2" start="20240602080000" stop="20240602090000">
    <title>Mañana</title>
    <programme-image>https://img.example/manana.jpg</programme-image>
  </programme>
  <programme channel="c9" start="20240601080000" stop="20240601090000">
    <title>Orphan</title>
  </programme>
  <programme channel="c2" start="20240601090000" stop="20240601090000">
    <title>Zero length</title>
  </programme>
  <programme channel="c2" start="2024xx01090000" stop="20240601100000">
    <title>Broken</title>
  </programme>
</tv>"#;

    fn day(s: &str) -> DayKey {
        DayKey::parse(s).unwrap()
    }

    #[test]
    fn test_parse_filters_to_target_day() {
        let guide = EpgParser::default().parse(FEED, day("20240601")).unwrap();

        assert_eq!(guide.channels.len(), 2);
        assert_eq!(guide.channels["c1"].icon.as_deref(), Some("https://img.example/la1.png"));

        let names: Vec<&str> = guide.programs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["La 1", "UnknownChan"]);

        let la1 = &guide.programs["La 1"];
        assert_eq!(la1.len(), 2);
        assert_eq!(la1[0].title, "Telediario & Deportes");
        assert_eq!(la1[0].icon_url.as_deref(), Some("https://img.example/td.png"));
        assert_eq!(la1[0].start.to_rfc3339(), "2024-06-01T20:00:00+00:00");
        assert_eq!(la1[0].duration_minutes(), 90);
        assert!(la1[0].raw_description.starts_with("2023 | 16 | 8/10\nDrama"));
        assert_eq!(la1[1].title, "Noticias");
        assert_eq!(la1[1].start.to_rfc3339(), "2024-06-01T00:00:00+00:00");

        assert!(guide.programs.values().flatten().all(|p| p.day == day("20240601")));

        let report = &guide.report;
        assert_eq!(report.channels_seen, 2);
        assert_eq!(report.programmes_seen, 6);
        assert_eq!(report.programs_kept, 3);
        assert_eq!(report.other_day, 1);
        assert_eq!(report.orphan, 1);
        assert_eq!(report.invalid_timestamp, 1);
        assert_eq!(report.non_positive_duration, 1);
    }

    #[test]
    fn test_parse_other_day() {
        let guide = EpgParser::default().parse(FEED, day("20240602")).unwrap();
        assert_eq!(guide.program_count(), 1);
        let program = &guide.programs["UnknownChan"][0];
        assert_eq!(program.title, "Mañana");
        assert_eq!(program.image_url.as_deref(), Some("https://img.example/manana.jpg"));
    }

    #[test]
    fn test_parse_day_without_programmes() {
        let guide = EpgParser::default().parse(FEED, day("20240603")).unwrap();
        assert_eq!(guide.program_count(), 0);
        assert_eq!(guide.channels.len(), 2);
    }

    #[test]
    fn test_parse_all_keeps_every_day() {
        let guide = EpgParser::default().parse_all(FEED).unwrap();
        assert_eq!(guide.program_count(), 4);
        assert_eq!(guide.report.other_day, 0);
        assert_eq!(guide.days(), vec![day("20240601"), day("20240602")]);
    }

    #[test]
    fn test_description_truncated_by_chars() {
        let desc = "é".repeat(600);
        let xml = format!(
            r#"<tv><channel id="a"><display-name>A</display-name></channel>
<programme channel="a" start="20240601000000" stop="20240601010000"><title>T</title><desc>{desc}</desc></programme></tv>"#
        );
        let guide = EpgParser::new(500).parse(&xml, day("20240601")).unwrap();
        let program = &guide.programs["A"][0];
        assert_eq!(program.description.chars().count(), 500);
        assert_eq!(program.raw_description.chars().count(), 600);
    }

    #[test]
    fn test_channel_without_display_name_groups_by_id() {
        let xml = r#"<tv><channel id="bare"/>
<programme channel="bare" start="20240601000000" stop="20240601010000"><title>T</title></programme></tv>"#;
        let guide = EpgParser::default().parse(xml, day("20240601")).unwrap();
        assert!(guide.programs.contains_key("bare"));
    }

    #[test]
    fn test_numeric_entities() {
        let xml = r#"<tv><channel id="a"><display-name>Canal &#241; &#xE9;</display-name></channel></tv>"#;
        let guide = EpgParser::default().parse_all(xml).unwrap();
        assert_eq!(guide.channels["a"].display_name(), "Canal ñ é");
    }

    #[test]
    fn test_malformed_xml_is_fatal() {
        for xml in [
            "<tv><channel id=\"a\"></tv>",
            "<tv><programme channel=\"a\">",
            "",
            "not xml at all",
        ] {
            let err = EpgParser::default().parse_all(xml).unwrap_err();
            assert!(matches!(err, AppError::MalformedFeed { .. }), "{xml:?} gave {err:?}");
        }
    }
}
