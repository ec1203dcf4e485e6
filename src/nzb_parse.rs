//! NZB manifest ingestion (C10): turns an NZB XML document into the
//! [`crate::model`] graph and inserts it into a [`QueueState`].
//!
//! `quick-xml` is the parser used elsewhere in this dependency family for
//! feed/markup parsing, kept here for NZB's own XML dialect (see
//! `DESIGN.md`).

use quick_xml::events::Event as XmlEvent;
use quick_xml::reader::Reader;

use crate::error::{Error, Result};
use crate::model::{ArticleId, ArticleInfo, FileId, FileInfo, NzbId, NzbInfo};
use crate::par::parse_par_filename;
use crate::queue::QueueState;

/// One `<segment>` from a `<file>` element, in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ParsedSegment {
    number: u32,
    bytes: u64,
    message_id: String,
}

/// One `<file>` element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ParsedFile {
    subject: String,
    groups: Vec<String>,
    segments: Vec<ParsedSegment>,
}

/// The parsed contents of an NZB document, before ids are assigned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedNzb {
    files: Vec<ParsedFile>,
}

impl ParsedNzb {
    /// Number of `<file>` elements found.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Parse an NZB XML document into its file/segment structure.
///
/// Tolerant of the `<head>`/`<meta>` block (ignored — NZB metadata carries
/// no information this crate's model needs) and of any namespace prefix on
/// the root element.
pub fn parse_nzb(xml: &[u8]) -> Result<ParsedNzb> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut files = Vec::new();
    let mut current: Option<ParsedFile> = None;
    let mut in_segments = false;
    let mut pending_segment: Option<(u32, u64)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidNzb(e.to_string()))? {
            XmlEvent::Eof => break,
            XmlEvent::Start(tag) | XmlEvent::Empty(tag) => {
                let tag_name = tag.name();
                let local = local_name(tag_name.as_ref());
                match local {
                    "file" => {
                        let mut file = ParsedFile::default();
                        for attr in tag.attributes().flatten() {
                            if local_name(attr.key.as_ref()) == "subject" {
                                file.subject = attr
                                    .decode_and_unescape_value(reader.decoder())
                                    .map_err(|e| Error::InvalidNzb(e.to_string()))?
                                    .into_owned();
                            }
                        }
                        current = Some(file);
                    }
                    "group" => {}
                    "segments" => in_segments = true,
                    "segment" if in_segments => {
                        let mut number = 0u32;
                        let mut bytes = 0u64;
                        for attr in tag.attributes().flatten() {
                            let value = attr
                                .decode_and_unescape_value(reader.decoder())
                                .map_err(|e| Error::InvalidNzb(e.to_string()))?;
                            match local_name(attr.key.as_ref()) {
                                "number" => {
                                    number = value.parse().map_err(|_| {
                                        Error::InvalidNzb(format!("non-numeric segment number {value}"))
                                    })?;
                                }
                                "bytes" => {
                                    bytes = value.parse().map_err(|_| {
                                        Error::InvalidNzb(format!("non-numeric segment bytes {value}"))
                                    })?;
                                }
                                _ => {}
                            }
                        }
                        pending_segment = Some((number, bytes));
                    }
                    _ => {}
                }
            }
            XmlEvent::Text(text) => {
                if let (Some((number, bytes)), Some(file)) = (pending_segment.take(), current.as_mut()) {
                    let message_id = text
                        .unescape()
                        .map_err(|e| Error::InvalidNzb(e.to_string()))?
                        .trim()
                        .to_string();
                    if !message_id.is_empty() {
                        file.segments.push(ParsedSegment {
                            number,
                            bytes,
                            message_id,
                        });
                    }
                } else if let Some(file) = current.as_mut() {
                    // Plain text inside <group> (or any other child element
                    // we don't otherwise care about, e.g. <head>/<meta>).
                    let name = text.unescape().map_err(|e| Error::InvalidNzb(e.to_string()))?;
                    let trimmed = name.trim();
                    if !trimmed.is_empty() && !in_segments {
                        file.groups.push(trimmed.to_string());
                    }
                }
            }
            XmlEvent::End(tag) => match local_name(tag.name().as_ref()) {
                "segments" => in_segments = false,
                "file" => {
                    if let Some(file) = current.take() {
                        if file.segments.is_empty() {
                            return Err(Error::InvalidNzb(format!(
                                "file \"{}\" has no segments",
                                file.subject
                            )));
                        }
                        files.push(file);
                    }
                }
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    if files.is_empty() {
        return Err(Error::InvalidNzb("NZB document contains no <file> elements".into()));
    }

    Ok(ParsedNzb { files })
}

fn local_name(qualified: &[u8]) -> &str {
    let s = std::str::from_utf8(qualified).unwrap_or("");
    match s.rfind(':') {
        Some(idx) => &s[idx + 1..],
        None => s,
    }
}

/// Best-effort filename extraction from a `<file subject="...">` string.
///
/// Posters conventionally quote the real filename inside the subject, e.g.
/// `"Some.Release-GRP" - "some.release.r00" yEnc (1/42)`. We take the last
/// quoted span containing a `.`, falling back to the whole subject.
pub fn extract_filename_from_subject(subject: &str) -> String {
    let quoted: Vec<&str> = subject.split('"').collect();
    // split('"') on "a" "b" "c" yields ["", "a", " ", "b", " ", "c", ""];
    // quoted spans sit at odd indices.
    let candidate = quoted
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| *s)
        .rev()
        .find(|s| s.contains('.'));

    candidate.unwrap_or(subject).trim().to_string()
}

/// Insert a [`ParsedNzb`] into `state`, allocating fresh ids, and return
/// the new NZB's id.
///
/// Mirrors `QueueState::insert_nzb`'s arena-by-id convention: every id used
/// below comes from `state`'s own allocators, so restoring a persisted
/// snapshot and then ingesting a new NZB never collides.
pub fn ingest(
    state: &mut QueueState,
    parsed: ParsedNzb,
    name: impl Into<String>,
    source_filename: impl Into<String>,
) -> NzbId {
    let nzb_id = NzbId::new(state.nzb_ids.next());
    let mut nzb = NzbInfo::new(nzb_id, name, source_filename);

    let mut files = Vec::new();
    let mut articles = Vec::new();

    for parsed_file in parsed.files {
        let file_id = FileId::new(state.file_ids.next());
        let filename = extract_filename_from_subject(&parsed_file.subject);
        let par_file = parse_par_filename(&filename).is_some();

        let mut ordered_segments = parsed_file.segments;
        ordered_segments.sort_by_key(|s| s.number);
        let size = ordered_segments.iter().map(|s| s.bytes).sum();

        let mut file = FileInfo::new(file_id, nzb_id, parsed_file.subject, size);
        file.filename = filename;
        file.filename_confirmed = false;
        file.par_file = par_file;
        file.groups = parsed_file.groups;

        let mut offset = 0u64;
        for segment in ordered_segments {
            let article_id = ArticleId::new(state.article_ids.next());
            let article = ArticleInfo::new(
                article_id,
                file_id,
                segment.number,
                segment.message_id,
                offset,
                segment.bytes,
            );
            offset += segment.bytes;
            file.articles.push(article_id);
            articles.push(article);
        }

        nzb.files.push(file_id);
        files.push(file);
    }

    state.insert_nzb(nzb, files, articles);
    nzb_id
}
