//! In-memory text document with offset/position translation
//!
//! Offsets count Unicode scalar values, matching [`Position::character`].
//! The line index is built lazily on first use and dropped on every mutation.

use super::position::{Position, Range};
use super::uri::DocumentUri;
use regex::Regex;
use std::sync::{LazyLock, OnceLock};

/// Default identifier pattern used by [`DocumentModel::word_range_at`]
pub const DEFAULT_WORD_PATTERN: &str =
    r#"(-?\d*\.\d\w*)|([^`~!@#$%^&*()\-=+\[{\]}\\|;:'",.<>/?\s]+)"#;

static DEFAULT_WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_WORD_PATTERN).expect("default word pattern is valid"));

#[derive(Debug, Clone)]
struct LineIndex {
    /// Character offset where each line begins; always starts with 0
    char_starts: Vec<usize>,
    /// Byte offset of the same line starts
    byte_starts: Vec<usize>,
    char_len: usize,
}

impl LineIndex {
    fn build(content: &str) -> Self {
        let mut char_starts = vec![0];
        let mut byte_starts = vec![0];
        let mut char_count = 0;
        let mut chars = content.char_indices().peekable();

        while let Some((byte_offset, ch)) = chars.next() {
            char_count += 1;
            match ch {
                '\r' => {
                    if let Some(&(_, '\n')) = chars.peek() {
                        chars.next();
                        char_count += 1;
                        char_starts.push(char_count);
                        byte_starts.push(byte_offset + 2);
                    } else {
                        char_starts.push(char_count);
                        byte_starts.push(byte_offset + 1);
                    }
                }
                '\n' => {
                    char_starts.push(char_count);
                    byte_starts.push(byte_offset + 1);
                }
                _ => {}
            }
        }

        Self {
            char_starts,
            byte_starts,
            char_len: char_count,
        }
    }

    fn line_count(&self) -> usize {
        self.char_starts.len()
    }

    /// Line containing character `offset` (already clamped)
    fn line_of(&self, offset: usize) -> usize {
        self.char_starts.partition_point(|&start| start <= offset) - 1
    }

    /// Last character offset addressable on `line`, before its line break
    fn line_limit(&self, line: usize) -> usize {
        match self.char_starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.char_len,
        }
    }
}

/// A line of a [`DocumentModel`] without its line break
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine<'a> {
    pub line_number: u32,
    pub text: &'a str,
    pub range: Range,
    pub range_including_line_break: Range,
    pub first_non_whitespace_character_index: u32,
    pub is_empty_or_whitespace: bool,
}

#[derive(Debug, Clone)]
pub struct DocumentModel {
    uri: DocumentUri,
    language_id: String,
    version: i32,
    content: String,
    line_index: OnceLock<LineIndex>,
    is_dirty: bool,
    is_closed: bool,
}

impl DocumentModel {
    pub fn new(uri: DocumentUri, language_id: impl Into<String>, version: i32, content: String) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            version,
            content,
            line_index: OnceLock::new(),
            is_dirty: false,
            is_closed: false,
        }
    }

    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.index().char_len
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn line_count(&self) -> u32 {
        to_u32(self.index().line_count())
    }

    fn index(&self) -> &LineIndex {
        self.line_index.get_or_init(|| LineIndex::build(&self.content))
    }

    /// Replace the whole buffer; the line index is rebuilt on next use
    pub(crate) fn replace_content(&mut self, content: String, version: i32) {
        self.content = content;
        self.version = version;
        self.line_index = OnceLock::new();
    }

    pub(crate) fn set_language_id(&mut self, language_id: impl Into<String>) {
        self.language_id = language_id.into();
    }

    pub(crate) fn set_uri(&mut self, uri: DocumentUri) {
        self.uri = uri;
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.is_closed = true;
    }

    /// Position of character `offset`; offsets past the end clamp to the end
    pub fn position_at(&self, offset: usize) -> Position {
        let index = self.index();
        let offset = offset.min(index.char_len);
        let line = index.line_of(offset);
        Position::new(to_u32(line), to_u32(offset - index.char_starts[line]))
    }

    /// Character offset of `position`, clamped to the document and to the
    /// end of the addressed line
    pub fn offset_at(&self, position: Position) -> usize {
        let index = self.index();
        let line = position.line as usize;
        if line >= index.line_count() {
            return index.char_len;
        }
        let start = index.char_starts[line];
        (start + position.character as usize).min(index.line_limit(line))
    }

    /// Full text, or the text between the resolved offsets of `range`
    pub fn get_text(&self, range: Option<Range>) -> &str {
        let Some(range) = range else {
            return &self.content;
        };
        let mut start = self.byte_offset(self.offset_at(range.start));
        let mut end = self.byte_offset(self.offset_at(range.end));
        if end < start {
            std::mem::swap(&mut start, &mut end);
        }
        self.content.get(start..end).unwrap_or_default()
    }

    fn byte_offset(&self, char_offset: usize) -> usize {
        let index = self.index();
        let line = index.line_of(char_offset.min(index.char_len));
        let line_byte_start = index.byte_starts[line];
        let skip = char_offset - index.char_starts[line];
        let rest = self.content.get(line_byte_start..).unwrap_or_default();
        rest.char_indices()
            .nth(skip)
            .map(|(byte, _)| line_byte_start + byte)
            .unwrap_or(self.content.len())
    }

    pub fn line_at(&self, line: u32) -> Option<TextLine<'_>> {
        let index = self.index();
        let line_number = line as usize;
        if line_number >= index.line_count() {
            return None;
        }

        let start = index.char_starts[line_number];
        let limit = index.line_limit(line_number);
        let next_start = index
            .char_starts
            .get(line_number + 1)
            .copied()
            .unwrap_or(index.char_len);

        let byte_start = index.byte_starts[line_number];
        let byte_end = self.byte_offset(limit);
        let mut text = self.content.get(byte_start..byte_end).unwrap_or_default();
        // A "\r\n" break leaves the '\r' inside the addressable range
        if let Some(stripped) = text.strip_suffix('\r') {
            text = stripped;
        }
        let text_chars = text.chars().count();

        let first_non_whitespace = text
            .chars()
            .position(|c| !c.is_whitespace())
            .unwrap_or(text_chars);

        Some(TextLine {
            line_number: line,
            text,
            range: Range::new(
                Position::new(line, 0),
                Position::new(line, to_u32(text_chars)),
            ),
            range_including_line_break: Range::new(
                Position::new(line, 0),
                self.position_at(next_start),
            ),
            first_non_whitespace_character_index: to_u32(first_non_whitespace),
            is_empty_or_whitespace: first_non_whitespace == text_chars,
        })
    }

    /// Clamp `position` into the document
    pub fn validate_position(&self, position: Position) -> Position {
        self.position_at(self.offset_at(position))
    }

    pub fn validate_range(&self, range: Range) -> Range {
        Range::new(
            self.validate_position(range.start),
            self.validate_position(range.end),
        )
    }

    /// Range of the word at `position`, scanning only its line.
    ///
    /// The first match whose span contains the position wins; empty matches
    /// never count.
    pub fn word_range_at(&self, position: Position, pattern: Option<&Regex>) -> Option<Range> {
        let position = self.validate_position(position);
        let line = self.line_at(position.line)?;
        let regex = pattern.unwrap_or(&DEFAULT_WORD_REGEX);
        let character = position.character as usize;

        regex.find_iter(line.text).find_map(|found| {
            if found.is_empty() {
                return None;
            }
            let start = line.text[..found.start()].chars().count();
            let end = start + found.as_str().chars().count();
            (start <= character && character <= end).then(|| {
                Range::new(
                    Position::new(position.line, to_u32(start)),
                    Position::new(position.line, to_u32(end)),
                )
            })
        })
    }

    /// Text of the word at `position`, if any
    pub fn word_at(&self, position: Position) -> Option<&str> {
        self.word_range_at(position, None)
            .map(|range| self.get_text(Some(range)))
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
