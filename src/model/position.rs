//! Zero-based text coordinates shared by every provider

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Zero-based line/character pair; `character` counts Unicode scalar values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    pub fn is_before(&self, other: &Position) -> bool {
        self < other
    }

    pub fn is_before_or_equal(&self, other: &Position) -> bool {
        self <= other
    }

    pub fn compare(&self, other: &Position) -> Ordering {
        self.cmp(other)
    }

    pub fn translate(&self, line_delta: i64, character_delta: i64) -> Position {
        let shift = |value: u32, delta: i64| {
            u32::try_from((i64::from(value) + delta).max(0)).unwrap_or(u32::MAX)
        };
        Position::new(
            shift(self.line, line_delta),
            shift(self.character, character_delta),
        )
    }
}

/// A span between two positions.
///
/// `start`/`end` are kept as given; offset math orders them when needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub const fn from_coords(
        start_line: u32,
        start_character: u32,
        end_line: u32,
        end_character: u32,
    ) -> Self {
        Self::new(
            Position::new(start_line, start_character),
            Position::new(end_line, end_character),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_single_line(&self) -> bool {
        self.start.line == self.end.line
    }

    /// Same span with `start <= end`
    pub fn normalized(&self) -> Range {
        if self.end < self.start {
            Range::new(self.end, self.start)
        } else {
            *self
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        let range = self.normalized();
        range.start <= position && position <= range.end
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        let other = other.normalized();
        self.contains(other.start) && self.contains(other.end)
    }
}

/// A range with direction: `anchor` stays put, `active` is the caret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
    pub anchor: Position,
    pub active: Position,
}

impl Selection {
    pub fn new(anchor: Position, active: Position) -> Self {
        let (start, end) = if active < anchor {
            (active, anchor)
        } else {
            (anchor, active)
        };
        Self {
            start,
            end,
            anchor,
            active,
        }
    }

    pub fn caret(position: Position) -> Self {
        Self::new(position, position)
    }

    pub fn is_reversed(&self) -> bool {
        self.active < self.anchor
    }

    pub fn range(&self) -> Range {
        Range::new(self.start, self.end)
    }

    pub fn is_empty(&self) -> bool {
        self.range().is_empty()
    }
}

impl From<lsp_types::Position> for Position {
    fn from(position: lsp_types::Position) -> Self {
        Position::new(position.line, position.character)
    }
}

impl From<Position> for lsp_types::Position {
    fn from(position: Position) -> Self {
        lsp_types::Position::new(position.line, position.character)
    }
}

impl From<lsp_types::Range> for Range {
    fn from(range: lsp_types::Range) -> Self {
        Range::new(range.start.into(), range.end.into())
    }
}

impl From<Range> for lsp_types::Range {
    fn from(range: Range) -> Self {
        lsp_types::Range::new(range.start.into(), range.end.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_predicates() {
        let empty = Range::from_coords(1, 2, 1, 2);
        assert!(empty.is_empty());
        assert!(empty.is_single_line());

        let multi = Range::from_coords(1, 0, 3, 4);
        assert!(!multi.is_empty());
        assert!(!multi.is_single_line());
        assert!(multi.contains(Position::new(2, 100)));
        assert!(!multi.contains(Position::new(3, 5)));
    }

    #[test]
    fn test_reversed_range_is_kept_but_normalizes() {
        let reversed = Range::from_coords(4, 0, 2, 0);
        assert_eq!(reversed.start, Position::new(4, 0));
        assert_eq!(reversed.normalized(), Range::from_coords(2, 0, 4, 0));
        assert!(reversed.contains(Position::new(3, 0)));
    }

    #[test]
    fn test_selection_direction() {
        let selection = Selection::new(Position::new(5, 3), Position::new(2, 1));
        assert!(selection.is_reversed());
        assert_eq!(selection.start, Position::new(2, 1));
        assert_eq!(selection.end, Position::new(5, 3));
        assert_eq!(selection.anchor, Position::new(5, 3));

        assert!(!Selection::caret(Position::new(0, 0)).is_reversed());
        assert!(Selection::caret(Position::new(0, 0)).is_empty());
    }

    #[test]
    fn test_translate_saturates_at_zero() {
        assert_eq!(Position::new(1, 1).translate(-5, 2), Position::new(0, 3));
    }

    #[test]
    fn test_lsp_conversion() {
        let range = Range::from_coords(1, 2, 3, 4);
        let lsp: lsp_types::Range = range.into();
        assert_eq!(Range::from(lsp), range);
    }
}
