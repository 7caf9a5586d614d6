use std::ops::{Range, RangeInclusive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SourceOffset(usize);

impl SourceOffset {
    pub fn byte_offset(&self) -> usize {
        self.0
    }
}

impl From<usize> for SourceOffset {
    fn from(offset: usize) -> Self {
        Self(offset)
    }
}

impl From<SourceOffset> for miette::SourceOffset {
    fn from(offset: SourceOffset) -> Self {
        offset.0.into()
    }
}
impl From<SourceOffset> for miette::SourceSpan {
    fn from(offset: SourceOffset) -> Self {
        SourceSpan::from(offset).into()
    }
}

/// Byte range into a script's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    offset: SourceOffset,
    length: SourceOffset,
}

impl SourceSpan {
    pub fn new(offset: SourceOffset, length: SourceOffset) -> Self {
        Self { offset, length }
    }
    pub fn len(&self) -> usize {
        self.length.0
    }
    pub fn is_empty(&self) -> bool {
        self.length.0 == 0
    }
    pub fn range(start: SourceOffset, end: SourceOffset) -> Self {
        Self {
            offset: start,
            length: end.0.saturating_sub(start.0).into(),
        }
    }
    pub fn start(&self) -> SourceOffset {
        self.offset
    }
    pub fn end(&self) -> SourceOffset {
        (self.offset.0 + self.length.0).into()
    }
    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: SourceSpan) -> Self {
        Self::range(self.start().min(other.start()), self.end().max(other.end()))
    }
}

impl From<SourceOffset> for SourceSpan {
    fn from(offset: SourceOffset) -> Self {
        Self::new(offset, 1.into())
    }
}

impl From<SourceSpan> for miette::SourceSpan {
    fn from(span: SourceSpan) -> Self {
        Self::new(span.offset.into(), span.length.into())
    }
}

impl From<Range<usize>> for SourceSpan {
    fn from(range: Range<usize>) -> Self {
        Self::range(range.start.into(), range.end.into())
    }
}
impl From<RangeInclusive<usize>> for SourceSpan {
    fn from(range: RangeInclusive<usize>) -> Self {
        Self::range((*range.start()).into(), (*range.end() + 1).into())
    }
}

impl From<usize> for SourceSpan {
    fn from(offset: usize) -> Self {
        Self::new(offset.into(), 1.into())
    }
}

/// Maps byte offsets to zero-based line and column numbers.
///
/// Columns count `char`s, not bytes, so they line up with what an editor shows.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    source: String,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self {
            line_starts,
            source: source.to_string(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Number of chars on `line`, excluding the line break.
    pub fn line_len(&self, line: usize) -> usize {
        let start = match self.line_starts.get(line) {
            Some(start) => *start,
            None => return 0,
        };
        self.source[start..]
            .split('\n')
            .next()
            .map_or(0, |text| text.trim_end_matches('\r').chars().count())
    }

    pub fn line_col(&self, offset: SourceOffset) -> (usize, usize) {
        let offset = offset.byte_offset().min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next_line) => next_line - 1,
        };
        let line_start = self.line_starts[line];
        let column = self
            .source
            .get(line_start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(offset - line_start);
        (line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_col_counts_chars() {
        let index = LineIndex::new("abc\nhé llo\n\nz");
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(0.into()), (0, 0));
        assert_eq!(index.line_col(3.into()), (0, 3));
        assert_eq!(index.line_col(4.into()), (1, 0));
        // 'é' is two bytes wide
        assert_eq!(index.line_col(8.into()), (1, 3));
        assert_eq!(index.line_col(12.into()), (2, 0));
        assert_eq!(index.line_col(13.into()), (3, 0));
        assert_eq!(index.line_len(1), 6);
        assert_eq!(index.line_len(2), 0);
        assert_eq!(index.line_len(7), 0);
    }

    #[test]
    fn spans_cover_each_other() {
        let a = SourceSpan::from(2..5);
        let b = SourceSpan::from(7..=9);
        let joined = a.to(b);
        assert_eq!(joined.start(), 2.into());
        assert_eq!(joined.end(), 10.into());
        assert_eq!(joined.len(), 8);
    }
}
