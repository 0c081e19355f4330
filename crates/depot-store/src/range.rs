/// A byte window within a payload of known length.
///
/// Resolution follows HTTP byte-range semantics with both bounds inclusive.
/// The window never extends past the end of the content, and a range whose
/// end precedes its start resolves to an empty window rather than an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Resolve optional `start`/`end` bounds against `content_length`.
    ///
    /// - neither bound: the full content
    /// - `start` only: from `start` to the end of the content
    /// - `end` only: the last `end` bytes (the full content if `end` covers it)
    /// - both: the inclusive range `[start, end]`
    pub fn resolve(start: Option<u64>, end: Option<u64>, content_length: u64) -> Self {
        match (start, end) {
            (None, None) => Self::full(content_length),
            (Some(start), None) => {
                let offset = start.min(content_length);
                Self {
                    offset,
                    length: content_length - offset,
                }
            }
            (None, Some(suffix)) => {
                if suffix >= content_length {
                    Self::full(content_length)
                } else {
                    Self {
                        offset: content_length - suffix,
                        length: suffix,
                    }
                }
            }
            (Some(start), Some(end)) => {
                let offset = start.min(content_length);
                let requested = match end.checked_sub(start) {
                    Some(span) => span.saturating_add(1),
                    None => 0,
                };
                Self {
                    offset,
                    length: requested.min(content_length - offset),
                }
            }
        }
    }

    pub fn full(content_length: u64) -> Self {
        Self {
            offset: 0,
            length: content_length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// One past the last byte of the window.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// The window applied to an in-memory buffer.
    pub fn slice<'b>(&self, bytes: &'b [u8]) -> &'b [u8] {
        &bytes[self.offset as usize..self.end() as usize]
    }
}
