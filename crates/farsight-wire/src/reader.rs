//! Bounded cursor over a borrowed byte slice.
//!
//! Every decode path in the engine pulls bytes through a [`Reader`], so the
//! "consume exactly the declared width" rule is enforced in one place and a
//! short buffer always surfaces as [`WireError::TruncatedInput`].

use crate::errors::{Result, WireError};

/// Sequential, bounds-checked reader over a byte slice.
///
/// The reader never reads past its window. Sub-records that are governed by
/// an on-wire length are decoded through [`Reader::sub_reader`], which
/// narrows the window to exactly that many bytes.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap a byte slice in a reader positioned at its start.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes still available in the window.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when the window is exhausted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TruncatedInput`] if fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::TruncatedInput { needed: n, available: self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consume bytes up to and including `delimiter`, returning the content
    /// without the delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TruncatedInput`] if the delimiter does not occur
    /// in the remaining window (the caller cannot know how many more bytes
    /// the terminated field needs, so the whole remainder counts as short).
    pub fn take_until(&mut self, delimiter: &[u8]) -> Result<&'a [u8]> {
        let window = &self.buf[self.pos..];
        let found = window
            .windows(delimiter.len().max(1))
            .position(|candidate| candidate == delimiter);
        match found {
            Some(at) => {
                let content = &window[..at];
                self.pos += at + delimiter.len();
                Ok(content)
            },
            None => Err(WireError::TruncatedInput {
                needed: delimiter.len(),
                available: self.remaining(),
            }),
        }
    }

    /// Narrow to a sub-window of exactly `n` bytes, consuming them from this
    /// reader.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TruncatedInput`] if fewer than `n` bytes remain.
    pub fn sub_reader(&mut self, n: usize) -> Result<Reader<'a>> {
        Ok(Reader::new(self.take(n)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_advances_and_bounds() {
        let mut r = Reader::new(&[1, 2, 3, 4]);
        assert_eq!(r.take(2).unwrap(), &[1, 2]);
        assert_eq!(r.position(), 2);
        assert_eq!(r.remaining(), 2);

        let err = r.take(3).unwrap_err();
        assert_eq!(err, WireError::TruncatedInput { needed: 3, available: 2 });

        // Failed take consumes nothing
        assert_eq!(r.take(2).unwrap(), &[3, 4]);
        assert!(r.is_empty());
    }

    #[test]
    fn take_until_strips_delimiter() {
        let mut r = Reader::new(b"cookie\r\nrest");
        assert_eq!(r.take_until(b"\r\n").unwrap(), b"cookie");
        assert_eq!(r.take(4).unwrap(), b"rest");
    }

    #[test]
    fn take_until_missing_delimiter() {
        let mut r = Reader::new(b"no terminator here");
        assert!(matches!(r.take_until(b"\r\n"), Err(WireError::TruncatedInput { .. })));
    }

    #[test]
    fn sub_reader_is_bounded() {
        let mut r = Reader::new(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let mut sub = r.sub_reader(2).unwrap();
        assert_eq!(sub.take(2).unwrap(), &[0xAA, 0xBB]);
        assert!(matches!(sub.take(1), Err(WireError::TruncatedInput { .. })));
        assert_eq!(r.take(2).unwrap(), &[0xCC, 0xDD]);
    }
}
