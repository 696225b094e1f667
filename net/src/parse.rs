// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parsing and deparsing traits and cursor types shared by every header in this crate.

use std::num::NonZero;

/// A length mismatch between what a header requires and what a buffer actually provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthError {
    /// The length required to proceed.
    pub expected: NonZero<usize>,
    /// The length actually available.
    pub actual: usize,
}

/// Error produced while parsing a header out of a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError<E> {
    /// The buffer was too short to contain a valid header.
    #[error("buffer too short: {0:?}")]
    Length(LengthError),
    /// The buffer was longer than this format can address (over `u16::MAX`).
    #[error("buffer too long ({0} bytes)")]
    BufferTooLong(usize),
    /// The header bytes were structurally present but invalid.
    #[error(transparent)]
    Invalid(E),
}

/// Error produced while writing a header into a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeParseError<E> {
    /// The buffer was too short to hold the header.
    #[error("buffer too short: {0:?}")]
    Length(LengthError),
    /// The buffer was longer than this format can address (over `u16::MAX`).
    #[error("buffer too long ({0} bytes)")]
    BufferTooLong(usize),
    /// The header value itself could not be legally serialized.
    #[error(transparent)]
    Invalid(E),
}

/// A buffer longer than `u16::MAX`, which no header in this crate can legally describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalBufferLength(pub usize);

/// Convert a `NonZero<u16>` length into the `NonZero<usize>` used by [`LengthError`].
pub trait IntoNonZeroUSize {
    /// Widen this value to a `NonZero<usize>`.
    fn into_non_zero_usize(self) -> NonZero<usize>;
}

impl IntoNonZeroUSize for NonZero<u16> {
    fn into_non_zero_usize(self) -> NonZero<usize> {
        NonZero::new(self.get() as usize).unwrap_or_else(|| unreachable!())
    }
}

/// Parse a header (with no external context) from the front of a byte slice.
pub trait Parse: Sized {
    /// The error produced if the bytes are structurally invalid.
    type Error;

    /// Parse `Self` from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Length`] if `buf` is too short, [`ParseError::BufferTooLong`] if
    /// `buf` exceeds `u16::MAX` bytes, and [`ParseError::Invalid`] if the bytes are malformed.
    fn parse(buf: &[u8]) -> Result<(Self, NonZero<u16>), ParseError<Self::Error>>;
}

/// Parse a header that needs external context (e.g. an IP version, or a next-header number).
pub trait ParseWith: Sized {
    /// The error produced if the bytes are structurally invalid.
    type Error;
    /// The context required to parse this header.
    type Param;

    /// Parse `Self` from the front of `buf`, given `param`.
    ///
    /// # Errors
    ///
    /// Same error conditions as [`Parse::parse`].
    fn parse_with(
        param: Self::Param,
        buf: &[u8],
    ) -> Result<(Self, NonZero<u16>), ParseError<Self::Error>>;
}

/// Serialize a header back into a byte buffer.
pub trait DeParse {
    /// The error produced if this value cannot be legally serialized.
    type Error;

    /// The number of bytes this header occupies when serialized.
    fn size(&self) -> NonZero<u16>;

    /// Write this header to the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`DeParseError::Length`] if `buf` is shorter than [`DeParse::size`].
    fn deparse(&self, buf: &mut [u8]) -> Result<NonZero<u16>, DeParseError<Self::Error>>;
}

/// Parse whatever header (if any) follows this one.
pub trait ParsePayload {
    /// The enum of possible next headers.
    type Next;

    /// Attempt to parse the payload that follows this header.
    ///
    /// Returns `None` if the next header is absent or unsupported; the cursor is left unchanged
    /// in that case.
    fn parse_payload(&self, cursor: &mut Reader) -> Option<Self::Next>;
}

/// Parse whatever header follows this one, given extra context (e.g. the first IP number of an
/// IPv6 extension header chain).
pub trait ParsePayloadWith {
    /// The enum of possible next headers.
    type Next;
    /// The context required to parse the payload.
    type Param;

    /// Attempt to parse the payload that follows this header.
    fn parse_payload_with(&self, param: Self::Param, cursor: &mut Reader) -> Option<Self::Next>;
}

/// A forward-only cursor over an immutable byte buffer, used while walking a header chain.
pub struct Reader<'buf> {
    /// The full buffer this cursor was created from.
    pub inner: &'buf [u8],
    /// The number of bytes remaining to be consumed.
    pub remaining: u16,
}

impl<'buf> Reader<'buf> {
    /// Create a new cursor over `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalBufferLength`] if `buf` is longer than `u16::MAX` bytes.
    pub fn new(buf: &'buf [u8]) -> Result<Self, IllegalBufferLength> {
        if buf.len() > u16::MAX as usize {
            return Err(IllegalBufferLength(buf.len()));
        }
        #[allow(clippy::cast_possible_truncation)] // checked above
        Ok(Reader {
            inner: buf,
            remaining: buf.len() as u16,
        })
    }

    /// The slice of bytes not yet consumed.
    #[must_use]
    pub fn remaining_slice(&self) -> &'buf [u8] {
        &self.inner[self.inner.len() - self.remaining as usize..]
    }

    /// Advance the cursor by `n` bytes without interpreting them.
    ///
    /// # Errors
    ///
    /// Returns a [`LengthError`] if fewer than `n` bytes remain.
    pub fn consume(&mut self, n: NonZero<u16>) -> Result<(), LengthError> {
        if n.get() > self.remaining {
            return Err(LengthError {
                expected: n.into_non_zero_usize(),
                actual: self.remaining as usize,
            });
        }
        self.remaining -= n.get();
        Ok(())
    }

    /// Parse a `T` from the unconsumed portion of the buffer, advancing the cursor on success.
    ///
    /// # Errors
    ///
    /// Propagates whatever [`Parse::parse`] returns.
    pub fn parse<T: Parse>(&mut self) -> Result<(T, NonZero<u16>), ParseError<T::Error>> {
        let (value, consumed) = T::parse(self.remaining_slice())?;
        self.remaining -= consumed.get();
        Ok((value, consumed))
    }

    /// Parse a `T` (with context `param`) from the unconsumed portion of the buffer, advancing
    /// the cursor on success.
    ///
    /// # Errors
    ///
    /// Propagates whatever [`ParseWith::parse_with`] returns.
    pub fn parse_with<T: ParseWith>(
        &mut self,
        param: T::Param,
    ) -> Result<(T, NonZero<u16>), ParseError<T::Error>> {
        let (value, consumed) = T::parse_with(param, self.remaining_slice())?;
        self.remaining -= consumed.get();
        Ok((value, consumed))
    }
}

/// Extension methods for swallowing a header's parse error into `None`, used while walking a
/// header chain where an unsupported or malformed next header should simply end the walk.
pub trait ParseHeader<'buf> {
    /// Parse a `T` and wrap it into `Next` via `From`, returning `None` (and leaving the cursor
    /// unchanged) on any parse error.
    fn parse_header<T: Parse, Next: From<T>>(&mut self) -> Option<Next>;

    /// Like [`ParseHeader::parse_header`], but for headers that need a [`ParseWith::Param`].
    fn parse_header_with<T: ParseWith, Next: From<T>>(&mut self, param: T::Param) -> Option<Next>;
}

impl<'buf> ParseHeader<'buf> for Reader<'buf> {
    fn parse_header<T: Parse, Next: From<T>>(&mut self) -> Option<Next> {
        self.parse::<T>().map(|(v, _)| Next::from(v)).ok()
    }

    fn parse_header_with<T: ParseWith, Next: From<T>>(&mut self, param: T::Param) -> Option<Next> {
        self.parse_with::<T>(param).map(|(v, _)| Next::from(v)).ok()
    }
}

/// A forward-only cursor over a mutable byte buffer, used while serializing a header chain.
pub struct Writer<'buf> {
    /// The full buffer this cursor was created from.
    pub inner: &'buf mut [u8],
    /// The number of bytes remaining to be written into.
    pub remaining: u16,
}

impl<'buf> Writer<'buf> {
    /// Create a new cursor over `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalBufferLength`] if `buf` is longer than `u16::MAX` bytes.
    pub fn new(buf: &'buf mut [u8]) -> Result<Self, IllegalBufferLength> {
        if buf.len() > u16::MAX as usize {
            return Err(IllegalBufferLength(buf.len()));
        }
        #[allow(clippy::cast_possible_truncation)] // checked above
        let remaining = buf.len() as u16;
        Ok(Writer {
            inner: buf,
            remaining,
        })
    }

    /// Write `item` to the unconsumed portion of the buffer, advancing the cursor on success.
    ///
    /// # Errors
    ///
    /// Propagates whatever [`DeParse::deparse`] returns.
    pub fn write<T: DeParse>(&mut self, item: &T) -> Result<NonZero<u16>, DeParseError<T::Error>> {
        let offset = self.inner.len() - self.remaining as usize;
        let written = item.deparse(&mut self.inner[offset..])?;
        self.remaining -= written.get();
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Byte(u8);

    impl Parse for Byte {
        type Error = ();

        fn parse(buf: &[u8]) -> Result<(Self, NonZero<u16>), ParseError<Self::Error>> {
            let Some(&first) = buf.first() else {
                return Err(ParseError::Length(LengthError {
                    expected: NonZero::new(1).unwrap_or_else(|| unreachable!()),
                    actual: buf.len(),
                }));
            };
            Ok((
                Byte(first),
                NonZero::new(1).unwrap_or_else(|| unreachable!()),
            ))
        }
    }

    #[test]
    fn reader_advances_on_successful_parse() {
        let buf = [1u8, 2, 3];
        let mut reader = Reader::new(&buf).unwrap();
        let (first, _) = reader.parse::<Byte>().unwrap();
        assert_eq!(first, Byte(1));
        assert_eq!(reader.remaining, 2);
        let (second, _) = reader.parse::<Byte>().unwrap();
        assert_eq!(second, Byte(2));
        assert_eq!(reader.remaining, 1);
    }

    #[test]
    fn reader_rejects_consume_past_end() {
        let buf = [0u8; 4];
        let mut reader = Reader::new(&buf).unwrap();
        assert!(reader.consume(NonZero::new(5).unwrap()).is_err());
    }
}
