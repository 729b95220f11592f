//! Cursor-based reader over a byte slice.
//!
//! [`crate::file::parser::Parser`] keeps a position inside a borrowed buffer and reads
//! bounds-checked little-endian values from it. It is what the CLR header and `VTableFixups`
//! readers in [`crate::image`] are written against.
//!
//! # Examples
//!
//! ```rust
//! use ijwhost::Parser;
//!
//! // One VTableFixups entry: rva = 0x2000, count = 2, type = 0x0005
//! let data = [0x00, 0x20, 0x00, 0x00, 0x02, 0x00, 0x05, 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u32>()?, 0x2000);
//! assert_eq!(parser.read_le::<u16>()?, 2);
//! assert_eq!(parser.read_le::<u16>()?, 5);
//! assert!(!parser.has_more_data());
//! # Ok::<(), ijwhost::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, LeBytes},
    Error::OutOfBounds,
    Result,
};

/// A cursor over a byte slice with bounds-checked reads.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while the cursor has not reached the end of the buffer.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of bytes left between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is not inside the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos >= self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the new position would pass the end.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(next) if next <= self.data.len() => {
                self.position = next;
                Ok(())
            }
            _ => Err(OutOfBounds),
        }
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Read a `T` at the cursor without moving it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn peek_le<T: LeBytes>(&self) -> Result<T> {
        let mut temp_position = self.position;
        read_le_at::<T>(self.data, &mut temp_position)
    }

    /// Read a `T` in little-endian format and advance the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: LeBytes>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }
}
