//! Metadata token type.
//!
//! Before a mixed-mode module is activated, every entry of its vtable fixup slots holds the
//! metadata token of the method the entry stands for. [`Token`] wraps that raw `u32`: the high
//! byte is the metadata table (`0x06` for `MethodDef`), the low 24 bits are the row.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token as stored in an unpatched vtable fixup slot.
///
/// # Examples
///
/// ```rust
/// use ijwhost::image::Token;
///
/// let token = Token::new(0x0600_0001);
/// assert_eq!(token.table(), 0x06);
/// assert_eq!(token.row(), 1);
/// assert!(token.is_method_def());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Table id of the `MethodDef` metadata table.
    pub const METHOD_DEF_TABLE: u8 = 0x06;

    /// Creates a new token from the raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the metadata table id (high byte).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row index (low 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the token references a `MethodDef` row.
    #[must_use]
    pub fn is_method_def(&self) -> bool {
        self.table() == Self::METHOD_DEF_TABLE && self.row() != 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
