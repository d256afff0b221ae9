//! Operation token type
//!
//! The token is the value stamped into a work request's `wr_id` and handed
//! back verbatim in its completion. It names an arena slot directly, so
//! routing a completion to its waiting continuation is an index, not a lookup.

use core::fmt;

/// Opaque identifier correlating a completion with its operation context.
///
/// Layout: low 32 bits are the arena slot index, high 32 bits are the slot
/// generation at the time the operation was registered. A slot that has been
/// recycled carries a new generation, so a late or duplicated completion for
/// the old operation no longer matches.
///
/// `u64::MAX` is reserved as a sentinel for work that has nobody waiting on
/// it (unsignaled or bookkeeping completions).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct OpToken(u64);

impl OpToken {
    /// Sentinel: no continuation is waiting for this completion
    pub const NONE: OpToken = OpToken(u64::MAX);

    /// Build a token from a slot index and generation
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        OpToken(((generation as u64) << 32) | index as u64)
    }

    /// Reinterpret a raw `wr_id`
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        OpToken(raw)
    }

    /// The raw value to place in a work request's `wr_id`
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Arena slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Slot generation
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }
}

impl From<u64> for OpToken {
    #[inline]
    fn from(raw: u64) -> Self {
        OpToken(raw)
    }
}

impl From<OpToken> for u64 {
    #[inline]
    fn from(token: OpToken) -> Self {
        token.0
    }
}

impl fmt::Debug for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "OpToken(NONE)")
        } else {
            write!(f, "OpToken({}@{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}@{}", self.index(), self.generation())
        }
    }
}

impl Default for OpToken {
    fn default() -> Self {
        OpToken::NONE
    }
}
