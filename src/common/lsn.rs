//! Log sequence numbers.

use std::fmt;

/// Log Sequence Number: position of a record in the write-ahead log.
///
/// LSNs are assigned strictly increasing by the WAL. Every page header
/// carries the LSN of the record that produced its current image, which
/// is how replay decides whether a record has already been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// LSN of a page that no log record has touched yet.
    pub const ZERO: Lsn = Lsn(0);

    /// First LSN handed out by a fresh log.
    pub const FIRST: Lsn = Lsn(1);

    #[inline]
    pub fn new(lsn: u64) -> Self {
        Lsn(lsn)
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn next(&self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_ordering() {
        assert!(Lsn::ZERO < Lsn::FIRST);
        assert_eq!(Lsn::FIRST.next(), Lsn::new(2));
    }
}
