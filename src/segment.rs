//! The module's constant/data segment: a single append-only byte buffer
//! backing jump tables and literal constants, addressed by
//! `(offset, length)` against one shared base symbol.
//!
//! Grounded on [`crate::symbol::SymbolTable`]'s own `RwLock`-guarded,
//! append-only shape: a segment is, in effect, one more interned symbol
//! whose "value" is a growable byte buffer instead of a fixed text offset.
//! One base symbol rather than one symbol per constant, since every
//! relocation into the segment can express its own offset via the
//! relocation's `addend`.

use std::sync::RwLock;

use crate::ir::Ident;
use crate::symbol::{SymbolIndex, SymbolKind, SymbolTable};

struct SegmentInner {
    bytes: Vec<u8>,
}

/// A module's constant/data segment.
pub struct Segment {
    inner: RwLock<SegmentInner>,
    symbol: SymbolIndex,
}

impl Segment {
    /// Create a segment, interning its base symbol (`name`) as
    /// [`SymbolKind::Custom`] in `symbols`.
    pub fn new(symbols: &SymbolTable, name: Ident) -> Self {
        let symbol = symbols.intern(name, SymbolKind::Custom, 0);
        Segment {
            inner: RwLock::new(SegmentInner { bytes: Vec::new() }),
            symbol,
        }
    }

    /// The symbol every offset returned by this segment is relative to.
    pub fn symbol(&self) -> SymbolIndex {
        self.symbol
    }

    /// Append `bytes`, returning the offset they start at.
    pub fn reserve(&self, bytes: &[u8]) -> u32 {
        let mut inner = self.inner.write().unwrap();
        let offset = inner.bytes.len() as u32;
        inner.bytes.extend_from_slice(bytes);
        offset
    }

    /// Reserve a dense `i32` jump table with `count` zeroed entries, later
    /// patched by per-case relocations once label offsets are known.
    /// Returns the table's start offset.
    pub fn reserve_jump_table(&self, count: u32) -> u32 {
        self.reserve(&vec![0u8; count as usize * 4])
    }

    /// Reserve an 8-byte slot holding `value`'s IEEE-754 bit pattern, for a
    /// floating-point literal materialised via
    /// [`crate::ir::MicroOpcode::SymbolRelocValue`].
    pub fn reserve_f64(&self, value: f64) -> u32 {
        self.reserve(&value.to_le_bytes())
    }

    /// A point-in-time copy of the segment's current contents, for the
    /// object-file writer.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.read().unwrap().bytes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn offsets_are_sequential() {
        let symbols = SymbolTable::new();
        let segment = Segment::new(&symbols, Ident::new(0));
        let a = segment.reserve(&[1, 2, 3, 4]);
        let b = segment.reserve(&[5, 6]);
        assert_eq!(a, 0);
        assert_eq!(b, 4);
        assert_eq!(segment.snapshot(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn jump_table_is_zeroed_and_sized() {
        let symbols = SymbolTable::new();
        let segment = Segment::new(&symbols, Ident::new(1));
        let offset = segment.reserve_jump_table(4);
        assert_eq!(offset, 0);
        assert_eq!(segment.snapshot(), vec![0u8; 16]);
    }
}
