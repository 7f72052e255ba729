//! The cross-function symbol table.
//!
//! Shared across concurrently-compiled functions: mutation takes an
//! exclusive write lock, lookups proceed concurrently under a read lock.
//! `SymbolTable` is a `RwLock`-guarded dedup map that hands out stable
//! [`SymbolIndex`] handles.

use crate::ir::Ident;
use std::collections::HashMap;
use std::sync::RwLock;
use std::vec::Vec;

/// A stable, compact reference to a [`Symbol`] in a [`SymbolTable`].
/// Relocations are keyed by this index rather than by name, so the
/// object-file writer never re-hashes a name at link time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolIndex(u32);
entity_impl!(SymbolIndex, "sym");

/// What kind of thing a [`Symbol`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SymbolKind {
    /// A function defined in this module.
    Function,
    /// A function or data object defined externally.
    Extern,
    /// A compiler-internal symbol (e.g. a per-function jump table).
    Custom,
    /// A read-only constant-data symbol.
    Constant,
}

/// One entry in the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Symbol {
    /// The symbol's interned name.
    pub name: Ident,
    /// What kind of symbol this is.
    pub kind: SymbolKind,
    /// Its value: a text-section offset for `Function`/`Custom`, 0 for
    /// `Extern` (resolved by the linker), a data-segment offset for
    /// `Constant`.
    pub value: u64,
    /// This symbol's own stable index (duplicated here so a `&Symbol`
    /// returned from a snapshot carries its own handle).
    pub index: SymbolIndex,
}

struct Inner {
    symbols: Vec<Symbol>,
    by_name_kind: HashMap<(Ident, SymbolKind), SymbolIndex>,
}

/// A deduplicating, insertion-ordered symbol table shared across all
/// functions compiled against one module.
///
/// `intern` takes the write lock only for the duration of inserting a
/// genuinely new symbol; repeated lookups of an already-interned name
/// proceed under a read lock and never block each other.
pub struct SymbolTable {
    inner: RwLock<Inner>,
}

impl SymbolTable {
    /// An empty symbol table.
    pub fn new() -> Self {
        SymbolTable {
            inner: RwLock::new(Inner {
                symbols: Vec::new(),
                by_name_kind: HashMap::new(),
            }),
        }
    }

    /// Intern a symbol, returning its stable index. Calling this twice with
    /// the same `(name, kind)` returns the same index; `value` on the
    /// second call is ignored (first writer wins).
    pub fn intern(&self, name: Ident, kind: SymbolKind, value: u64) -> SymbolIndex {
        if let Some(existing) = self.get_index(name, kind) {
            return existing;
        }
        let mut inner = self.inner.write().unwrap();
        // Re-check under the write lock: another thread may have raced us.
        if let Some(&existing) = inner.by_name_kind.get(&(name, kind)) {
            return existing;
        }
        let index = SymbolIndex::new(inner.symbols.len());
        inner.symbols.push(Symbol {
            name,
            kind,
            value,
            index,
        });
        inner.by_name_kind.insert((name, kind), index);
        index
    }

    /// Look up an already-interned symbol's index without inserting.
    pub fn get_index(&self, name: Ident, kind: SymbolKind) -> Option<SymbolIndex> {
        let inner = self.inner.read().unwrap();
        inner.by_name_kind.get(&(name, kind)).copied()
    }

    /// Fetch a symbol by its stable index.
    pub fn get(&self, index: SymbolIndex) -> Symbol {
        let inner = self.inner.read().unwrap();
        inner.symbols[index.index()].clone()
    }

    /// A point-in-time, insertion-ordered copy of every interned symbol.
    pub fn snapshot(&self) -> Vec<Symbol> {
        self.inner.read().unwrap().symbols.clone()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

use crate::entity::EntityRef;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_by_name_and_kind() {
        let table = SymbolTable::new();
        let a = table.intern(Ident::new(1), SymbolKind::Function, 0x1000);
        let b = table.intern(Ident::new(1), SymbolKind::Function, 0x2000);
        assert_eq!(a, b);
        assert_eq!(table.get(a).value, 0x1000);
    }

    #[test]
    fn distinct_kinds_get_distinct_indices() {
        let table = SymbolTable::new();
        let f = table.intern(Ident::new(5), SymbolKind::Function, 0);
        let e = table.intern(Ident::new(5), SymbolKind::Extern, 0);
        assert_ne!(f, e);
    }

    #[test]
    fn snapshot_is_insertion_ordered() {
        let table = SymbolTable::new();
        table.intern(Ident::new(1), SymbolKind::Function, 0);
        table.intern(Ident::new(2), SymbolKind::Function, 0);
        table.intern(Ident::new(3), SymbolKind::Extern, 0);
        let snap = table.snapshot();
        let names: Vec<u32> = snap.iter().map(|s| s.name.index() as u32).collect();
        assert_eq!(names, vec![1, 2, 3]);
    }
}
