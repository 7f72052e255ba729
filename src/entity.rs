//! Lightweight entity references.
//!
//! Every handle into one of this crate's arenas or tables — a [`crate::ir::Label`],
//! an operand-arena [`crate::arena::Ref`], a [`crate::symbol::SymbolIndex`] — is a
//! thin `u32` wrapper rather than a pointer or a `usize`-sized index. This keeps
//! `MicroInstr` and `MicroInstrOperand` compact and lets every handle implement
//! `Copy`, `Eq` and a textual `Display` for free.
//!
//! `PackedOption` below niche-optimizes the common "maybe a handle" case so
//! it costs nothing over the handle itself.

use core::fmt;

/// A type that can be converted to and from a dense `u32` index.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a linear index.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Implement `EntityRef`, `Display`, `Debug` and conversions for a tuple struct
/// wrapping a single `u32`.
///
/// `u32::MAX` is reserved as the sentinel for [`PackedOption::None`] and must
/// never be constructed as a valid reference.
macro_rules! entity_impl {
    ($entity:ident, $display_prefix:expr) => {
        impl $crate::entity::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::entity::ReservedValue for $entity {
            fn reserved_value() -> Self {
                $entity(u32::MAX)
            }

            fn is_reserved_value(&self) -> bool {
                self.0 == u32::MAX
            }
        }

        impl core::fmt::Display for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                (self as &dyn core::fmt::Display).fmt(f)
            }
        }
    };
    ($entity:ident) => {
        entity_impl!($entity, "");
    };
}

/// A type that has a reserved "invalid" bit pattern, used by [`PackedOption`]
/// to avoid doubling the size of an `Option<T>` for entity handles.
pub trait ReservedValue {
    /// The sentinel value. Never returned for a live reference.
    fn reserved_value() -> Self;
    /// Is `self` the sentinel value?
    fn is_reserved_value(&self) -> bool;
}

/// A compact `Option<T>` for entity references, the same size as `T` itself.
///
/// Used throughout the label and relocation tables so that "no jump patched
/// yet" / "no instruction placed yet" don't cost an extra discriminant byte
/// per slot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PackedOption<T: ReservedValue>(T);

impl<T: ReservedValue> PackedOption<T> {
    /// The empty value.
    pub fn none() -> Self {
        PackedOption(T::reserved_value())
    }

    /// Wrap a present value.
    pub fn some(value: T) -> Self {
        debug_assert!(!value.is_reserved_value());
        PackedOption(value)
    }

    /// Is this `None`?
    pub fn is_none(&self) -> bool {
        self.0.is_reserved_value()
    }

    /// Expand into a full `Option<T>`.
    pub fn expand(self) -> Option<T> {
        if self.is_none() {
            None
        } else {
            Some(self.0)
        }
    }
}

impl<T: ReservedValue> Default for PackedOption<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: ReservedValue> From<T> for PackedOption<T> {
    fn from(value: T) -> Self {
        Self::some(value)
    }
}

impl<T: ReservedValue> From<Option<T>> for PackedOption<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::some(v),
            None => Self::none(),
        }
    }
}

impl<T: ReservedValue + fmt::Debug> fmt::Debug for PackedOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "None")
        } else {
            write!(f, "Some({:?})", self.0)
        }
    }
}
