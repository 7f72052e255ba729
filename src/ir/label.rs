//! Label identifiers.

/// A dense per-function label id, allocated by
/// [`crate::builder::MicroIrBuilder::create_label`].
///
/// The label's placement state and outstanding jump patch list are owned by
/// the builder (see `LabelData` there), not by this handle: `Label` itself
/// is just the stable `u32` name other instructions refer to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");
