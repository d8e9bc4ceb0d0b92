//! Registered native types living inside the runtime heap.
//!
//! A type becomes visible to scripts by implementing [`UserType`] (usually
//! through `#[derive(Usertype)]`) and being added to a [`TypeRegistry`]
//! before the owning context is created. Each registered type gets:
//!
//! - a dense, stable index assigned in registration order
//! - a metatable published under its dotted script name
//! - a block layout chosen by its [`MemoryClass`]
//!
//! Values are stored in userdata blocks that start with a small header
//! carrying the type index and a borrow flag. Reading a block back checks
//! the block length, the metatable and the stored index before touching the
//! payload.

use std::fmt;

use crate::member_table::MemberTable;

mod block;
mod registry;

pub use block::{
    UserMut, UserRef, borrow, borrow_mut, check_usertype, create_metatable, get_cloned,
    get_flat, push_metatable, push_usertype,
};
pub use registry::{Descriptor, TypeRegistry};

/// Payload capacity of a flat block, in bytes.
pub const FLAT_CAPACITY: usize = 24;

/// Largest payload alignment a flat block can honour.
pub const FLAT_ALIGN: usize = 8;

/// How a usertype's values are laid out in the runtime heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryClass {
    /// Small `Copy` values stored inline in a fixed-size block. No finalizer.
    Flat,
    /// Any value, stored in a block sized for it and dropped by the collector.
    #[default]
    Boxed,
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryClass::Flat => f.write_str("flat"),
            MemoryClass::Boxed => f.write_str("boxed"),
        }
    }
}

/// A native type that can be registered with a [`TypeRegistry`].
///
/// # Example
///
/// ```
/// use luabind_core::{MemberTable, MemoryClass, UserType};
///
/// struct Counter {
///     hits: u32,
/// }
///
/// impl UserType for Counter {
///     const NAME: &'static str = "stats.counter";
///
///     fn members() -> MemberTable<Self> {
///         MemberTable::new().readonly("hits", |c: &Counter| c.hits)
///     }
/// }
///
/// assert_eq!(Counter::CLASS, MemoryClass::Boxed);
/// ```
pub trait UserType: Sized + 'static {
    /// Dotted script name, e.g. `"geometry.vec3"`.
    const NAME: &'static str;

    const CLASS: MemoryClass = MemoryClass::Boxed;

    /// Fields exposed through `__index` / `__newindex`.
    fn members() -> MemberTable<Self> {
        MemberTable::new()
    }
}
