//! TypeRegistry - the closed set of usertypes a context knows about.
//!
//! The registry is built once, before the context that uses it is created,
//! and is immutable afterwards. Indices are assigned in registration order
//! and never change.
//!
//! # Example
//!
//! ```
//! use luabind_core::{MemoryClass, TypeRegistry, UserType};
//!
//! #[derive(Clone, Copy)]
//! struct Color(u32);
//!
//! impl UserType for Color {
//!     const NAME: &'static str = "gfx.color";
//!     const CLASS: MemoryClass = MemoryClass::Flat;
//! }
//!
//! let types = TypeRegistry::new().with::<Color>();
//! assert_eq!(types.index_of::<Color>(), Some(0));
//! assert_eq!(types.by_name("gfx.color").map(|d| d.index()), Some(0));
//! ```

use std::any::{TypeId, type_name};
use std::fmt;
use std::os::raw::c_int;

use rustc_hash::FxHashMap;

use super::block::{block_size, drop_payload};
use super::{MemoryClass, UserType};
use crate::error::Result;
use crate::name;
use crate::stack::Stack;

/// Everything the binding layer knows about one registered type.
pub struct Descriptor {
    index: usize,
    name: &'static str,
    rust_name: &'static str,
    class: MemoryClass,
    type_id: TypeId,
    block_size: usize,
    shadowed: bool,
    drop_payload: unsafe fn(*mut u8),
    install_members: fn(Stack, c_int) -> Result<()>,
}

impl Descriptor {
    fn of<T: UserType>(index: usize) -> Self {
        Self {
            index,
            name: T::NAME,
            rust_name: type_name::<T>(),
            class: T::CLASS,
            type_id: TypeId::of::<T>(),
            block_size: block_size::<T>(),
            shadowed: false,
            drop_payload: drop_payload::<T>,
            install_members: install_members::<T>,
        }
    }

    /// Stable index, dense from zero.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Dotted script name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    pub fn class(&self) -> MemoryClass {
        self.class
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Byte length of a block holding this type.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether an earlier registration already claimed this script name.
    ///
    /// Shadowed types still get a metatable and can cross the boundary, but
    /// their metatable is not published in globals.
    pub fn is_shadowed(&self) -> bool {
        self.shadowed
    }

    /// Wire the type's member table into the metatable at `metatable`.
    pub fn install_members(&self, stack: Stack, metatable: c_int) -> Result<()> {
        (self.install_members)(stack, metatable)
    }

    /// Drop the payload of a block of this type.
    ///
    /// # Safety
    ///
    /// `block` must be a block created for this type whose payload is still
    /// alive; it must not be used as a live value afterwards.
    pub unsafe fn finalize(&self, block: *mut u8) {
        unsafe { (self.drop_payload)(block) }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("rust_name", &self.rust_name)
            .field("class", &self.class)
            .field("block_size", &self.block_size)
            .field("shadowed", &self.shadowed)
            .finish_non_exhaustive()
    }
}

fn install_members<T: UserType>(stack: Stack, metatable: c_int) -> Result<()> {
    let members = T::members();
    if members.is_empty() {
        return Ok(());
    }
    members.install(stack, metatable)
}

/// The registered usertypes, by index, Rust type and script name.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    descriptors: Vec<Descriptor>,
    by_type: FxHashMap<TypeId, usize>,
    by_name: FxHashMap<&'static str, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T: UserType>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Register `T` and return its index.
    ///
    /// Registering the same Rust type again keeps the first index. A second
    /// type with an already-used script name is registered but shadowed.
    pub fn register<T: UserType>(&mut self) -> usize {
        const { assert!(name::is_valid(T::NAME), "usertype names must be dotted identifiers") };

        let type_id = TypeId::of::<T>();
        if let Some(&index) = self.by_type.get(&type_id) {
            log::warn!("type '{}' is already registered as '{}'", type_name::<T>(), T::NAME);
            return index;
        }

        let index = self.descriptors.len();
        let mut descriptor = Descriptor::of::<T>(index);
        if let Some(&first) = self.by_name.get(T::NAME) {
            log::warn!(
                "usertype name '{}' is already used by '{}'; '{}' stays shadowed",
                T::NAME,
                self.descriptors[first].rust_name,
                type_name::<T>()
            );
            descriptor.shadowed = true;
        } else {
            self.by_name.insert(T::NAME, index);
        }
        self.by_type.insert(type_id, index);
        self.descriptors.push(descriptor);
        index
    }

    pub fn index_of<T: UserType>(&self) -> Option<usize> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn descriptor_of<T: UserType>(&self) -> Option<&Descriptor> {
        self.index_of::<T>().map(|index| &self.descriptors[index])
    }

    pub fn descriptor(&self, index: usize) -> Option<&Descriptor> {
        self.descriptors.get(index)
    }

    /// The visible type registered under a script name.
    pub fn by_name(&self, name: &str) -> Option<&Descriptor> {
        self.by_name.get(name).map(|&index| &self.descriptors[index])
    }

    /// Run `visitor` with the descriptor recovered from a runtime index.
    ///
    /// The descriptor carries the type-erased operations of the concrete type,
    /// so callers that only know a block's stored index can still act on it.
    pub fn dispatch_by_index<R>(&self, index: usize, visitor: impl FnOnce(&Descriptor) -> R) -> Option<R> {
        self.descriptors.get(index).map(visitor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;
    struct AlsoAlpha;

    #[derive(Clone, Copy)]
    struct Small(#[allow(dead_code)] [u8; 24]);

    impl UserType for Alpha {
        const NAME: &'static str = "alpha";
    }

    impl UserType for Beta {
        const NAME: &'static str = "ns.beta";
    }

    impl UserType for AlsoAlpha {
        const NAME: &'static str = "alpha";
    }

    impl UserType for Small {
        const NAME: &'static str = "small";
        const CLASS: MemoryClass = MemoryClass::Flat;
    }

    #[test]
    fn indices_follow_registration_order() {
        let types = TypeRegistry::new().with::<Alpha>().with::<Beta>().with::<Small>();
        assert_eq!(types.index_of::<Alpha>(), Some(0));
        assert_eq!(types.index_of::<Beta>(), Some(1));
        assert_eq!(types.index_of::<Small>(), Some(2));
        assert_eq!(types.len(), 3);
        assert_eq!(types.descriptor_of::<Beta>().map(|d| d.name()), Some("ns.beta"));
        assert_eq!(types.descriptor(2).map(|d| d.class()), Some(MemoryClass::Flat));
        assert!(types.descriptor(3).is_none());
        assert!(types.index_of::<AlsoAlpha>().is_none());
    }

    #[test]
    fn registering_twice_keeps_the_first_index() {
        let mut types = TypeRegistry::new();
        assert_eq!(types.register::<Beta>(), 0);
        assert_eq!(types.register::<Alpha>(), 1);
        assert_eq!(types.register::<Beta>(), 0);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn duplicate_script_names_shadow_the_later_type() {
        let types = TypeRegistry::new().with::<Alpha>().with::<AlsoAlpha>();
        assert_eq!(types.len(), 2);
        let first = types.descriptor_of::<Alpha>().unwrap();
        let second = types.descriptor_of::<AlsoAlpha>().unwrap();
        assert!(!first.is_shadowed());
        assert!(second.is_shadowed());
        assert_eq!(types.by_name("alpha").map(|d| d.index()), Some(first.index()));
    }

    #[test]
    fn dispatch_recovers_the_descriptor() {
        let types = TypeRegistry::new().with::<Alpha>().with::<Small>();
        let name = types.dispatch_by_index(1, |d| (d.name(), d.block_size()));
        assert_eq!(name, Some(("small", 16 + super::super::FLAT_CAPACITY)));
        assert_eq!(types.dispatch_by_index(9, |d| d.index()), None);
    }
}
