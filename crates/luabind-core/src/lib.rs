//! Luabind core crate.
//!
//! This crate holds the leaves of the binding layer:
//! - Value codec ([`Push`] / [`Get`]) between native values and stack slots
//! - Usertype registry and the userdata block layouts
//! - Member tables for usertype fields
//! - Error taxonomy shared by every layer
//! - Thin stack primitives over the raw runtime API
//! - Namespace path validation
//!
//! Function wrapping, overload dispatch and the host-facing `Context` live in
//! the `luabind` crate, which builds on these pieces.
//!
//! # Example
//!
//! ```
//! use luabind_core::{Shape, Get};
//!
//! assert_eq!(<Vec<(String, f64)>>::shape().to_string(), "(string, number)[]");
//! assert!(Shape::Number.covers(&Shape::Integer));
//! ```

pub mod convert;
pub mod error;
pub mod lua_type;
pub mod member_table;
pub mod name;
pub mod raise;
pub mod shape;
pub mod stack;
pub mod usertype;

pub use convert::{FromResults, Get, IntoResults, Multi, Push, PushArgs, Skip, Value, Variadic};
pub use error::{
    AccessError, CallError, CastError, Error, LoadError, RegistrationError, Result, RuntimeError,
};
pub use lua_type::LuaType;
pub use member_table::{Access, Field, MemberTable};
pub use name::{IntoPath, NamePath};
pub use shape::Shape;
pub use stack::{RegistryKey, Stack, StackGuard};
pub use usertype::{
    Descriptor, FLAT_CAPACITY, MemoryClass, TypeRegistry, UserMut, UserRef, UserType,
};

/// Hashable, ordered `f64` for map keys.
pub use ordered_float::OrderedFloat;

/// The raw runtime API.
pub use mlua::ffi;
