//! Luabind Proc Macros
//!
//! This crate provides the derive used to expose native structs to scripts.
//!
//! # Macros
//!
//! - `#[derive(Usertype)]` - Implement `UserType`, `Push` and (where possible) `Get`
//!
//! # Example
//!
//! ```ignore
//! use luabind_macros::Usertype;
//!
//! #[derive(Usertype, Clone, Copy)]
//! #[usertype(name = "geometry.vec3", flat)]
//! pub struct Vec3 {
//!     #[usertype(get, set)]
//!     pub x: f64,
//!     #[usertype(get, set)]
//!     pub y: f64,
//!     #[usertype(get, set)]
//!     pub z: f64,
//! }
//! ```

use proc_macro::TokenStream;

mod attrs;
mod derive_usertype;

/// Derive `UserType` for a struct.
///
/// The generated code refers to `::luabind_core`, so the crate using the
/// derive must depend on it.
///
/// # Attributes
///
/// - `#[usertype(name = "...")]` - Dotted script name (default: struct name)
/// - `#[usertype(flat)]` - Store inline in a fixed block; the type must be `Copy`,
///   at most 24 bytes and at most 8-byte aligned
/// - `#[usertype(boxed)]` - Store in a block sized for the type (default)
/// - `#[usertype(clone)]` - For boxed types, implement `Get` by cloning
///
/// Flat types always implement `Get` by copy. Boxed types without `clone`
/// only implement `Push`; methods still reach them through receiver borrows.
///
/// # Field Attributes
///
/// - `#[usertype(get)]` - Read-only field
/// - `#[usertype(get, set)]` - Readable and writable field
/// - `#[usertype(name = "...")]` - Override the field name
///
/// Exposed fields must be `Clone` and convertible with `Push` (and `Get`
/// when writable).
#[proc_macro_derive(Usertype, attributes(usertype))]
pub fn derive_usertype(input: TokenStream) -> TokenStream {
    derive_usertype::derive_usertype_impl(input)
}
