//! Luabind: typed bindings between Rust and an embedded Lua 5.4 runtime.
//!
//! - [`Context`] owns a runtime state and is the entry point for hosts
//! - [`Function`] and [`Overloads`] wrap native callables, with overload
//!   resolution by argument count and type
//! - `#[derive(Usertype)]` exposes native structs as script values
//! - [`ScriptFn`] calls script functions with typed arguments and results
//!
//! # Example
//!
//! ```
//! use luabind::{Context, Overloads, TypeRegistry, Usertype};
//!
//! #[derive(Usertype, Clone, Copy, Debug, PartialEq)]
//! #[usertype(name = "geo.vec2", flat)]
//! struct Vec2 {
//!     #[usertype(get, set)]
//!     x: f64,
//!     #[usertype(get, set)]
//!     y: f64,
//! }
//!
//! let ctx = Context::with_types(TypeRegistry::new().with::<Vec2>()).unwrap();
//! ctx.provide_member_fn::<Vec2, _>("new", |x: f64, y: f64| Vec2 { x, y }).unwrap();
//! ctx.provide_member_overloads::<Vec2>(
//!     "__mul",
//!     Overloads::new().commutative(|v: &Vec2, k: f64| Vec2 { x: v.x * k, y: v.y * k }),
//! )
//! .unwrap();
//!
//! ctx.load_and_call("a = geo.vec2.new(1, 2) * 3; b = 2 * a; b.x = b.x + 1").unwrap();
//! assert_eq!(ctx.extract::<Vec2>("b").unwrap(), Vec2 { x: 7.0, y: 12.0 });
//! ```
//!
//! Flat usertypes must fit the fixed block:
//!
//! ```compile_fail
//! use luabind::Usertype;
//!
//! #[derive(Usertype, Clone, Copy)]
//! #[usertype(flat)]
//! struct TooBig {
//!     data: [f64; 4],
//! }
//! ```
//!
//! A writable field also needs a getter:
//!
//! ```compile_fail
//! use luabind::Usertype;
//!
//! #[derive(Usertype, Clone)]
//! struct Named {
//!     #[usertype(set)]
//!     name: String,
//! }
//! ```

mod binding;
pub mod context;
pub mod function;
pub mod script_fn;

pub use context::{Context, ContextOptions};
pub use function::{Argument, Candidate, Function, Method, MethodMut, NativeFunction, Overloads, Param};
pub use luabind_core::{
    AccessError, CallError, CastError, Error, FromResults, Get, IntoPath, IntoResults, LoadError,
    LuaType, MemberTable, MemoryClass, Multi, NamePath, OrderedFloat, Push, PushArgs,
    RegistrationError, Result, RuntimeError, Shape, Skip, Stack, TypeRegistry, UserMut, UserRef,
    UserType, Value, Variadic, path,
};
pub use luabind_macros::Usertype;
pub use script_fn::ScriptFn;

/// The items most hosts need.
pub mod prelude {
    pub use crate::{
        Context, Error, Function, Get, MemberTable, Multi, Overloads, Push, Result, ScriptFn,
        TypeRegistry, UserType, Usertype, Variadic,
    };
}
