//! Conversion between native values and runtime stack values.
//!
//! This module provides the codec traits:
//! - [`Push`]: leave a native value on the stack
//! - [`Get`]: read a native value from a stack slot, or probe whether it
//!   could be read without converting (`check`)
//!
//! And the multi-value helpers used at call boundaries:
//! - [`PushArgs`]: spread call arguments (`()`, tuples, [`Variadic`])
//! - [`FromResults`]: collect call results (`()`, any [`Get`], [`Multi`], [`Variadic`])
//! - [`IntoResults`]: turn a native callback's return value into results
//!
//! ## Supported Shapes
//!
//! | Native                                 | Script                         |
//! |----------------------------------------|--------------------------------|
//! | `bool`                                 | boolean                        |
//! | `i8`..`i64`, `u8`..`u64`, `isize`, `usize` | integer number             |
//! | `f32`, `f64`, `OrderedFloat<f64>`      | number                         |
//! | `String`, `&str`                       | string (length-prefixed bytes) |
//! | `Option<T>`                            | nil or `T`                     |
//! | `[T; N]`                               | 1-indexed table of exactly N   |
//! | `Vec<T>`, `VecDeque<T>`, `&[T]`        | 1-indexed table without holes  |
//! | tuples up to 12                        | 1-indexed table, one per slot  |
//! | `HashMap<K, V>`, `BTreeMap<K, V>`      | table with arbitrary keys      |
//! | registered usertypes                   | userdata block                 |
//! | [`Value`]                              | any scalar                     |
//! | [`Skip`]                               | consumes a slot, reads nothing |
//!
//! Numbers and strings never coerce into each other, and booleans never
//! coerce into numbers. See [`Shape`] for the overload consequences.

use std::fmt;
use std::os::raw::c_int;

use mlua::ffi;

use crate::error::{CastError, Result, RuntimeError};
use crate::lua_type::LuaType;
use crate::shape::Shape;
use crate::stack::Stack;

mod collections;
mod primitive;
mod tuple;

/// Leave a native value on the stack.
///
/// Most implementations push exactly one value. `()` and [`Skip`] push
/// nothing; [`Multi`] and [`Variadic`] push one value per element.
pub trait Push {
    fn push(self, stack: Stack) -> Result<()>;
}

/// Read a native value from a stack slot.
pub trait Get: Sized {
    /// What this type accepts, for diagnostics and overload analysis.
    fn shape() -> Shape;

    /// Whether [`Get::get`] would succeed, without converting anything.
    ///
    /// Implementations must agree with `get`: the dispatcher commits to a
    /// candidate on `check` and then decodes with `get`.
    fn check(stack: Stack, index: c_int) -> bool;

    /// Decode the value at `index`.
    fn get(stack: Stack, index: c_int) -> Result<Self>;
}

/// Spread a list of call arguments onto the stack.
pub trait PushArgs {
    /// Push every argument and return how many were pushed.
    fn push_args(self, stack: Stack) -> Result<c_int>;
}

/// Collect the results of a call.
pub trait FromResults: Sized {
    /// Number of results to request, or `LUA_MULTRET`.
    const COUNT: c_int;

    /// Decode results starting at absolute index `first`.
    fn from_results(stack: Stack, first: c_int) -> Result<Self>;
}

/// The return value of a native callback.
///
/// Anything [`Push`] is returned as-is. A `Result` returns its `Ok` value and
/// turns `Err` into a script error carrying the error's message.
pub trait IntoResults {
    /// Push the results and return how many were pushed.
    fn into_results(self, stack: Stack) -> Result<c_int>;
}

impl<T: Push> IntoResults for T {
    fn into_results(self, stack: Stack) -> Result<c_int> {
        let before = stack.top();
        stack.reserve(1)?;
        self.push(stack)?;
        Ok(stack.top() - before)
    }
}

impl<T: Push, E: fmt::Display> IntoResults for std::result::Result<T, E> {
    fn into_results(self, stack: Stack) -> Result<c_int> {
        match self {
            Ok(value) => value.into_results(stack),
            Err(error) => Err(RuntimeError::Callback {
                message: error.to_string(),
            }
            .into()),
        }
    }
}

/// Several values pushed or read as separate stack slots.
///
/// Returned from a native callback, `Multi((a, b))` produces two results.
/// Requested from a script call, `Multi<(A, B)>` decodes two results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Multi<T>(pub T);

/// A variable number of values of one type, as separate stack slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> From<Vec<T>> for Variadic<T> {
    fn from(items: Vec<T>) -> Self {
        Variadic(items)
    }
}

/// Placeholder slot: consumes an argument position but reads nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Skip;

/// A dynamically typed scalar.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

// ============================================================================
// Unit, Skip and Value
// ============================================================================

impl Push for () {
    fn push(self, _stack: Stack) -> Result<()> {
        Ok(())
    }
}

impl Push for Skip {
    fn push(self, _stack: Stack) -> Result<()> {
        Ok(())
    }
}

impl Get for Skip {
    fn shape() -> Shape {
        Shape::Any
    }

    fn check(_stack: Stack, _index: c_int) -> bool {
        true
    }

    fn get(_stack: Stack, _index: c_int) -> Result<Self> {
        Ok(Skip)
    }
}

impl Push for Value {
    fn push(self, stack: Stack) -> Result<()> {
        match self {
            Value::Nil => {
                stack.push_nil();
                Ok(())
            }
            Value::Boolean(v) => v.push(stack),
            Value::Integer(v) => v.push(stack),
            Value::Number(v) => v.push(stack),
            Value::String(v) => v.push(stack),
        }
    }
}

impl Get for Value {
    fn shape() -> Shape {
        Shape::Scalar
    }

    fn check(stack: Stack, index: c_int) -> bool {
        match stack.type_of(index) {
            LuaType::Nil | LuaType::None | LuaType::Boolean | LuaType::Number => true,
            LuaType::String => String::check(stack, index),
            _ => false,
        }
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        match stack.type_of(index) {
            LuaType::Nil | LuaType::None => Ok(Value::Nil),
            LuaType::Boolean => Ok(Value::Boolean(bool::get(stack, index)?)),
            LuaType::Number => {
                if unsafe { ffi::lua_isinteger(stack.as_ptr(), index) } != 0 {
                    Ok(Value::Integer(i64::get(stack, index)?))
                } else {
                    Ok(Value::Number(f64::get(stack, index)?))
                }
            }
            LuaType::String => Ok(Value::String(String::get(stack, index)?)),
            other => Err(CastError::new(Shape::Scalar, other.name()).into()),
        }
    }
}

// ============================================================================
// Multi-value helpers
// ============================================================================

impl<T: Push> Push for Variadic<T> {
    fn push(self, stack: Stack) -> Result<()> {
        stack.reserve(self.0.len())?;
        for item in self.0 {
            item.push(stack)?;
        }
        Ok(())
    }
}

impl<T: Push> PushArgs for Variadic<T> {
    fn push_args(self, stack: Stack) -> Result<c_int> {
        let before = stack.top();
        self.push(stack)?;
        Ok(stack.top() - before)
    }
}

impl PushArgs for () {
    fn push_args(self, _stack: Stack) -> Result<c_int> {
        Ok(0)
    }
}

impl FromResults for () {
    const COUNT: c_int = 0;

    fn from_results(_stack: Stack, _first: c_int) -> Result<Self> {
        Ok(())
    }
}

impl<T: Get> FromResults for T {
    const COUNT: c_int = 1;

    fn from_results(stack: Stack, first: c_int) -> Result<Self> {
        T::get(stack, first).map_err(|e| e.with_context("result #1"))
    }
}

impl<T: Get> FromResults for Variadic<T> {
    const COUNT: c_int = ffi::LUA_MULTRET;

    fn from_results(stack: Stack, first: c_int) -> Result<Self> {
        let top = stack.top();
        let mut items = Vec::with_capacity((top - first + 1).max(0) as usize);
        for index in first..=top {
            let item = T::get(stack, index)
                .map_err(|e| e.with_context(format!("result #{}", index - first + 1)))?;
            Vec::push(&mut items, item);
        }
        Ok(Variadic(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::test_state::TestState;

    #[test]
    fn value_reads_each_scalar_kind() {
        let lua = TestState::new();
        let stack = lua.stack;
        lua.eval("nil");
        lua.eval("true");
        lua.eval("7");
        lua.eval("7.5");
        lua.eval("'text'");
        assert_eq!(stack.get::<Value>(1).unwrap(), Value::Nil);
        assert_eq!(stack.get::<Value>(2).unwrap(), Value::Boolean(true));
        assert_eq!(stack.get::<Value>(3).unwrap(), Value::Integer(7));
        assert_eq!(stack.get::<Value>(4).unwrap(), Value::Number(7.5));
        assert_eq!(stack.get::<Value>(5).unwrap(), Value::String("text".into()));
        lua.eval("{}");
        assert!(!stack.check::<Value>(6));
        assert!(stack.get::<Value>(6).unwrap_err().is_cast());
    }

    #[test]
    fn value_push_round_trip() {
        let lua = TestState::new();
        let stack = lua.stack;
        for value in [
            Value::Nil,
            Value::from(false),
            Value::from(-3i64),
            Value::from(0.25),
            Value::from("x"),
        ] {
            stack.push(value.clone()).unwrap();
            assert_eq!(stack.get::<Value>(-1).unwrap(), value);
            stack.pop(1);
        }
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn unit_and_skip_push_nothing() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.push(()).unwrap();
        stack.push(Skip).unwrap();
        assert_eq!(stack.top(), 0);
        assert!(stack.check::<Skip>(1));
    }

    #[test]
    fn variadic_spreads_and_collects() {
        let lua = TestState::new();
        let stack = lua.stack;
        let pushed = Variadic(vec![1, 2, 3]).push_args(stack).unwrap();
        assert_eq!(pushed, 3);
        let collected = Variadic::<i32>::from_results(stack, 1).unwrap();
        assert_eq!(collected, Variadic(vec![1, 2, 3]));
    }

    #[test]
    fn callback_results_count_pushed_values() {
        let lua = TestState::new();
        let stack = lua.stack;
        assert_eq!(().into_results(stack).unwrap(), 0);
        assert_eq!(5.into_results(stack).unwrap(), 1);
        assert_eq!(Multi((1, "two", 3.0)).into_results(stack).unwrap(), 3);
        assert_eq!(stack.top(), 4);

        let failed: std::result::Result<i32, String> = Err("boom".into());
        match failed.into_results(stack).unwrap_err() {
            crate::Error::Runtime(RuntimeError::Callback { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stack.top(), 4);
    }

    #[test]
    fn single_result_context() {
        let lua = TestState::new();
        lua.eval("'nope'");
        let err = <i32 as FromResults>::from_results(lua.stack, 1).unwrap_err();
        match err {
            crate::Error::Cast(cast) => assert_eq!(cast.context, "result #1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
