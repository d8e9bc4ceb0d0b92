use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::os::raw::c_int;
use std::ptr;

use mlua::ffi;

use super::{Get, Push};
use crate::error::{CastError, Result};
use crate::lua_type::LuaType;
use crate::shape::Shape;
use crate::stack::Stack;

// ============================================================================
// Sequence helpers
// ============================================================================

/// Length of the proper sequence at `index`.
///
/// Every key must be an integer in `1..=n` and there must be exactly `n` of
/// them, so the keys are 1, 2, ..., n with no gaps and nothing else.
pub(super) fn sequence_len(
    stack: Stack,
    index: c_int,
    shape: fn() -> Shape,
) -> std::result::Result<usize, CastError> {
    let actual = stack.type_of(index);
    if actual != LuaType::Table {
        return Err(CastError::new(shape(), actual.name()));
    }
    if stack.reserve(2).is_err() {
        return Err(CastError::new(shape(), "table").with_reason("value stack exhausted"));
    }
    let index = stack.abs_index(index);
    let len = stack.raw_len(index);
    let _guard = stack.guard();

    stack.push_nil();
    let mut count = 0usize;
    while unsafe { ffi::lua_next(stack.as_ptr(), index) } != 0 {
        let key_in_range = unsafe {
            ffi::lua_isinteger(stack.as_ptr(), -2) != 0 && {
                let key = ffi::lua_tointegerx(stack.as_ptr(), -2, ptr::null_mut());
                key >= 1 && key as u64 <= len as u64
            }
        };
        if !key_in_range {
            let key = stack.type_name(-2);
            return Err(CastError::new(shape(), "table")
                .with_reason(format!("table has a non-sequence {key} key")));
        }
        stack.pop(1);
        count += 1;
    }

    if count != len {
        return Err(CastError::new(shape(), "table")
            .with_reason(format!("sequence has holes ({count} keys for length {len})")));
    }
    Ok(len)
}

fn decode_elements<T: Get>(stack: Stack, index: c_int, len: usize) -> Result<Vec<T>> {
    stack.reserve(1)?;
    let index = stack.abs_index(index);
    let mut items = Vec::with_capacity(len);
    for i in 1..=len {
        unsafe { ffi::lua_rawgeti(stack.as_ptr(), index, i as ffi::lua_Integer) };
        let item = T::get(stack, -1);
        stack.pop(1);
        Vec::push(&mut items, item.map_err(|e| e.with_context(format!("element [{i}]")))?);
    }
    Ok(items)
}

fn check_elements<T: Get>(stack: Stack, index: c_int, len: usize) -> bool {
    if stack.reserve(1).is_err() {
        return false;
    }
    let index = stack.abs_index(index);
    (1..=len).all(|i| {
        unsafe { ffi::lua_rawgeti(stack.as_ptr(), index, i as ffi::lua_Integer) };
        let ok = T::check(stack, -1);
        stack.pop(1);
        ok
    })
}

/// Push `items` as a 1-indexed table.
fn push_sequence<T, I>(stack: Stack, len: usize, items: I) -> Result<()>
where
    T: Push,
    I: IntoIterator<Item = T>,
{
    stack.reserve(2)?;
    let guard = stack.guard();
    stack.new_table(len, 0);
    for (i, item) in items.into_iter().enumerate() {
        item.push(stack)?;
        unsafe { ffi::lua_rawseti(stack.as_ptr(), -2, (i + 1) as ffi::lua_Integer) };
    }
    guard.keep(1);
    Ok(())
}

// ============================================================================
// Option
// ============================================================================

impl<T: Push> Push for Option<T> {
    fn push(self, stack: Stack) -> Result<()> {
        match self {
            Some(value) => value.push(stack),
            None => {
                stack.push_nil();
                Ok(())
            }
        }
    }
}

impl<T: Get> Get for Option<T> {
    fn shape() -> Shape {
        Shape::Optional(Box::new(T::shape()))
    }

    fn check(stack: Stack, index: c_int) -> bool {
        stack.is_nil_or_none(index) || T::check(stack, index)
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        if stack.is_nil_or_none(index) {
            Ok(None)
        } else {
            T::get(stack, index).map(Some)
        }
    }
}

// ============================================================================
// Dynamic sequences
// ============================================================================

impl<T: Push> Push for Vec<T> {
    fn push(self, stack: Stack) -> Result<()> {
        let len = self.len();
        push_sequence(stack, len, self)
    }
}

impl<T: Get> Get for Vec<T> {
    fn shape() -> Shape {
        Shape::Sequence(Box::new(T::shape()))
    }

    fn check(stack: Stack, index: c_int) -> bool {
        sequence_len(stack, index, Self::shape).is_ok_and(|len| check_elements::<T>(stack, index, len))
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        let len = sequence_len(stack, index, Self::shape)?;
        decode_elements(stack, index, len)
    }
}

impl<T: Push> Push for VecDeque<T> {
    fn push(self, stack: Stack) -> Result<()> {
        let len = self.len();
        push_sequence(stack, len, self)
    }
}

impl<T: Get> Get for VecDeque<T> {
    fn shape() -> Shape {
        Shape::Sequence(Box::new(T::shape()))
    }

    fn check(stack: Stack, index: c_int) -> bool {
        Vec::<T>::check(stack, index)
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        Vec::<T>::get(stack, index).map(VecDeque::from)
    }
}

impl<T: Push + Clone> Push for &[T] {
    fn push(self, stack: Stack) -> Result<()> {
        push_sequence(stack, self.len(), self.iter().cloned())
    }
}

impl<T: Push + Clone> Push for &Vec<T> {
    fn push(self, stack: Stack) -> Result<()> {
        self.as_slice().push(stack)
    }
}

// ============================================================================
// Fixed-size arrays
// ============================================================================

impl<T: Push, const N: usize> Push for [T; N] {
    fn push(self, stack: Stack) -> Result<()> {
        push_sequence(stack, N, self)
    }
}

impl<T: Get, const N: usize> Get for [T; N] {
    fn shape() -> Shape {
        Shape::Array(Box::new(T::shape()), N)
    }

    fn check(stack: Stack, index: c_int) -> bool {
        sequence_len(stack, index, Self::shape)
            .is_ok_and(|len| len == N && check_elements::<T>(stack, index, len))
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        let len = sequence_len(stack, index, Self::shape)?;
        if len != N {
            return Err(CastError::new(Self::shape(), "table")
                .with_reason(format!("expected exactly {N} elements, found {len}"))
                .into());
        }
        let items = decode_elements::<T>(stack, index, len)?;
        items.try_into().map_err(|_: Vec<T>| {
            CastError::new(Self::shape(), "table")
                .with_reason("element count changed while decoding")
                .into()
        })
    }
}

// ============================================================================
// Maps
// ============================================================================

fn push_map<K: Push, V: Push>(stack: Stack, len: usize, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
    stack.reserve(3)?;
    let guard = stack.guard();
    stack.new_table(0, len);
    let base = stack.top();
    for (key, value) in entries {
        key.push(stack)?;
        check_key(stack, base)?;
        value.push(stack)?;
        if stack.top() != base + 2 {
            return Err(single_value_error(stack, base + 1, "map value"));
        }
        unsafe { ffi::lua_rawset(stack.as_ptr(), -3) };
    }
    guard.keep(1);
    Ok(())
}

/// Reject keys `lua_rawset` would raise on: nil, NaN, or anything but one value.
fn check_key(stack: Stack, base: c_int) -> Result<()> {
    if stack.top() != base + 1 {
        return Err(single_value_error(stack, base, "map key"));
    }
    let reason = match stack.type_of(-1) {
        LuaType::Nil => "table index is nil",
        LuaType::Number if unsafe { ffi::lua_isinteger(stack.as_ptr(), -1) } == 0 => {
            let number = unsafe { ffi::lua_tonumberx(stack.as_ptr(), -1, ptr::null_mut()) };
            if !number.is_nan() {
                return Ok(());
            }
            "table index is NaN"
        }
        _ => return Ok(()),
    };
    Err(CastError::new(Shape::Any, stack.type_name(-1))
        .with_context("map key")
        .with_reason(reason)
        .into())
}

fn single_value_error(stack: Stack, base: c_int, context: &str) -> crate::Error {
    let pushed = stack.top() - base;
    CastError::new(Shape::Any, "multiple values")
        .with_context(context)
        .with_reason(format!("pushed {pushed} values instead of one"))
        .into()
}

fn decode_map<K: Get, V: Get>(stack: Stack, index: c_int, shape: fn() -> Shape) -> Result<Vec<(K, V)>> {
    let actual = stack.type_of(index);
    if actual != LuaType::Table {
        return Err(CastError::new(shape(), actual.name()).into());
    }
    stack.reserve(2)?;
    let index = stack.abs_index(index);
    let _guard = stack.guard();
    let mut entries = Vec::new();
    stack.push_nil();
    while unsafe { ffi::lua_next(stack.as_ptr(), index) } != 0 {
        let key = K::get(stack, -2).map_err(|e| e.with_context("map key"))?;
        let value = V::get(stack, -1).map_err(|e| e.with_context("map value"))?;
        stack.pop(1);
        Vec::push(&mut entries, (key, value));
    }
    Ok(entries)
}

fn check_map<K: Get, V: Get>(stack: Stack, index: c_int) -> bool {
    if stack.type_of(index) != LuaType::Table || stack.reserve(2).is_err() {
        return false;
    }
    let index = stack.abs_index(index);
    let _guard = stack.guard();
    stack.push_nil();
    while unsafe { ffi::lua_next(stack.as_ptr(), index) } != 0 {
        if !K::check(stack, -2) || !V::check(stack, -1) {
            return false;
        }
        stack.pop(1);
    }
    true
}

impl<K: Push, V: Push, S> Push for HashMap<K, V, S> {
    fn push(self, stack: Stack) -> Result<()> {
        let len = self.len();
        push_map(stack, len, self)
    }
}

impl<K, V, S> Get for HashMap<K, V, S>
where
    K: Get + Eq + Hash,
    V: Get,
    S: BuildHasher + Default,
{
    fn shape() -> Shape {
        Shape::Map(Box::new(K::shape()), Box::new(V::shape()))
    }

    fn check(stack: Stack, index: c_int) -> bool {
        check_map::<K, V>(stack, index)
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        Ok(decode_map::<K, V>(stack, index, Self::shape)?.into_iter().collect())
    }
}

impl<K: Push, V: Push> Push for BTreeMap<K, V> {
    fn push(self, stack: Stack) -> Result<()> {
        let len = self.len();
        push_map(stack, len, self)
    }
}

impl<K: Get + Ord, V: Get> Get for BTreeMap<K, V> {
    fn shape() -> Shape {
        Shape::Map(Box::new(K::shape()), Box::new(V::shape()))
    }

    fn check(stack: Stack, index: c_int) -> bool {
        check_map::<K, V>(stack, index)
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        Ok(decode_map::<K, V>(stack, index, Self::shape)?.into_iter().collect())
    }
}
