use std::os::raw::c_int;
use std::ptr;

use mlua::ffi;
use ordered_float::OrderedFloat;

use super::{Get, Push};
use crate::error::{CastError, Result};
use crate::lua_type::LuaType;
use crate::shape::Shape;
use crate::stack::Stack;

/// Integer value of a number slot: integer subtype, or a float with an exact
/// integral value.
fn integer_at(stack: Stack, index: c_int) -> std::result::Result<i64, CastError> {
    let actual = stack.type_of(index);
    if actual != LuaType::Number {
        return Err(CastError::new(Shape::Integer, actual.name()));
    }
    let mut is_num: c_int = 0;
    let value = unsafe { ffi::lua_tointegerx(stack.as_ptr(), index, &mut is_num) };
    if is_num != 0 {
        Ok(value)
    } else {
        Err(CastError::new(Shape::Integer, "number").with_reason("number has no integer representation"))
    }
}

fn number_at(stack: Stack, index: c_int) -> std::result::Result<f64, CastError> {
    let actual = stack.type_of(index);
    if actual != LuaType::Number {
        return Err(CastError::new(Shape::Number, actual.name()));
    }
    Ok(unsafe { ffi::lua_tonumberx(stack.as_ptr(), index, ptr::null_mut()) })
}

// ============================================================================
// Integer implementations
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl Push for $ty {
                fn push(self, stack: Stack) -> Result<()> {
                    unsafe { ffi::lua_pushinteger(stack.as_ptr(), self as ffi::lua_Integer) };
                    Ok(())
                }
            }

            impl Get for $ty {
                fn shape() -> Shape {
                    Shape::Integer
                }

                fn check(stack: Stack, index: c_int) -> bool {
                    integer_at(stack, index).is_ok_and(|v| <$ty>::try_from(v).is_ok())
                }

                fn get(stack: Stack, index: c_int) -> Result<Self> {
                    let value = integer_at(stack, index)?;
                    <$ty>::try_from(value).map_err(|_| {
                        CastError::new(Shape::Integer, "number")
                            .with_reason(format!("{value} is out of range for {}", stringify!($ty)))
                            .into()
                    })
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32);

// u64 reinterprets bits so the full range round-trips through the runtime's i64.
impl Push for u64 {
    fn push(self, stack: Stack) -> Result<()> {
        unsafe { ffi::lua_pushinteger(stack.as_ptr(), self as i64) };
        Ok(())
    }
}

impl Get for u64 {
    fn shape() -> Shape {
        Shape::Integer
    }

    fn check(stack: Stack, index: c_int) -> bool {
        integer_at(stack, index).is_ok()
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        Ok(integer_at(stack, index)? as u64)
    }
}

// usize follows u64, so lengths and indices above i64::MAX survive the trip.
impl Push for usize {
    fn push(self, stack: Stack) -> Result<()> {
        (self as u64).push(stack)
    }
}

impl Get for usize {
    fn shape() -> Shape {
        Shape::Integer
    }

    fn check(stack: Stack, index: c_int) -> bool {
        integer_at(stack, index).is_ok_and(|v| usize::try_from(v as u64).is_ok())
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        let value = u64::get(stack, index)?;
        usize::try_from(value).map_err(|_| {
            CastError::new(Shape::Integer, "number")
                .with_reason(format!("{value} is out of range for usize"))
                .into()
        })
    }
}

// ============================================================================
// Float implementations
// ============================================================================

impl Push for f64 {
    fn push(self, stack: Stack) -> Result<()> {
        unsafe { ffi::lua_pushnumber(stack.as_ptr(), self) };
        Ok(())
    }
}

impl Get for f64 {
    fn shape() -> Shape {
        Shape::Number
    }

    fn check(stack: Stack, index: c_int) -> bool {
        stack.type_of(index) == LuaType::Number
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        Ok(number_at(stack, index)?)
    }
}

impl Push for f32 {
    fn push(self, stack: Stack) -> Result<()> {
        f64::from(self).push(stack)
    }
}

impl Get for f32 {
    fn shape() -> Shape {
        Shape::Number
    }

    fn check(stack: Stack, index: c_int) -> bool {
        number_at(stack, index).is_ok_and(fits_f32)
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        let value = number_at(stack, index)?;
        if fits_f32(value) {
            Ok(value as f32)
        } else {
            Err(CastError::new(Shape::Number, "number")
                .with_reason(format!("{value} is out of range for f32"))
                .into())
        }
    }
}

// Infinities and NaN are preserved; finite values must stay finite.
fn fits_f32(value: f64) -> bool {
    !value.is_finite() || (value >= f32::MIN as f64 && value <= f32::MAX as f64)
}

impl Push for OrderedFloat<f64> {
    fn push(self, stack: Stack) -> Result<()> {
        self.0.push(stack)
    }
}

impl Get for OrderedFloat<f64> {
    fn shape() -> Shape {
        Shape::Number
    }

    fn check(stack: Stack, index: c_int) -> bool {
        f64::check(stack, index)
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        f64::get(stack, index).map(OrderedFloat)
    }
}

// ============================================================================
// Boolean implementation
// ============================================================================

impl Push for bool {
    fn push(self, stack: Stack) -> Result<()> {
        unsafe { ffi::lua_pushboolean(stack.as_ptr(), c_int::from(self)) };
        Ok(())
    }
}

impl Get for bool {
    fn shape() -> Shape {
        Shape::Boolean
    }

    fn check(stack: Stack, index: c_int) -> bool {
        stack.type_of(index) == LuaType::Boolean
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        let actual = stack.type_of(index);
        if actual != LuaType::Boolean {
            return Err(CastError::new(Shape::Boolean, actual.name()).into());
        }
        Ok(unsafe { ffi::lua_toboolean(stack.as_ptr(), index) } != 0)
    }
}

// ============================================================================
// String implementations
// ============================================================================

impl Push for &str {
    fn push(self, stack: Stack) -> Result<()> {
        stack.push_str(self);
        Ok(())
    }
}

impl Push for String {
    fn push(self, stack: Stack) -> Result<()> {
        stack.push_str(&self);
        Ok(())
    }
}

impl Push for &String {
    fn push(self, stack: Stack) -> Result<()> {
        stack.push_str(self);
        Ok(())
    }
}

impl Get for String {
    fn shape() -> Shape {
        Shape::String
    }

    fn check(stack: Stack, index: c_int) -> bool {
        stack.type_of(index) == LuaType::String
            && std::str::from_utf8(unsafe { stack.string_bytes(index) }).is_ok()
    }

    fn get(stack: Stack, index: c_int) -> Result<Self> {
        let actual = stack.type_of(index);
        if actual != LuaType::String {
            return Err(CastError::new(Shape::String, actual.name()).into());
        }
        let bytes = unsafe { stack.string_bytes(index) };
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(err) => Err(CastError::new(Shape::String, "string")
                .with_reason(format!("invalid UTF-8 at byte {}", err.valid_up_to()))
                .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::test_state::TestState;

    fn round_trip<T: Push + Get + Clone + PartialEq + std::fmt::Debug>(stack: Stack, value: T) {
        stack.push(value.clone()).unwrap();
        assert_eq!(stack.get::<T>(-1).unwrap(), value);
        stack.pop(1);
    }

    #[test]
    fn integers_round_trip_at_their_limits() {
        let lua = TestState::new();
        let stack = lua.stack;
        round_trip(stack, i8::MIN);
        round_trip(stack, i8::MAX);
        round_trip(stack, u8::MAX);
        round_trip(stack, i16::MIN);
        round_trip(stack, u16::MAX);
        round_trip(stack, i32::MIN);
        round_trip(stack, u32::MAX);
        round_trip(stack, i64::MIN);
        round_trip(stack, i64::MAX);
        round_trip(stack, u64::MAX);
        round_trip(stack, usize::MAX >> 1);
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn unsigned_maxima_round_trip() {
        let lua = TestState::new();
        let stack = lua.stack;
        round_trip(stack, u8::MAX);
        round_trip(stack, u16::MAX);
        round_trip(stack, u32::MAX);
        round_trip(stack, u64::MAX);
        round_trip(stack, usize::MAX);
        round_trip(stack, usize::MAX - 1);
        round_trip(stack, (i64::MAX as usize) + 1);

        stack.push(usize::MAX).unwrap();
        assert!(stack.check::<usize>(-1));
        assert!(stack.check::<u64>(-1));
        assert!(!stack.check::<u32>(-1));
        stack.pop(1);
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn narrowing_is_range_checked() {
        let lua = TestState::new();
        let stack = lua.stack;
        lua.eval("300");
        assert!(!stack.check::<u8>(-1));
        assert!(stack.get::<u8>(-1).unwrap_err().is_cast());
        assert_eq!(stack.get::<u16>(-1).unwrap(), 300);
        lua.eval("-1");
        assert!(stack.get::<u32>(-1).is_err());
        assert_eq!(stack.get::<u64>(-1).unwrap(), u64::MAX);
    }

    #[test]
    fn integral_floats_are_integers() {
        let lua = TestState::new();
        let stack = lua.stack;
        lua.eval("10 / 2");
        assert_eq!(stack.get::<i32>(-1).unwrap(), 5);
        lua.eval("2.5");
        assert!(!stack.check::<i32>(-1));
        assert!(stack.get::<i64>(-1).is_err());
        assert_eq!(stack.get::<f64>(-1).unwrap(), 2.5);
    }

    #[test]
    fn floats_accept_any_number() {
        let lua = TestState::new();
        let stack = lua.stack;
        lua.eval("3");
        assert_eq!(stack.get::<f64>(-1).unwrap(), 3.0);
        round_trip(stack, 0.1f32);
        round_trip(stack, -1.5e300f64);
        round_trip(stack, OrderedFloat(2.25));
        lua.eval("1e300");
        assert!(!stack.check::<f32>(-1));
        lua.eval("math.huge");
        assert!(stack.get::<f32>(-1).unwrap().is_infinite());
    }

    #[test]
    fn no_string_number_or_boolean_crosstalk() {
        let lua = TestState::new();
        let stack = lua.stack;
        lua.eval("'42'");
        assert!(!stack.check::<i32>(-1));
        assert!(!stack.check::<f64>(-1));
        assert!(stack.get::<f64>(-1).is_err());
        lua.eval("42");
        assert!(!stack.check::<String>(-1));
        assert!(stack.get::<String>(-1).is_err());
        lua.eval("true");
        assert!(!stack.check::<i32>(-1));
        assert!(stack.get::<f64>(-1).is_err());
        lua.eval("0");
        assert!(!stack.check::<bool>(-1));
        lua.eval("nil");
        assert!(stack.get::<bool>(-1).is_err());
    }

    #[test]
    fn strings_keep_embedded_nul_and_empty() {
        let lua = TestState::new();
        let stack = lua.stack;
        round_trip(stack, String::new());
        round_trip(stack, "a\0b".to_owned());
        round_trip(stack, "ünïcödé".to_owned());
        stack.push("borrowed").unwrap();
        assert_eq!(stack.raw_len(-1), 8);
        stack.pop(1);
    }

    #[test]
    fn invalid_utf8_is_a_cast_error() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.push_bytes(&[0x66, 0xff, 0x66]);
        assert!(!stack.check::<String>(-1));
        let err = stack.get::<String>(-1).unwrap_err();
        assert!(err.to_string().contains("invalid UTF-8 at byte 1"));
    }

    #[test]
    fn booleans_round_trip() {
        let lua = TestState::new();
        round_trip(lua.stack, true);
        round_trip(lua.stack, false);
    }
}
