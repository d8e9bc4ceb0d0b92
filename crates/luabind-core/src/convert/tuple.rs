use std::os::raw::c_int;

use mlua::ffi;

use super::collections::sequence_len;
use super::{FromResults, Get, Multi, Push, PushArgs};
use crate::error::{CastError, Result};
use crate::shape::Shape;
use crate::stack::Stack;

fn get_slot<T: Get>(stack: Stack, table: c_int, slot: usize) -> Result<T> {
    unsafe { ffi::lua_rawgeti(stack.as_ptr(), table, slot as ffi::lua_Integer) };
    let value = T::get(stack, -1);
    stack.pop(1);
    value.map_err(|e| e.with_context(format!("element [{slot}]")))
}

fn check_slot<T: Get>(stack: Stack, table: c_int, slot: usize) -> bool {
    unsafe { ffi::lua_rawgeti(stack.as_ptr(), table, slot as ffi::lua_Integer) };
    let ok = T::check(stack, -1);
    stack.pop(1);
    ok
}

fn get_result<T: Get>(stack: Stack, first: c_int, slot: c_int) -> Result<T> {
    T::get(stack, first + slot - 1).map_err(|e| e.with_context(format!("result #{slot}")))
}

macro_rules! impl_tuple {
    ($($T:ident $v:ident),+) => {
        impl<$($T: Push),+> Push for ($($T,)+) {
            fn push(self, stack: Stack) -> Result<()> {
                const ARITY: usize = [$(stringify!($T)),+].len();
                stack.reserve(2)?;
                let guard = stack.guard();
                stack.new_table(ARITY, 0);
                let ($($v,)+) = self;
                let mut slot: ffi::lua_Integer = 0;
                $(
                    slot += 1;
                    $v.push(stack)?;
                    unsafe { ffi::lua_rawseti(stack.as_ptr(), -2, slot) };
                )+
                guard.keep(1);
                Ok(())
            }
        }

        impl<$($T: Get),+> Get for ($($T,)+) {
            fn shape() -> Shape {
                Shape::Tuple(vec![$($T::shape()),+])
            }

            fn check(stack: Stack, index: c_int) -> bool {
                const ARITY: usize = [$(stringify!($T)),+].len();
                if !sequence_len(stack, index, Self::shape).is_ok_and(|len| len == ARITY) {
                    return false;
                }
                if stack.reserve(1).is_err() {
                    return false;
                }
                let table = stack.abs_index(index);
                let mut slot = 0;
                $(
                    slot += 1;
                    if !check_slot::<$T>(stack, table, slot) {
                        return false;
                    }
                )+
                true
            }

            fn get(stack: Stack, index: c_int) -> Result<Self> {
                const ARITY: usize = [$(stringify!($T)),+].len();
                let len = sequence_len(stack, index, Self::shape)?;
                if len != ARITY {
                    return Err(CastError::new(Self::shape(), "table")
                        .with_reason(format!("expected exactly {ARITY} elements, found {len}"))
                        .into());
                }
                stack.reserve(1)?;
                let table = stack.abs_index(index);
                let mut slot = 0;
                $(
                    slot += 1;
                    let $v = get_slot::<$T>(stack, table, slot)?;
                )+
                Ok(($($v,)+))
            }
        }

        impl<$($T: Push),+> PushArgs for ($($T,)+) {
            fn push_args(self, stack: Stack) -> Result<c_int> {
                Multi(self).push_args(stack)
            }
        }

        impl<$($T: Push),+> PushArgs for Multi<($($T,)+)> {
            fn push_args(self, stack: Stack) -> Result<c_int> {
                let before = stack.top();
                self.push(stack)?;
                Ok(stack.top() - before)
            }
        }

        impl<$($T: Push),+> Push for Multi<($($T,)+)> {
            fn push(self, stack: Stack) -> Result<()> {
                const ARITY: usize = [$(stringify!($T)),+].len();
                stack.reserve(ARITY)?;
                let guard = stack.guard();
                let ($($v,)+) = self.0;
                $( $v.push(stack)?; )+
                let pushed = stack.top() - guard.top();
                guard.keep(pushed);
                Ok(())
            }
        }

        impl<$($T: Get),+> FromResults for Multi<($($T,)+)> {
            const COUNT: c_int = [$(stringify!($T)),+].len() as c_int;

            fn from_results(stack: Stack, first: c_int) -> Result<Self> {
                let mut slot = 0;
                $(
                    slot += 1;
                    let $v = get_result::<$T>(stack, first, slot)?;
                )+
                Ok(Multi(($($v,)+)))
            }
        }
    };
}

impl_tuple!(A a);
impl_tuple!(A a, B b);
impl_tuple!(A a, B b, C c);
impl_tuple!(A a, B b, C c, D d);
impl_tuple!(A a, B b, C c, D d, E e);
impl_tuple!(A a, B b, C c, D d, E e, F f);
impl_tuple!(A a, B b, C c, D d, E e, F f, G g);
impl_tuple!(A a, B b, C c, D d, E e, F f, G g, H h);
impl_tuple!(A a, B b, C c, D d, E e, F f, G g, H h, I i);
impl_tuple!(A a, B b, C c, D d, E e, F f, G g, H h, I i, J j);
impl_tuple!(A a, B b, C c, D d, E e, F f, G g, H h, I i, J j, K k);
impl_tuple!(A a, B b, C c, D d, E e, F f, G g, H h, I i, J j, K k, L l);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::test_state::TestState;

    type Complex = (
        i32,
        Vec<(String, f64)>,
        Option<[bool; 2]>,
        (u8, (String, Vec<i64>)),
    );

    #[test]
    fn nested_tuples_round_trip() {
        let lua = TestState::new();
        let stack = lua.stack;
        let value: Complex = (
            -7,
            vec![("x".into(), 1.5), ("y".into(), -2.0)],
            Some([true, false]),
            (255, ("deep".into(), vec![1, 2, 3])),
        );
        stack.push(value.clone()).unwrap();
        assert!(stack.check::<Complex>(-1));
        assert_eq!(stack.get::<Complex>(-1).unwrap(), value);
        stack.pop(1);
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn tuple_arity_must_match() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.push((1, "two")).unwrap();
        assert!(!stack.check::<(i32,)>(-1));
        assert!(!stack.check::<(i32, String, bool)>(-1));
        assert!(!stack.check::<(String, i32)>(-1));
        let err = stack.get::<(i32, i32)>(-1).unwrap_err();
        match err {
            crate::Error::Cast(cast) => assert_eq!(cast.context, "element [2]"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stack.top(), 1);
    }

    #[test]
    fn multi_pushes_separate_values() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.push(Multi((1, "two", 3.5))).unwrap();
        assert_eq!(stack.top(), 3);
        let Multi((a, b, c)) = Multi::<(i32, String, f64)>::from_results(stack, 1).unwrap();
        assert_eq!((a, b.as_str(), c), (1, "two", 3.5));
    }

    #[test]
    fn tuple_arguments_are_spread() {
        let lua = TestState::new();
        let stack = lua.stack;
        assert_eq!((1, 2).push_args(stack).unwrap(), 2);
        assert_eq!(stack.top(), 2);
        assert_eq!(<Multi<(u8, u8)> as FromResults>::COUNT, 2);
    }
}
