//! How one parameter of a native function is read from its stack slot.
//!
//! Most parameters are decoded by value through [`Get`]. A parameter typed
//! `&T`, `&mut T` or `Option<&T>` for a registered usertype `T` borrows the
//! block in place instead, at any position. Borrows follow the block's
//! borrow counter, so `|a: &T, b: &mut T|` called with the same object twice
//! is a cast error rather than aliasing.
//!
//! The `Kind` parameter keeps the by-value and by-reference implementations
//! apart; it is always inferred.

use std::any::{TypeId, type_name};
use std::os::raw::c_int;
use std::ptr::NonNull;

use luabind_core::usertype::{UserMut, UserRef, check_usertype};
use luabind_core::{Get, Result, Shape, Stack, UserType};

use super::{Param, argument, receiver, receiver_mut};

#[doc(hidden)]
pub enum ByValue {}

#[doc(hidden)]
pub enum ByRef {}

#[doc(hidden)]
pub enum ByMut {}

#[doc(hidden)]
pub enum ByOptionalRef {}

/// A type a native function can declare as a parameter.
pub trait Argument<Kind> {
    /// What the callable receives.
    type Out<'a>;
    /// The decoded value, or a pointer into a borrowed block.
    type Held;
    /// Holds the block's borrow until the call returns.
    type Guard;

    fn param() -> Param;

    /// Read the argument at `index`.
    ///
    /// # Safety
    ///
    /// The value at `index` must stay on the stack while the guard lives.
    unsafe fn take(stack: Stack, index: c_int) -> Result<(Self::Held, Self::Guard)>;

    /// # Safety
    ///
    /// The guard taken alongside `held` must outlive `'a`.
    unsafe fn view<'a>(held: Self::Held) -> Self::Out<'a>;
}

impl<T: Get + 'static> Argument<ByValue> for T {
    type Out<'a> = T;
    type Held = T;
    type Guard = ();

    fn param() -> Param {
        Param::of::<T>()
    }

    unsafe fn take(stack: Stack, index: c_int) -> Result<(T, ())> {
        Ok((argument::<T>(stack, index)?, ()))
    }

    unsafe fn view<'a>(held: T) -> Self::Out<'a> {
        held
    }
}

impl<'r, T: UserType> Argument<ByRef> for &'r T {
    type Out<'a> = &'a T;
    type Held = NonNull<T>;
    type Guard = UserRef<'static, T>;

    fn param() -> Param {
        Param::receiver::<T>()
    }

    unsafe fn take(stack: Stack, index: c_int) -> Result<(NonNull<T>, UserRef<'static, T>)> {
        let guard = unsafe { receiver::<T>(stack, index) }?;
        Ok((NonNull::from(&*guard), guard))
    }

    unsafe fn view<'a>(held: NonNull<T>) -> &'a T {
        unsafe { held.as_ref() }
    }
}

impl<'r, T: UserType> Argument<ByMut> for &'r mut T {
    type Out<'a> = &'a mut T;
    type Held = NonNull<T>;
    type Guard = UserMut<'static, T>;

    fn param() -> Param {
        Param::receiver::<T>()
    }

    unsafe fn take(stack: Stack, index: c_int) -> Result<(NonNull<T>, UserMut<'static, T>)> {
        let mut guard = unsafe { receiver_mut::<T>(stack, index) }?;
        Ok((NonNull::from(&mut *guard), guard))
    }

    unsafe fn view<'a>(mut held: NonNull<T>) -> &'a mut T {
        unsafe { held.as_mut() }
    }
}

impl<'r, T: UserType> Argument<ByOptionalRef> for Option<&'r T> {
    type Out<'a> = Option<&'a T>;
    type Held = Option<NonNull<T>>;
    type Guard = Option<UserRef<'static, T>>;

    fn param() -> Param {
        Param {
            type_id: TypeId::of::<Option<T>>(),
            type_name: type_name::<Option<&T>>(),
            shape: Shape::Optional(Box::new(Shape::Usertype(T::NAME))),
            numeric: None,
            check: check_optional_usertype::<T>,
        }
    }

    unsafe fn take(stack: Stack, index: c_int) -> Result<(Self::Held, Self::Guard)> {
        if stack.is_nil_or_none(index) {
            return Ok((None, None));
        }
        let (held, guard) = unsafe { <&T as Argument<ByRef>>::take(stack, index) }?;
        Ok((Some(held), Some(guard)))
    }

    unsafe fn view<'a>(held: Self::Held) -> Option<&'a T> {
        held.map(|held| unsafe { held.as_ref() })
    }
}

fn check_optional_usertype<T: UserType>(stack: Stack, index: c_int) -> bool {
    stack.is_nil_or_none(index) || check_usertype::<T>(stack, index)
}
