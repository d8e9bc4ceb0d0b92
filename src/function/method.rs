//! Receiver shims: native functions whose first parameter is a live usertype.
//!
//! The receiver is borrowed in place before the other arguments are taken,
//! so a `&mut` receiver conflicts with the same object passed again. Every
//! borrow is released when the call returns or an argument fails to decode.

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::rc::Rc;

use luabind_core::{Get, IntoResults, UserType};

use super::{Argument, Candidate, NativeFunction, Param, argument, receiver, receiver_mut};

/// Wraps `Fn(&T, A..) -> R` as a function taking the receiver as argument #1.
pub struct Method<T, F> {
    f: F,
    _receiver: PhantomData<fn(&T)>,
}

impl<T, F> Method<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _receiver: PhantomData,
        }
    }
}

/// Wraps `Fn(&mut T, A..) -> R` as a function taking the receiver as argument #1.
pub struct MethodMut<T, F> {
    f: F,
    _receiver: PhantomData<fn(&mut T)>,
}

impl<T, F> MethodMut<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _receiver: PhantomData,
        }
    }
}

/// Marker for [`Method`] adapters.
#[doc(hidden)]
pub enum Receiver {}

/// Marker for [`MethodMut`] adapters.
#[doc(hidden)]
pub enum ReceiverMut {}

macro_rules! impl_method {
    ($($A:ident $K:ident $a:ident $g:ident),*) => {
        impl<T, F, R, $($A, $K,)*> NativeFunction<(Receiver, fn($(($A, $K),)*) -> R)> for Method<T, F>
        where
            T: UserType,
            F: Fn(&T $(, $A)*) -> R + for<'a> Fn(&'a T $(, <$A as Argument<$K>>::Out<'a>)*) -> R + 'static,
            R: IntoResults,
            $($A: Argument<$K>,)*
        {
            #[allow(unused_variables, unused_mut, unused_assignments, non_snake_case)]
            fn into_candidate(self) -> Candidate {
                fn call<'a, T, R, $($A,)*>(f: &impl Fn(&'a T $(, $A)*) -> R, this: &'a T $(, $a: $A)*) -> R {
                    f(this $(, $a)*)
                }

                let f = self.f;
                Candidate::new(vec![Param::receiver::<T>(), $(<$A as Argument<$K>>::param()),*], move |stack| {
                    let result = {
                        let this = unsafe { receiver::<T>(stack, 1) }?;
                        let mut slot: c_int = 1;
                        $(
                            slot += 1;
                            let ($a, $g) = unsafe { <$A as Argument<$K>>::take(stack, slot) }?;
                        )*
                        call(&f, &*this $(, unsafe { <$A as Argument<$K>>::view($a) })*)
                    };
                    result.into_results(stack)
                })
            }
        }

        impl<T, F, R, $($A, $K,)*> NativeFunction<(ReceiverMut, fn($(($A, $K),)*) -> R)> for MethodMut<T, F>
        where
            T: UserType,
            F: Fn(&mut T $(, $A)*) -> R
                + for<'a> Fn(&'a mut T $(, <$A as Argument<$K>>::Out<'a>)*) -> R
                + 'static,
            R: IntoResults,
            $($A: Argument<$K>,)*
        {
            #[allow(unused_variables, unused_mut, unused_assignments, non_snake_case)]
            fn into_candidate(self) -> Candidate {
                fn call<'a, T, R, $($A,)*>(
                    f: &impl Fn(&'a mut T $(, $A)*) -> R,
                    this: &'a mut T
                    $(, $a: $A)*
                ) -> R {
                    f(this $(, $a)*)
                }

                let f = self.f;
                Candidate::new(vec![Param::receiver::<T>(), $(<$A as Argument<$K>>::param()),*], move |stack| {
                    let result = {
                        let mut this = unsafe { receiver_mut::<T>(stack, 1) }?;
                        let mut slot: c_int = 1;
                        $(
                            slot += 1;
                            let ($a, $g) = unsafe { <$A as Argument<$K>>::take(stack, slot) }?;
                        )*
                        call(&f, &mut *this $(, unsafe { <$A as Argument<$K>>::view($a) })*)
                    };
                    result.into_results(stack)
                })
            }
        }
    };
}

impl_method!();
impl_method!(A1 K1 a1 _g1);
impl_method!(A1 K1 a1 _g1, A2 K2 a2 _g2);
impl_method!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3);
impl_method!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4);
impl_method!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5);
impl_method!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6);
impl_method!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7);
impl_method!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7,
    A8 K8 a8 _g8
);

/// The mirrored half of a commutative operator: `(O, T)` calling `f(&T, O)`.
pub(crate) fn reversed<T, O, F, R>(f: Rc<F>) -> Candidate
where
    T: UserType,
    O: Get + 'static,
    F: Fn(&T, O) -> R + 'static,
    R: IntoResults,
{
    Candidate::new(vec![Param::of::<O>(), Param::receiver::<T>()], move |stack| {
        let other = argument::<O>(stack, 1)?;
        let result = {
            let this = unsafe { receiver::<T>(stack, 2) }?;
            f(&*this, other)
        };
        result.into_results(stack)
    })
}
