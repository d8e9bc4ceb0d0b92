//! Native functions callable from scripts.
//!
//! Any closure or `fn` item whose parameters implement [`Argument`] and
//! whose return value implements [`IntoResults`] can become a [`Function`].
//! That covers every [`Get`] type, plus `&T`, `&mut T` and `Option<&T>` for
//! registered usertypes:
//!
//! ```
//! use luabind::{Function, Overloads};
//!
//! let add = Function::new("add", |a: i64, b: i64| a + b);
//! assert_eq!(add.name(), "add");
//!
//! let describe = Function::overloaded(
//!     "describe",
//!     Overloads::new()
//!         .with(|| "nothing".to_owned())
//!         .with(|n: f64| format!("number {n}"))
//!         .with(|s: String| format!("string {s}")),
//! )
//! .unwrap();
//! assert_eq!(describe.candidate_count(), 3);
//! ```
//!
//! Functions are pushed like any other value. Each push leaves a C closure
//! whose only upvalue is a userdata owning the wrapped callable; collecting
//! the closure drops it.

use std::any::{TypeId, type_name};
use std::fmt;
use std::os::raw::c_int;
use std::rc::Rc;

use luabind_core::usertype::{self, check_usertype};
use luabind_core::{Get, IntoResults, OrderedFloat, Push, Result, Shape, Stack, UserType};

mod argument;
mod dispatch;
mod method;
pub(crate) mod trampoline;

pub use argument::{Argument, ByMut, ByOptionalRef, ByRef, ByValue};
pub use dispatch::Dispatcher;
pub use method::{Method, MethodMut, Receiver, ReceiverMut};

// ============================================================================
// Parameters and candidates
// ============================================================================

/// One declared parameter of a candidate.
#[derive(Clone)]
pub struct Param {
    type_id: TypeId,
    type_name: &'static str,
    shape: Shape,
    numeric: Option<Numeric>,
    check: fn(Stack, c_int) -> bool,
}

impl Param {
    /// A parameter decoded through `T`'s [`Get`] implementation.
    pub fn of<T: Get + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            shape: T::shape(),
            numeric: Numeric::of::<T>(),
            check: T::check,
        }
    }

    /// A live `T` block, borrowed rather than decoded.
    pub fn receiver<T: UserType>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            shape: Shape::Usertype(T::NAME),
            numeric: None,
            check: check_usertype::<T>,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn accepts(&self, stack: Stack, index: c_int) -> bool {
        (self.check)(stack, index)
    }

    /// Whether this parameter accepts every value `other` accepts.
    pub(crate) fn covers(&self, other: &Param) -> bool {
        if self.type_id == other.type_id {
            return true;
        }
        match (self.numeric, other.numeric) {
            (Some(wide), Some(narrow)) => wide.covers(narrow),
            _ => self.shape.covers(&other.shape),
        }
    }
}

/// What a number parameter accepts, finer than its [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Numeric {
    /// Integer-valued numbers in `min..=max`.
    Integer { min: i64, max: i64 },
    /// Numbers in `f32` range; every integer fits.
    Single,
    /// Any number.
    Double,
}

impl Numeric {
    fn of<T: 'static>() -> Option<Self> {
        let id = TypeId::of::<T>();
        // Unsigned 64-bit types read negative integers as their two's complement.
        let word = if usize::BITS >= 64 {
            (i64::MIN, i64::MAX)
        } else {
            (0, usize::MAX as i64)
        };
        let integers = [
            (TypeId::of::<i8>(), i64::from(i8::MIN), i64::from(i8::MAX)),
            (TypeId::of::<i16>(), i64::from(i16::MIN), i64::from(i16::MAX)),
            (TypeId::of::<i32>(), i64::from(i32::MIN), i64::from(i32::MAX)),
            (TypeId::of::<i64>(), i64::MIN, i64::MAX),
            (TypeId::of::<isize>(), isize::MIN as i64, isize::MAX as i64),
            (TypeId::of::<u8>(), 0, i64::from(u8::MAX)),
            (TypeId::of::<u16>(), 0, i64::from(u16::MAX)),
            (TypeId::of::<u32>(), 0, i64::from(u32::MAX)),
            (TypeId::of::<u64>(), i64::MIN, i64::MAX),
            (TypeId::of::<usize>(), word.0, word.1),
        ];
        if let Some(&(_, min, max)) = integers.iter().find(|(candidate, ..)| *candidate == id) {
            return Some(Numeric::Integer { min, max });
        }
        if id == TypeId::of::<f32>() {
            Some(Numeric::Single)
        } else if id == TypeId::of::<f64>() || id == TypeId::of::<OrderedFloat<f64>>() {
            Some(Numeric::Double)
        } else {
            None
        }
    }

    fn covers(self, other: Numeric) -> bool {
        match (self, other) {
            (Numeric::Double, _) => true,
            (Numeric::Single, Numeric::Integer { .. } | Numeric::Single) => true,
            (Numeric::Integer { min, max }, Numeric::Integer { min: lo, max: hi }) => min <= lo && hi <= max,
            _ => false,
        }
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("type_name", &self.type_name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

type Invoke = Box<dyn Fn(Stack) -> Result<c_int>>;

/// A single callable with a fixed parameter list.
pub struct Candidate {
    params: Vec<Param>,
    invoke: Invoke,
}

impl Candidate {
    /// Wrap a raw invoker.
    ///
    /// `invoke` runs with the call's arguments at stack indices `1..=arity`
    /// and returns the number of results it pushed.
    pub fn new(params: Vec<Param>, invoke: impl Fn(Stack) -> Result<c_int> + 'static) -> Self {
        Self {
            params,
            invoke: Box::new(invoke),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Parameter shapes, e.g. `(string, number, string)`.
    pub fn signature(&self) -> String {
        Shape::Tuple(self.params.iter().map(|p| p.shape.clone()).collect()).to_string()
    }

    pub(crate) fn invoke(&self, stack: Stack) -> Result<c_int> {
        (self.invoke)(stack)
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("signature", &self.signature())
            .finish_non_exhaustive()
    }
}

/// Decode argument `index`, tagging cast failures with their position.
pub(crate) fn argument<T: Get>(stack: Stack, index: c_int) -> Result<T> {
    T::get(stack, index).map_err(|e| e.with_context(format!("argument #{index}")))
}

// ============================================================================
// Native function adapters
// ============================================================================

/// A native callable that can become a [`Candidate`].
///
/// `Marker` only exists to keep the implementations for different arities
/// apart; it is always inferred.
pub trait NativeFunction<Marker>: 'static {
    fn into_candidate(self) -> Candidate;
}

// Arguments are taken left to right. Borrow guards live until the callable
// returns, and an early `?` releases the ones already taken.
macro_rules! impl_native_function {
    ($($A:ident $K:ident $a:ident $g:ident),*) => {
        impl<Func, Ret, $($A, $K,)*> NativeFunction<fn($(($A, $K),)*) -> Ret> for Func
        where
            Func: Fn($($A),*) -> Ret + for<'a> Fn($(<$A as Argument<$K>>::Out<'a>),*) -> Ret + 'static,
            Ret: IntoResults,
            $($A: Argument<$K>,)*
        {
            #[allow(unused_variables, unused_mut, unused_assignments, non_snake_case)]
            fn into_candidate(self) -> Candidate {
                // Pins the call to the higher-ranked signature.
                fn call<Ret, $($A,)*>(f: &impl Fn($($A),*) -> Ret, $($a: $A,)*) -> Ret {
                    f($($a),*)
                }

                Candidate::new(vec![$(<$A as Argument<$K>>::param()),*], move |stack| {
                    let result = {
                        let mut slot: c_int = 0;
                        $(
                            slot += 1;
                            let ($a, $g) = unsafe { <$A as Argument<$K>>::take(stack, slot) }?;
                        )*
                        call(&self, $(unsafe { <$A as Argument<$K>>::view($a) }),*)
                    };
                    result.into_results(stack)
                })
            }
        }
    };
}

impl_native_function!();
impl_native_function!(A1 K1 a1 _g1);
impl_native_function!(A1 K1 a1 _g1, A2 K2 a2 _g2);
impl_native_function!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3);
impl_native_function!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4);
impl_native_function!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5);
impl_native_function!(A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6);
impl_native_function!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7
);
impl_native_function!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7,
    A8 K8 a8 _g8
);
impl_native_function!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7,
    A8 K8 a8 _g8, A9 K9 a9 _g9
);
impl_native_function!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7,
    A8 K8 a8 _g8, A9 K9 a9 _g9, A10 K10 a10 _g10
);
impl_native_function!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7,
    A8 K8 a8 _g8, A9 K9 a9 _g9, A10 K10 a10 _g10, A11 K11 a11 _g11
);
impl_native_function!(
    A1 K1 a1 _g1, A2 K2 a2 _g2, A3 K3 a3 _g3, A4 K4 a4 _g4, A5 K5 a5 _g5, A6 K6 a6 _g6, A7 K7 a7 _g7,
    A8 K8 a8 _g8, A9 K9 a9 _g9, A10 K10 a10 _g10, A11 K11 a11 _g11, A12 K12 a12 _g12
);

// ============================================================================
// Overload sets
// ============================================================================

/// An ordered list of candidates sharing one script name.
///
/// Declaration order is resolution order: the first candidate whose
/// parameters all accept the call's arguments wins.
#[derive(Debug, Default)]
pub struct Overloads {
    candidates: Vec<Candidate>,
}

impl Overloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate.
    pub fn with<M>(mut self, f: impl NativeFunction<M>) -> Self {
        self.candidates.push(f.into_candidate());
        self
    }

    /// Append a binary operator usable with the receiver on either side.
    ///
    /// Registers `(T, O)` and, unless `O` is `T` itself, the mirrored
    /// `(O, T)`, both calling `f` with the receiver first.
    pub fn commutative<T, O, F, R>(mut self, f: F) -> Self
    where
        T: UserType,
        O: Get + 'static,
        F: Fn(&T, O) -> R + 'static,
        R: IntoResults,
    {
        let f = Rc::new(f);
        let forward = Rc::clone(&f);
        self.candidates
            .push(Method::<T, _>::new(move |this: &T, other: O| forward(this, other)).into_candidate());
        if TypeId::of::<O>() != TypeId::of::<T>() {
            self.candidates.push(method::reversed::<T, O, F, R>(f));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

// ============================================================================
// Function
// ============================================================================

/// A wrapped native callable, ready to be pushed.
pub struct Function {
    dispatcher: Dispatcher,
}

impl Function {
    /// Wrap a single native callable.
    pub fn new<M>(name: impl Into<String>, f: impl NativeFunction<M>) -> Self {
        Self {
            dispatcher: Dispatcher::single(name.into(), f.into_candidate()),
        }
    }

    /// Wrap an overload set.
    ///
    /// # Errors
    ///
    /// - [`CallError::EmptyOverloadSet`](luabind_core::CallError::EmptyOverloadSet)
    ///   if `overloads` has no candidates.
    /// - [`CallError::ShadowedOverload`](luabind_core::CallError::ShadowedOverload)
    ///   if an earlier candidate accepts every call a later one would.
    pub fn overloaded(name: impl Into<String>, overloads: Overloads) -> Result<Self> {
        Ok(Self {
            dispatcher: Dispatcher::overloaded(name.into(), overloads.candidates)?,
        })
    }

    pub fn name(&self) -> &str {
        self.dispatcher.name()
    }

    pub fn candidate_count(&self) -> usize {
        self.dispatcher.len()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Function").field(&self.dispatcher).finish()
    }
}

impl Push for Function {
    fn push(self, stack: Stack) -> Result<()> {
        trampoline::push_dispatcher(stack, self.dispatcher)
    }
}

/// Borrow the receiver at `index` for the duration of a call.
///
/// # Safety
///
/// The value at `index` must stay on the stack while the borrow is alive.
pub(crate) unsafe fn receiver<'a, T: UserType>(stack: Stack, index: c_int) -> Result<usertype::UserRef<'a, T>> {
    unsafe { usertype::borrow::<T>(stack, index) }.map_err(|e| e.with_context(format!("argument #{index}")))
}

/// Mutable form of [`receiver`].
///
/// # Safety
///
/// See [`receiver`].
pub(crate) unsafe fn receiver_mut<'a, T: UserType>(
    stack: Stack,
    index: c_int,
) -> Result<usertype::UserMut<'a, T>> {
    unsafe { usertype::borrow_mut::<T>(stack, index) }.map_err(|e| e.with_context(format!("argument #{index}")))
}
