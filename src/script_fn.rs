//! Host-side handles to script functions.

use std::fmt;
use std::marker::PhantomData;

use luabind_core::ffi;
use luabind_core::{CastError, FromResults, LuaType, NamePath, PushArgs, Result, Shape, Stack};

use crate::binding;
use crate::context::Context;

/// A script function, called from native code with typed arguments and results.
///
/// The handle remembers the path, not the function: every call resolves the
/// path again, so reassigning the global from script is picked up. `Args` is
/// `()`, a tuple of values or a [`Variadic`](luabind_core::Variadic); `R` is
/// anything implementing [`FromResults`].
///
/// ```
/// use luabind::{Context, Multi};
///
/// let ctx = Context::new().unwrap();
/// ctx.load_and_call("function divmod(a, b) return a // b, a % b end").unwrap();
///
/// let divmod = ctx.extract_fn::<(i64, i64), Multi<(i64, i64)>>("divmod").unwrap();
/// assert_eq!(divmod.call((17, 5)).unwrap(), Multi((3, 2)));
/// ```
pub struct ScriptFn<'ctx, Args, R> {
    context: &'ctx Context,
    path: NamePath,
    _signature: PhantomData<fn(Args) -> R>,
}

impl<'ctx, Args, R> ScriptFn<'ctx, Args, R>
where
    Args: PushArgs,
    R: FromResults,
{
    /// Resolve `path` once to report bad paths early.
    pub(crate) fn new(context: &'ctx Context, path: NamePath) -> Result<Self> {
        let stack = context.stack();
        let guard = stack.guard();
        push_callable(stack, &path)?;
        drop(guard);
        Ok(Self {
            context,
            path,
            _signature: PhantomData,
        })
    }

    pub fn path(&self) -> &NamePath {
        &self.path
    }

    /// Call the function in protected mode.
    ///
    /// The stack is left as it was, whether the call succeeds or not.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, args: Args) -> Result<R> {
        let stack = self.context.stack();
        let guard = stack.guard();
        push_callable(stack, &self.path)?;
        let nargs = args.push_args(stack)?;
        stack.pcall(nargs, R::COUNT)?;
        R::from_results(stack, guard.top() + 1)
    }
}

impl<Args, R> fmt::Debug for ScriptFn<'_, Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFn").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Push the value at `path`, rejecting anything that cannot be called.
fn push_callable(stack: Stack, path: &NamePath) -> Result<()> {
    let found = binding::push_path(stack, path)?;
    if found == LuaType::Function || has_call_metamethod(stack) {
        return Ok(());
    }
    stack.pop(1);
    Err(CastError::new(Shape::Function, found.name())
        .with_context(format!("global '{path}'"))
        .into())
}

fn has_call_metamethod(stack: Stack) -> bool {
    unsafe {
        if ffi::luaL_getmetafield(stack.as_ptr(), -1, c"__call".as_ptr()) == ffi::LUA_TNIL {
            return false;
        }
        ffi::lua_pop(stack.as_ptr(), 1);
    }
    true
}
