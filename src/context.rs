//! The host-facing binding context.
//!
//! A `Context` owns one runtime state together with the tables the binding
//! layer hangs off it: the usertype registry and the native function table.
//! Everything a host does with scripts goes through it.
//!
//! # Example
//!
//! ```
//! use luabind::{Context, Overloads};
//!
//! let ctx = Context::new().unwrap();
//! ctx.provide("glob", 200).unwrap();
//! ctx.provide_fn("math2.hypot", |a: f64, b: f64| a.hypot(b)).unwrap();
//! ctx.provide_overloads(
//!     "describe",
//!     Overloads::new()
//!         .with(|| "nothing".to_owned())
//!         .with(|n: f64| format!("number {n}")),
//! )
//! .unwrap();
//!
//! ctx.load_and_call("r = math2.hypot(3, 4) .. ' ' .. describe(glob)").unwrap();
//! assert_eq!(ctx.extract::<String>("r").unwrap(), "5.0 number 200");
//! ```
//!
//! # Stack discipline
//!
//! Every operation except [`push`](Context::push), [`pop`](Context::pop) and
//! [`load`](Context::load) leaves the stack as it found it, on success and on
//! failure.

use std::fmt;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::NonNull;

use luabind_core::ffi::{self, lua_State};
use luabind_core::stack::TYPES_KEY;
use luabind_core::usertype::{self, create_metatable, push_metatable};
use luabind_core::{
    FromResults, Get, IntoPath, IntoResults, LoadError, MemberTable, NamePath, Push, PushArgs,
    RegistrationError, Result, Stack, TypeRegistry, UserType,
};

use crate::binding;
use crate::function::trampoline::FunctionTable;
use crate::function::{Function, Method, MethodMut, NativeFunction, Overloads};
use crate::script_fn::ScriptFn;

/// Options applied when the state is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Open the standard libraries (`string`, `table`, `math`, `io`, ...).
    pub open_std_libs: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self { open_std_libs: true }
    }
}

/// A runtime state plus the native bindings installed into it.
///
/// The context is single-threaded: it is neither `Send` nor `Sync`, and
/// everything reachable from it (functions, usertype blocks, script
/// handles) belongs to the thread that created it.
pub struct Context {
    state: NonNull<lua_State>,
    // Both are pointed at from the state's registry; boxed so the pointers
    // stay put, and dropped only after `lua_close` in `Drop`.
    types: Box<TypeRegistry>,
    functions: Box<FunctionTable>,
}

impl Context {
    /// Create a context with the standard libraries and no usertypes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::StateCreation`] if the runtime cannot
    /// allocate a new state.
    pub fn new() -> Result<Self> {
        Self::with_options(TypeRegistry::new(), ContextOptions::default())
    }

    /// Create a context that knows the usertypes in `types`.
    pub fn with_types(types: TypeRegistry) -> Result<Self> {
        Self::with_options(types, ContextOptions::default())
    }

    /// Create a context with explicit options.
    ///
    /// Every usertype in `types` gets its metatable here. Types whose script
    /// name is not shadowed also have it published at that name.
    pub fn with_options(types: TypeRegistry, options: ContextOptions) -> Result<Self> {
        let state = NonNull::new(unsafe { ffi::luaL_newstate() }).ok_or(RegistrationError::StateCreation)?;
        let context = Self {
            state,
            types: Box::new(types),
            functions: Box::new(FunctionTable::default()),
        };

        let stack = context.stack();
        if options.open_std_libs {
            unsafe { ffi::luaL_openlibs(state.as_ptr()) };
        }
        unsafe {
            stack.set_registry_pointer(&TYPES_KEY, &*context.types as *const TypeRegistry as *const c_void);
            context.functions.attach(stack);
        }

        context.install_usertypes()?;
        log::debug!(
            "created context with {} usertypes (std libs: {})",
            context.types.len(),
            options.open_std_libs
        );
        Ok(context)
    }

    fn install_usertypes(&self) -> Result<()> {
        let stack = self.stack();
        for descriptor in self.types.iter() {
            let guard = stack.guard();
            create_metatable(stack, descriptor)?;
            if !descriptor.is_shadowed() {
                let path = NamePath::parse(descriptor.name())?;
                let metatable = stack.top();
                binding::set_path(stack, &path, |s| {
                    s.push_value(metatable);
                    Ok(())
                })?;
            }
            drop(guard);
        }
        Ok(())
    }

    /// The stack of the main thread.
    pub fn stack(&self) -> Stack {
        // The state stays open until `self` is dropped.
        unsafe { Stack::from_raw(self.state.as_ptr()) }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Number of native function values not yet collected.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    // ========================================================================
    // Providing values to scripts
    // ========================================================================

    /// Store `value` at `path`, creating intermediate tables as needed.
    ///
    /// Intermediate segments that hold something other than a table are
    /// replaced by a fresh table, with a warning.
    ///
    /// # Errors
    ///
    /// - [`AccessError::InvalidName`](luabind_core::AccessError::InvalidName) for a malformed path.
    /// - Any error from pushing `value`.
    pub fn provide<P: IntoPath, T: Push>(&self, path: P, value: T) -> Result<()> {
        let path = path.into_path()?;
        log::trace!("providing '{}'", path);
        binding::set_path(self.stack(), &path, |stack| value.push(stack))
    }

    /// Wrap `f` and store it at `path`.
    pub fn provide_fn<P: IntoPath, M>(&self, path: P, f: impl NativeFunction<M>) -> Result<()> {
        let path = path.into_path()?;
        let function = Function::new(path.as_str(), f);
        self.provide(path, function)
    }

    /// Store an overload set at `path`.
    ///
    /// # Errors
    ///
    /// See [`Function::overloaded`].
    pub fn provide_overloads<P: IntoPath>(&self, path: P, overloads: Overloads) -> Result<()> {
        let path = path.into_path()?;
        let function = Function::overloaded(path.as_str(), overloads)?;
        self.provide(path, function)
    }

    /// Store `value` in `T`'s metatable under `name`.
    ///
    /// For a type whose metatable is published this is the same as
    /// `provide("<T::NAME>.<name>", value)`; shadowed types receive it too.
    pub fn provide_member<T: UserType, V: Push>(&self, name: &str, value: V) -> Result<()> {
        let path = NamePath::parse(name)?;
        let index = self.type_index::<T>()?;
        let stack = self.stack();
        let guard = stack.guard();
        push_metatable(stack, index)?;
        let metatable = stack.top();
        binding::set_path_in(stack, metatable, &path, |stack| value.push(stack))?;
        drop(guard);
        Ok(())
    }

    /// Wrap `f` and store it in `T`'s metatable under `name`.
    pub fn provide_member_fn<T: UserType, M>(&self, name: &str, f: impl NativeFunction<M>) -> Result<()> {
        self.provide_member::<T, _>(name, Function::new(member_name::<T>(name), f))
    }

    /// Store an overload set in `T`'s metatable under `name`.
    pub fn provide_member_overloads<T: UserType>(&self, name: &str, overloads: Overloads) -> Result<()> {
        let function = Function::overloaded(member_name::<T>(name), overloads)?;
        self.provide_member::<T, _>(name, function)
    }

    /// Store a method taking `&T` as its receiver.
    ///
    /// ```
    /// use luabind::{Context, TypeRegistry, Usertype};
    ///
    /// #[derive(Usertype, Clone)]
    /// #[usertype(name = "counter", clone)]
    /// struct Counter {
    ///     hits: u32,
    /// }
    ///
    /// let ctx = Context::with_types(TypeRegistry::new().with::<Counter>()).unwrap();
    /// ctx.provide_method::<Counter, _, _>("total", |c: &Counter| c.hits).unwrap();
    /// ctx.provide_method_mut::<Counter, _, _>("hit", |c: &mut Counter, n: u32| c.hits += n)
    ///     .unwrap();
    /// ctx.provide("c", Counter { hits: 1 }).unwrap();
    ///
    /// ctx.load_and_call("c:hit(2); total = c:total()").unwrap();
    /// assert_eq!(ctx.extract::<u32>("total").unwrap(), 3);
    /// ```
    pub fn provide_method<T, F, M>(&self, name: &str, f: F) -> Result<()>
    where
        T: UserType,
        Method<T, F>: NativeFunction<M>,
    {
        self.provide_member_fn::<T, M>(name, Method::<T, F>::new(f))
    }

    /// Store a method taking `&mut T` as its receiver.
    pub fn provide_method_mut<T, F, M>(&self, name: &str, f: F) -> Result<()>
    where
        T: UserType,
        MethodMut<T, F>: NativeFunction<M>,
    {
        self.provide_member_fn::<T, M>(name, MethodMut::<T, F>::new(f))
    }

    /// Store a binary operator that works with `T` on either side.
    ///
    /// `name` is usually a metamethod such as `__mul`. Combine several with
    /// [`Overloads::commutative`] and
    /// [`provide_member_overloads`](Self::provide_member_overloads).
    pub fn provide_commutative_op<T, O, F, R>(&self, name: &str, f: F) -> Result<()>
    where
        T: UserType,
        O: Get + 'static,
        F: Fn(&T, O) -> R + 'static,
        R: IntoResults,
    {
        self.provide_member_overloads::<T>(name, Overloads::new().commutative(f))
    }

    /// Install `table` as `T`'s field table, replacing the one from
    /// [`UserType::members`].
    pub fn set_member_table<T: UserType>(&self, table: MemberTable<T>) -> Result<()> {
        let index = self.type_index::<T>()?;
        let stack = self.stack();
        let guard = stack.guard();
        push_metatable(stack, index)?;
        table.install(stack, -1)?;
        drop(guard);
        Ok(())
    }

    fn type_index<T: UserType>(&self) -> Result<usize> {
        self.types.index_of::<T>().ok_or_else(|| {
            RegistrationError::NotRegistered {
                type_name: std::any::type_name::<T>(),
            }
            .into()
        })
    }

    // ========================================================================
    // Extracting values from scripts
    // ========================================================================

    /// Read the value at `path` as a `T`.
    ///
    /// # Errors
    ///
    /// - [`AccessError`](luabind_core::AccessError) when an intermediate
    ///   segment is missing or cannot be indexed.
    /// - [`CastError`](luabind_core::CastError) when the value is not a `T`.
    ///   A missing final segment reads as nil.
    pub fn extract<T: Get>(&self, path: impl IntoPath) -> Result<T> {
        let path = path.into_path()?;
        let stack = self.stack();
        let guard = stack.guard();
        binding::push_path(stack, &path)?;
        let value = T::get(stack, -1).map_err(|e| e.with_context(format!("global '{path}'")));
        drop(guard);
        value
    }

    /// A typed handle to the script function at `path`.
    pub fn extract_fn<Args, R>(&self, path: impl IntoPath) -> Result<ScriptFn<'_, Args, R>>
    where
        Args: PushArgs,
        R: FromResults,
    {
        ScriptFn::new(self, path.into_path()?)
    }

    // ========================================================================
    // Raw stack access
    // ========================================================================

    /// Push `value` and leave it on the stack.
    pub fn push<T: Push>(&self, value: T) -> Result<()> {
        let stack = self.stack();
        stack.reserve(1)?;
        stack.push(value)
    }

    pub fn get<T: Get>(&self, index: c_int) -> Result<T> {
        self.stack().get(index)
    }

    pub fn pop(&self, count: c_int) {
        self.stack().pop(count)
    }

    pub fn top(&self) -> c_int {
        self.stack().top()
    }

    /// Run `f` with a shared borrow of the `T` at `index`.
    pub fn with_user<T: UserType, R>(&self, index: c_int, f: impl FnOnce(&T) -> R) -> Result<R> {
        let stack = self.stack();
        let index = stack.abs_index(index);
        // `index` is a live slot; the borrow ends before this returns.
        let value = unsafe { usertype::borrow::<T>(stack, index) }?;
        Ok(f(&*value))
    }

    /// Run `f` with an exclusive borrow of the `T` at `index`.
    pub fn with_user_mut<T: UserType, R>(&self, index: c_int, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let stack = self.stack();
        let index = stack.abs_index(index);
        let mut value = unsafe { usertype::borrow_mut::<T>(stack, index) }?;
        Ok(f(&mut *value))
    }

    // ========================================================================
    // Loading code
    // ========================================================================

    /// Compile `code` and push it as a function.
    pub fn load(&self, code: &str) -> Result<()> {
        self.stack().load_buffer(code.as_bytes(), &chunk_name(code))
    }

    /// Compile and run `code`, discarding its results.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_and_call(&self, code: &str) -> Result<()> {
        let stack = self.stack();
        let guard = stack.guard();
        self.load(code)?;
        stack.pcall(0, 0)?;
        drop(guard);
        Ok(())
    }

    /// Compile the file at `path` and push it as a function.
    ///
    /// # Errors
    ///
    /// [`LoadError::File`] if the file cannot be read.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|err| LoadError::File {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        self.stack().load_buffer(&source, &format!("@{}", path.display()))
    }

    /// Compile and run the file at `path`, discarding its results.
    pub fn load_file_and_call(&self, path: impl AsRef<Path>) -> Result<()> {
        let stack = self.stack();
        let guard = stack.guard();
        self.load_file(path)?;
        stack.pcall(0, 0)?;
        drop(guard);
        Ok(())
    }

    /// Run a full garbage collection cycle.
    pub fn collect_garbage(&self) {
        self.stack().collect_garbage();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("types", &self.types)
            .field("functions", &self.functions.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Finalizers and function slots may still refer to `types` and
        // `functions`; close first so they run while both are alive.
        unsafe { ffi::lua_close(self.state.as_ptr()) }
        log::debug!("closed context");
    }
}

fn member_name<T: UserType>(name: &str) -> String {
    format!("{}.{}", T::NAME, name)
}

/// Chunk names show up in error messages: `[string "first line..."]`.
fn chunk_name(code: &str) -> String {
    let first = code.lines().next().unwrap_or_default();
    if first.len() < code.len() || first.len() > 40 {
        let mut end = first.len().min(40);
        while !first.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &first[..end])
    } else {
        first.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luabind_core::{CallError, Error};

    #[test]
    fn contexts_start_with_std_libs_by_default() {
        let ctx = Context::new().unwrap();
        ctx.load_and_call("s = string.upper('x')").unwrap();
        assert_eq!(ctx.extract::<String>("s").unwrap(), "X");

        let bare = Context::with_options(TypeRegistry::new(), ContextOptions { open_std_libs: false }).unwrap();
        assert!(bare.load_and_call("s = string.upper('x')").is_err());
    }

    #[test]
    fn operations_are_stack_neutral() {
        let ctx = Context::new().unwrap();
        ctx.provide("a.b.c", 1).unwrap();
        assert!(ctx.provide("bad..path", 1).is_err());
        assert!(ctx.extract::<i32>("a.b.c").is_ok());
        assert!(ctx.extract::<String>("a.b.c").is_err());
        assert!(ctx.extract::<i32>("a.x.c").is_err());
        assert!(ctx.load_and_call("error('x')").is_err());
        assert!(ctx.load_and_call("this is not code").is_err());
        assert_eq!(ctx.top(), 0);
    }

    #[test]
    fn push_and_pop_move_the_top() {
        let ctx = Context::new().unwrap();
        ctx.push(5).unwrap();
        ctx.push("six").unwrap();
        assert_eq!(ctx.top(), 2);
        assert_eq!(ctx.get::<i32>(1).unwrap(), 5);
        assert_eq!(ctx.get::<String>(-1).unwrap(), "six");
        ctx.pop(2);
        assert_eq!(ctx.top(), 0);
    }

    #[test]
    fn load_leaves_a_function() {
        let ctx = Context::new().unwrap();
        ctx.load("return 1").unwrap();
        assert_eq!(ctx.top(), 1);
        ctx.pop(1);
        assert!(matches!(ctx.load("return +").unwrap_err(), Error::Load(LoadError::Syntax { .. })));
        assert_eq!(ctx.top(), 0);
    }

    #[test]
    fn missing_files_are_load_errors() {
        let ctx = Context::new().unwrap();
        match ctx.load_file("/definitely/not/here.lua").unwrap_err() {
            Error::Load(LoadError::File { path, .. }) => assert_eq!(path, "/definitely/not/here.lua"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn native_errors_cross_script_frames_intact() {
        let ctx = Context::new().unwrap();
        ctx.provide_fn("three", |_: i32, _: i32, _: i32| ()).unwrap();
        let err = ctx.load_and_call("three(1)").unwrap_err();
        assert_eq!(
            err,
            CallError::ArityMismatch {
                called_with: 1,
                expected: 3
            }
            .into()
        );
    }

    #[test]
    fn chunk_names_are_shortened() {
        assert_eq!(chunk_name("x = 1"), "x = 1");
        assert_eq!(chunk_name("x = 1\ny = 2"), "x = 1...");
        assert_eq!(chunk_name(&"a".repeat(50)), format!("{}...", "a".repeat(40)));
    }
}
