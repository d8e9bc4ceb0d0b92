//! Thin typed access to a runtime value stack.
//!
//! [`Stack`] is a copyable handle to a `lua_State`. It carries no ownership:
//! the [`Context`](../../luabind/struct.Context.html) that created the state
//! outlives every `Stack` handed out while it runs. All raw API calls made by
//! the binding layer go through here or through the codec.
//!
//! Indices follow runtime conventions: positive indices count from the bottom
//! of the current frame starting at 1, negative indices count from the top.

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::ptr::{self, NonNull};

use mlua::ffi::{self, lua_State};

use crate::convert::{Get, Push};
use crate::error::{Error, LoadError, Result, RuntimeError};
use crate::lua_type::LuaType;
use crate::raise;
use crate::usertype::TypeRegistry;

/// A key into the runtime registry table, identified by its address.
pub struct RegistryKey(u8);

impl RegistryKey {
    pub const fn new() -> Self {
        RegistryKey(0)
    }

    pub(crate) fn as_ptr(&'static self) -> *const c_void {
        &self.0 as *const u8 as *const c_void
    }
}

/// Points at the [`TypeRegistry`] serving this state.
pub static TYPES_KEY: RegistryKey = RegistryKey::new();
/// Table of usertype metatables, indexed by `type index + 1`.
pub static METATABLES_KEY: RegistryKey = RegistryKey::new();

/// A copyable handle to a runtime value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    state: NonNull<lua_State>,
}

impl Stack {
    /// Wrap a raw state.
    ///
    /// # Safety
    ///
    /// `state` must be a non-null, open `lua_State` that stays open for as
    /// long as this handle (or any copy of it) is used, and it must only be
    /// used from the thread that owns the state.
    pub unsafe fn from_raw(state: *mut lua_State) -> Self {
        Self {
            state: unsafe { NonNull::new_unchecked(state) },
        }
    }

    pub fn as_ptr(self) -> *mut lua_State {
        self.state.as_ptr()
    }

    // ========================================================================
    // Depth management
    // ========================================================================

    pub fn top(self) -> c_int {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    pub fn set_top(self, top: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), top) }
    }

    pub fn pop(self, count: c_int) {
        if count > 0 {
            unsafe { ffi::lua_pop(self.as_ptr(), count) }
        }
    }

    pub fn abs_index(self, index: c_int) -> c_int {
        unsafe { ffi::lua_absindex(self.as_ptr(), index) }
    }

    /// Make room for `extra` more values.
    pub fn reserve(self, extra: usize) -> Result<()> {
        let requested = c_int::try_from(extra).unwrap_or(c_int::MAX);
        if unsafe { ffi::lua_checkstack(self.as_ptr(), requested) } != 0 {
            Ok(())
        } else {
            Err(RuntimeError::StackExhausted { needed: extra }.into())
        }
    }

    /// Restore the current depth when the guard is dropped.
    pub fn guard(self) -> StackGuard {
        StackGuard::new(self)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn type_of(self, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    pub fn type_name(self, index: c_int) -> &'static str {
        self.type_of(index).name()
    }

    pub fn is_nil_or_none(self, index: c_int) -> bool {
        matches!(self.type_of(index), LuaType::Nil | LuaType::None)
    }

    /// Raw length of a table, string or userdata block.
    pub fn raw_len(self, index: c_int) -> usize {
        unsafe { ffi::lua_rawlen(self.as_ptr(), index) as usize }
    }

    /// Borrow the bytes of a string value.
    ///
    /// # Safety
    ///
    /// The value at `index` must be a string, and it must stay on the stack
    /// while the returned slice is alive.
    pub unsafe fn string_bytes<'a>(self, index: c_int) -> &'a [u8] {
        let mut len = 0usize;
        let data = unsafe { ffi::lua_tolstring(self.as_ptr(), index, &mut len) };
        if data.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(data as *const u8, len) }
        }
    }

    /// Compare two values without invoking metamethods.
    pub fn raw_equal(self, a: c_int, b: c_int) -> bool {
        unsafe { ffi::lua_rawequal(self.as_ptr(), a, b) != 0 }
    }

    // ========================================================================
    // Primitive pushes
    // ========================================================================

    pub fn push_nil(self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) }
    }

    pub fn push_value(self, index: c_int) {
        unsafe { ffi::lua_pushvalue(self.as_ptr(), index) }
    }

    /// Push a byte string by length, embedded NULs included.
    pub fn push_bytes(self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.as_ptr(), bytes.as_ptr() as *const _, bytes.len());
        }
    }

    pub fn push_str(self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    /// Push the globals table.
    pub fn push_globals(self) {
        unsafe {
            ffi::lua_rawgeti(
                self.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
        }
    }

    pub fn new_table(self, array: usize, records: usize) {
        let array = c_int::try_from(array).unwrap_or(c_int::MAX);
        let records = c_int::try_from(records).unwrap_or(c_int::MAX);
        unsafe { ffi::lua_createtable(self.as_ptr(), array, records) }
    }

    /// `t[key] = v` where `t` is at `table` and `v` is on top; pops `v`.
    pub fn raw_set_field(self, table: c_int, key: &str) {
        let table = self.abs_index(table);
        self.push_str(key);
        unsafe {
            ffi::lua_rotate(self.as_ptr(), -2, 1);
            ffi::lua_rawset(self.as_ptr(), table);
        }
    }

    /// Push `t[key]` without metamethods.
    pub fn raw_get_field(self, table: c_int, key: &str) -> LuaType {
        let table = self.abs_index(table);
        self.push_str(key);
        LuaType::from_raw(unsafe { ffi::lua_rawget(self.as_ptr(), table) })
    }

    // ========================================================================
    // Codec entry points
    // ========================================================================

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn push<T: Push>(self, value: T) -> Result<()> {
        value.push(self)
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn get<T: Get>(self, index: c_int) -> Result<T> {
        T::get(self, index)
    }

    pub fn check<T: Get>(self, index: c_int) -> bool {
        T::check(self, index)
    }

    // ========================================================================
    // Registry slots
    // ========================================================================

    /// Store a light pointer in the registry.
    ///
    /// # Safety
    ///
    /// Whoever reads the slot back relies on `ptr` staying valid for the life
    /// of the state.
    pub unsafe fn set_registry_pointer(self, key: &'static RegistryKey, ptr: *const c_void) {
        unsafe {
            ffi::lua_pushlightuserdata(self.as_ptr(), ptr as *mut c_void);
            ffi::lua_rawsetp(self.as_ptr(), ffi::LUA_REGISTRYINDEX, key.as_ptr());
        }
    }

    /// Read a light pointer from the registry, null if unset.
    pub fn registry_pointer(self, key: &'static RegistryKey) -> *const c_void {
        unsafe {
            ffi::lua_rawgetp(self.as_ptr(), ffi::LUA_REGISTRYINDEX, key.as_ptr());
            let ptr = ffi::lua_touserdata(self.as_ptr(), -1);
            ffi::lua_pop(self.as_ptr(), 1);
            ptr as *const c_void
        }
    }

    /// Push the registry table stored under `key`, creating it on first use.
    pub fn push_registry_table(self, key: &'static RegistryKey) {
        unsafe {
            let state = self.as_ptr();
            if ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, key.as_ptr()) != ffi::LUA_TTABLE {
                ffi::lua_pop(state, 1);
                ffi::lua_createtable(state, 0, 0);
                ffi::lua_pushvalue(state, -1);
                ffi::lua_rawsetp(state, ffi::LUA_REGISTRYINDEX, key.as_ptr());
            }
        }
    }

    /// The usertype registry attached to this state, if any.
    pub fn types<'a>(self) -> Option<&'a TypeRegistry> {
        let ptr = self.registry_pointer(&TYPES_KEY) as *const TypeRegistry;
        // The owning context keeps the registry alive until after the state closes.
        unsafe { ptr.as_ref() }
    }

    // ========================================================================
    // Protected operations
    // ========================================================================

    /// Call the function below `nargs` arguments in protected mode.
    ///
    /// On success `nresults` values replace the function and its arguments.
    /// On failure the function, arguments and error object are all removed.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn pcall(self, nargs: c_int, nresults: c_int) -> Result<()> {
        let status = unsafe { ffi::lua_pcall(self.as_ptr(), nargs, nresults, 0) };
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let error = raise::take_error(self, -1, status);
        self.pop(1);
        Err(error)
    }

    /// Push `container[key]`, running `__index` metamethods in protected mode.
    pub fn get_field_protected(self, container: c_int, key: &str) -> Result<LuaType> {
        let container = self.abs_index(container);
        self.reserve(3)?;
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), protected_index);
        }
        self.push_value(container);
        self.push_str(key);
        self.pcall(2, 1)?;
        Ok(self.type_of(-1))
    }

    /// Compile a chunk and push it as a function.
    pub fn load_buffer(self, source: &[u8], chunk_name: &str) -> Result<()> {
        self.reserve(1)?;
        let name = CString::new(chunk_name.replace('\0', "?")).unwrap_or_default();
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                source.as_ptr() as *const _,
                source.len(),
                name.as_ptr(),
                ptr::null(),
            )
        };
        match status {
            ffi::LUA_OK => Ok(()),
            ffi::LUA_ERRMEM => {
                self.pop(1);
                Err(LoadError::Memory.into())
            }
            _ => {
                let message = raise::message_at(self, -1);
                self.pop(1);
                Err(LoadError::Syntax { message }.into())
            }
        }
    }

    /// Run a full garbage collection cycle.
    pub fn collect_garbage(self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOLLECT, 0);
        }
    }

    /// Raise `error` inside the runtime. Only valid inside a C function frame.
    ///
    /// # Safety
    ///
    /// Must be called from a function the runtime invoked, with no live
    /// values that need dropping in the Rust frames between here and the
    /// runtime.
    pub unsafe fn raise(self, error: Error) -> c_int {
        unsafe { raise::raise(self, error) }
    }
}

unsafe extern "C-unwind" fn protected_index(state: *mut lua_State) -> c_int {
    unsafe {
        ffi::lua_gettable(state, 1);
    }
    1
}

// ============================================================================
// Stack Guard
// ============================================================================

/// Restores the stack depth recorded at creation when dropped.
///
/// Decoding compound values pushes intermediate values; the guard keeps the
/// stack balanced on every exit path, including early `?` returns.
#[derive(Debug)]
#[must_use = "the guard restores the stack only while it is alive"]
pub struct StackGuard {
    stack: Stack,
    top: c_int,
}

impl StackGuard {
    pub fn new(stack: Stack) -> Self {
        Self {
            stack,
            top: stack.top(),
        }
    }

    /// The depth that will be restored.
    pub fn top(&self) -> c_int {
        self.top
    }

    /// Keep the `count` topmost values: they end up directly above the recorded depth.
    pub fn keep(self, count: c_int) {
        let stack = self.stack;
        let current = stack.top();
        let target = self.top + count;
        if current > target {
            for i in 0..count {
                unsafe {
                    ffi::lua_copy(stack.as_ptr(), current - count + 1 + i, self.top + 1 + i);
                }
            }
        }
        let top = self.top;
        std::mem::forget(self);
        stack.set_top(top + count);
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        if self.stack.top() != self.top {
            self.stack.set_top(self.top);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_state {
    use super::*;

    /// A bare state for codec tests; closed on drop.
    pub struct TestState {
        pub stack: Stack,
    }

    impl TestState {
        pub fn new() -> Self {
            unsafe {
                let state = ffi::luaL_newstate();
                ffi::luaL_openlibs(state);
                Self {
                    stack: Stack::from_raw(state),
                }
            }
        }

        pub fn run(&self, code: &str) {
            self.stack.load_buffer(code.as_bytes(), "=test").unwrap();
            self.stack.pcall(0, 0).unwrap();
        }

        pub fn eval(&self, expr: &str) {
            let code = format!("return {expr}");
            self.stack.load_buffer(code.as_bytes(), "=test").unwrap();
            self.stack.pcall(0, 1).unwrap();
        }
    }

    impl Drop for TestState {
        fn drop(&mut self) {
            unsafe { ffi::lua_close(self.stack.as_ptr()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_state::TestState;
    use super::*;

    #[test]
    fn guard_restores_depth() {
        let lua = TestState::new();
        let stack = lua.stack;
        {
            let _guard = stack.guard();
            stack.push_nil();
            stack.push_str("x");
            assert_eq!(stack.top(), 2);
        }
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn guard_keep_moves_results_down() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.push_str("base");
        let guard = stack.guard();
        stack.push_nil();
        stack.push_nil();
        stack.push_str("result");
        guard.keep(1);
        assert_eq!(stack.top(), 2);
        assert_eq!(stack.get::<String>(-1).unwrap(), "result");
        assert_eq!(stack.get::<String>(1).unwrap(), "base");
    }

    #[test]
    fn raw_field_helpers() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.new_table(0, 1);
        stack.push_str("value");
        stack.raw_set_field(-2, "key");
        assert_eq!(stack.raw_get_field(-1, "key"), LuaType::String);
        assert_eq!(stack.get::<String>(-1).unwrap(), "value");
        stack.pop(2);
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn protected_index_reports_errors() {
        let lua = TestState::new();
        let stack = lua.stack;
        lua.run("boom = setmetatable({}, { __index = function() error('nope') end })");
        stack.push_globals();
        assert_eq!(stack.get_field_protected(-1, "boom").unwrap(), LuaType::Table);
        let err = stack.get_field_protected(-1, "anything").unwrap_err();
        assert!(err.is_runtime());
        assert_eq!(stack.top(), 2);
    }

    #[test]
    fn syntax_errors_are_load_errors() {
        let lua = TestState::new();
        let err = lua.stack.load_buffer(b"function (", "=bad").unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::Syntax { .. })));
        assert_eq!(lua.stack.top(), 0);
    }

    #[test]
    fn pcall_maps_script_errors() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.load_buffer(b"error('bad thing', 0)", "=t").unwrap();
        let err = stack.pcall(0, 0).unwrap_err();
        assert_eq!(
            err,
            Error::Runtime(RuntimeError::Script {
                message: "bad thing".into()
            })
        );
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn registry_tables_are_created_once() {
        let lua = TestState::new();
        let stack = lua.stack;
        static KEY: RegistryKey = RegistryKey::new();
        stack.push_registry_table(&KEY);
        stack.push_registry_table(&KEY);
        assert!(stack.raw_equal(-1, -2));
        stack.pop(2);
        assert!(stack.types().is_none());
    }
}
