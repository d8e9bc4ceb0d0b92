//! The C entry point shared by every native function.
//!
//! Each pushed closure carries one upvalue: a full userdata owning the
//! wrapped callable. The userdata's `__gc` drops it, so a function value the
//! script lets go of is freed with the next collection. The context's
//! [`FunctionTable`] only counts how many are still alive.

use std::cell::Cell;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use luabind_core::ffi::{self, lua_State};
use luabind_core::raise::callback_boundary;
use luabind_core::{RegistrationError, RegistryKey, Result, Stack};

use super::Dispatcher;

/// Points at the [`FunctionTable`] serving this state.
pub(crate) static FUNCTIONS_KEY: RegistryKey = RegistryKey::new();

/// Registry name of the metatable shared by all dispatcher upvalues.
const SLOT_METATABLE: &std::ffi::CStr = c"luabind.function";

type Slot = Option<Rc<Dispatcher>>;

#[derive(Debug, Default)]
pub(crate) struct FunctionTable {
    live: Cell<usize>,
}

impl FunctionTable {
    /// Native functions whose closures have not been collected yet.
    pub(crate) fn len(&self) -> usize {
        self.live.get()
    }

    /// Attach this table to `stack`'s state.
    ///
    /// # Safety
    ///
    /// The table must outlive the state.
    pub(crate) unsafe fn attach(&self, stack: Stack) {
        unsafe { stack.set_registry_pointer(&FUNCTIONS_KEY, self as *const Self as *const c_void) }
    }
}

fn function_table<'a>(stack: Stack) -> Option<&'a FunctionTable> {
    let table = stack.registry_pointer(&FUNCTIONS_KEY) as *const FunctionTable;
    // Attached by the context, which closes the state before dropping the table.
    unsafe { table.as_ref() }
}

/// Wrap `dispatcher` in a closure and push it.
pub(crate) fn push_dispatcher(stack: Stack, dispatcher: Dispatcher) -> Result<()> {
    let table = function_table(stack).ok_or(RegistrationError::Detached)?;
    stack.reserve(3)?;
    log::trace!("binding '{}' ({} live)", dispatcher.name(), table.len() + 1);
    unsafe {
        let state = stack.as_ptr();
        let slot = ffi::lua_newuserdatauv(state, mem::size_of::<Slot>(), 0) as *mut Slot;
        ptr::write(slot, Some(Rc::new(dispatcher)));
        if ffi::luaL_newmetatable(state, SLOT_METATABLE.as_ptr()) != 0 {
            ffi::lua_pushcfunction(state, drop_dispatcher);
            stack.raw_set_field(-2, "__gc");
            ffi::lua_pushboolean(state, 0);
            stack.raw_set_field(-2, "__metatable");
        }
        ffi::lua_setmetatable(state, -2);
        ffi::lua_pushcclosure(state, trampoline, 1);
    }
    table.live.set(table.live.get() + 1);
    Ok(())
}

unsafe extern "C-unwind" fn drop_dispatcher(state: *mut lua_State) -> c_int {
    let slot = unsafe { ffi::lua_touserdata(state, 1) } as *mut Slot;
    let Some(dispatcher) = unsafe { slot.as_mut() }.and_then(Option::take) else {
        return 0;
    };
    let stack = unsafe { Stack::from_raw(state) };
    if let Some(table) = function_table(stack) {
        table.live.set(table.live.get().saturating_sub(1));
    }
    let name = dispatcher.name().to_owned();
    if panic::catch_unwind(AssertUnwindSafe(move || drop(dispatcher))).is_err() {
        log::error!("dropping native function '{name}' panicked");
    }
    0
}

unsafe extern "C-unwind" fn trampoline(state: *mut lua_State) -> c_int {
    unsafe { callback_boundary(state, dispatch) }
}

fn dispatch(stack: Stack) -> Result<c_int> {
    let slot = unsafe {
        ffi::luaL_testudata(stack.as_ptr(), ffi::lua_upvalueindex(1), SLOT_METATABLE.as_ptr())
    } as *const Slot;
    // Cloned so a script dropping the last reference mid-call cannot free it.
    let dispatcher = unsafe { slot.as_ref() }
        .and_then(Clone::clone)
        .ok_or(RegistrationError::Detached)?;
    dispatcher.call(stack)
}
