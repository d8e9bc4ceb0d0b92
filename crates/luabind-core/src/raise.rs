//! Carrying Rust errors across runtime error frames.
//!
//! Native code raises errors as a userdata object wrapping the original
//! [`Error`]. Scripts see it through `__tostring`; a host protected call that
//! catches it gets the original variant back instead of a flattened string.
//!
//! [`callback_boundary`] is the only way native callbacks enter Rust code from
//! the runtime: it catches panics and converts `Err` results so that nothing
//! unwinds into runtime frames and no Rust value is alive when the runtime
//! long-jumps.

use std::any::Any;
use std::mem;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use mlua::ffi::{self, lua_State};

use crate::error::{Error, RuntimeError};
use crate::lua_type::LuaType;
use crate::stack::{RegistryKey, Stack};

static ERROR_META_KEY: RegistryKey = RegistryKey::new();

/// The payload of an error object.
struct RaisedError {
    error: Option<Error>,
    message: String,
}

/// Run a native callback on behalf of the runtime.
///
/// Returns the number of results on success; on failure raises the error
/// inside the runtime and does not return.
///
/// # Safety
///
/// `state` must be the state that invoked the current C function.
pub unsafe fn callback_boundary<F>(state: *mut lua_State, callback: F) -> c_int
where
    F: FnOnce(Stack) -> Result<c_int, Error>,
{
    let stack = unsafe { Stack::from_raw(state) };
    let error = match panic::catch_unwind(AssertUnwindSafe(move || callback(stack))) {
        Ok(Ok(results)) => return results,
        Ok(Err(error)) => error,
        Err(payload) => RuntimeError::Callback {
            message: panic_message(payload),
        }
        .into(),
    };
    unsafe { raise(stack, error) }
}

/// Push `error` as an error object and raise it.
///
/// # Safety
///
/// See [`Stack::raise`].
pub unsafe fn raise(stack: Stack, error: Error) -> c_int {
    push_error(stack, error);
    unsafe { ffi::lua_error(stack.as_ptr()) }
}

/// Push an error object carrying `error`.
pub fn push_error(stack: Stack, error: Error) {
    let message = error.to_string();
    unsafe {
        let state = stack.as_ptr();
        let block = ffi::lua_newuserdatauv(state, mem::size_of::<RaisedError>(), 0) as *mut RaisedError;
        ptr::write(
            block,
            RaisedError {
                error: Some(error),
                message,
            },
        );
    }
    push_error_metatable(stack);
    unsafe {
        ffi::lua_setmetatable(stack.as_ptr(), -2);
    }
}

/// Convert the error value at `index` produced by a failed protected call.
pub fn take_error(stack: Stack, index: c_int, status: c_int) -> Error {
    match status {
        ffi::LUA_ERRMEM => RuntimeError::Memory.into(),
        ffi::LUA_ERRERR => RuntimeError::ErrorHandler {
            message: message_at(stack, index),
        }
        .into(),
        _ => match raised_at(stack, index) {
            Some(raised) => match raised.error.take() {
                Some(error) => error,
                None => RuntimeError::Script {
                    message: raised.message.clone(),
                }
                .into(),
            },
            None => RuntimeError::Script {
                message: message_at(stack, index),
            }
            .into(),
        },
    }
}

/// Best-effort message text for an error value.
pub fn message_at(stack: Stack, index: c_int) -> String {
    match stack.type_of(index) {
        LuaType::String => {
            String::from_utf8_lossy(unsafe { stack.string_bytes(index) }).into_owned()
        }
        LuaType::Userdata => match raised_at(stack, index) {
            Some(raised) => raised.message.clone(),
            None => "(error object is a userdata value)".to_owned(),
        },
        other => format!("(error object is a {} value)", other.name()),
    }
}

fn raised_at<'a>(stack: Stack, index: c_int) -> Option<&'a mut RaisedError> {
    if stack.type_of(index) != LuaType::Userdata {
        return None;
    }
    let index = stack.abs_index(index);
    unsafe {
        if ffi::lua_getmetatable(stack.as_ptr(), index) == 0 {
            return None;
        }
    }
    push_error_metatable(stack);
    let ours = stack.raw_equal(-1, -2);
    stack.pop(2);
    if !ours {
        return None;
    }
    let block = unsafe { ffi::lua_touserdata(stack.as_ptr(), index) } as *mut RaisedError;
    unsafe { block.as_mut() }
}

fn push_error_metatable(stack: Stack) {
    unsafe {
        let state = stack.as_ptr();
        let key = ERROR_META_KEY.as_ptr();
        if ffi::lua_rawgetp(state, ffi::LUA_REGISTRYINDEX, key) == ffi::LUA_TTABLE {
            return;
        }
        ffi::lua_pop(state, 1);
        ffi::lua_createtable(state, 0, 3);
        ffi::lua_pushcfunction(state, raised_tostring);
        stack.raw_set_field(-2, "__tostring");
        ffi::lua_pushcfunction(state, raised_gc);
        stack.raw_set_field(-2, "__gc");
        stack.push_str("luabind.error");
        stack.raw_set_field(-2, "__name");
        ffi::lua_pushvalue(state, -1);
        ffi::lua_rawsetp(state, ffi::LUA_REGISTRYINDEX, key);
    }
}

unsafe extern "C-unwind" fn raised_tostring(state: *mut lua_State) -> c_int {
    let stack = unsafe { Stack::from_raw(state) };
    let message = message_at(stack, 1);
    stack.push_str(&message);
    1
}

unsafe extern "C-unwind" fn raised_gc(state: *mut lua_State) -> c_int {
    let stack = unsafe { Stack::from_raw(state) };
    if let Some(raised) = raised_at(stack, 1) {
        let raised = raised as *mut RaisedError;
        // Dropping an `Error` cannot panic: it only owns strings.
        unsafe { ptr::drop_in_place(raised) };
    }
    0
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panic: {text}")
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panic: {text}")
    } else {
        "panic in native callback".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallError, CastError};
    use crate::shape::Shape;
    use crate::stack::test_state::TestState;

    unsafe extern "C-unwind" fn failing(state: *mut lua_State) -> c_int {
        unsafe { callback_boundary(state, |_| Err(CallError::NoMatch.into())) }
    }

    unsafe extern "C-unwind" fn panicking(state: *mut lua_State) -> c_int {
        unsafe { callback_boundary(state, |_| panic!("kaboom")) }
    }

    unsafe extern "C-unwind" fn succeeding(state: *mut lua_State) -> c_int {
        unsafe {
            callback_boundary(state, |stack| {
                stack.push_str("ok");
                Ok(1)
            })
        }
    }

    fn call(lua: &TestState, f: ffi::lua_CFunction) -> Result<(), Error> {
        unsafe { ffi::lua_pushcfunction(lua.stack.as_ptr(), f) };
        lua.stack.pcall(0, 1)?;
        lua.stack.pop(1);
        Ok(())
    }

    #[test]
    fn structured_errors_survive_the_runtime() {
        let lua = TestState::new();
        assert_eq!(call(&lua, failing), Err(Error::Call(CallError::NoMatch)));
        assert_eq!(lua.stack.top(), 0);
    }

    #[test]
    fn panics_become_callback_errors() {
        let lua = TestState::new();
        let err = call(&lua, panicking).unwrap_err();
        assert_eq!(
            err,
            Error::Runtime(RuntimeError::Callback {
                message: "panic: kaboom".into()
            })
        );
    }

    #[test]
    fn success_returns_results() {
        let lua = TestState::new();
        assert!(call(&lua, succeeding).is_ok());
    }

    #[test]
    fn scripts_can_print_raised_errors() {
        let lua = TestState::new();
        let stack = lua.stack;
        unsafe { ffi::lua_pushcfunction(stack.as_ptr(), failing) };
        unsafe { ffi::lua_setglobal(stack.as_ptr(), c"failing".as_ptr()) };
        lua.eval("tostring(select(2, pcall(failing)))");
        let text: String = stack.get(-1).unwrap();
        assert_eq!(text, "call error: no matched overloaded function");
    }

    #[test]
    fn messages_for_foreign_error_values() {
        let lua = TestState::new();
        let stack = lua.stack;
        stack.push_str("plain");
        assert_eq!(message_at(stack, -1), "plain");
        stack.new_table(0, 0);
        assert_eq!(message_at(stack, -1), "(error object is a table value)");
        stack.pop(2);

        push_error(stack, CastError::new(Shape::Integer, "string").into());
        assert_eq!(message_at(stack, -1), "cast error: cast from string to integer failed");
        stack.pop(1);
    }
}
