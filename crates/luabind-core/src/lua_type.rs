//! Runtime value tags.

use std::os::raw::c_int;

use mlua::ffi;
use num_enum::TryFromPrimitive;

/// The tag of a value on the runtime stack, as reported by `lua_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(i32)]
pub enum LuaType {
    None = ffi::LUA_TNONE,
    Nil = ffi::LUA_TNIL,
    Boolean = ffi::LUA_TBOOLEAN,
    LightUserdata = ffi::LUA_TLIGHTUSERDATA,
    Number = ffi::LUA_TNUMBER,
    String = ffi::LUA_TSTRING,
    Table = ffi::LUA_TTABLE,
    Function = ffi::LUA_TFUNCTION,
    Userdata = ffi::LUA_TUSERDATA,
    Thread = ffi::LUA_TTHREAD,
}

impl LuaType {
    /// Convert a raw tag. Unknown tags map to [`LuaType::None`].
    pub fn from_raw(tag: c_int) -> Self {
        Self::try_from(tag).unwrap_or(LuaType::None)
    }

    /// The name the runtime uses for this tag.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }

    /// Whether `lua_gettable` can be attempted without a guaranteed type error.
    pub fn is_indexable(self) -> bool {
        matches!(self, LuaType::Table | LuaType::Userdata | LuaType::String)
    }
}
