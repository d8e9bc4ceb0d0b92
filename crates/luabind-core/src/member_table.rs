//! Per-usertype field tables.
//!
//! A [`MemberTable`] maps field names to a getter and an optional setter.
//! Installed on a usertype's metatable it replaces `__index` and
//! `__newindex` with two native closures:
//!
//! - reads run the getter, or fall back to the metatable itself so methods
//!   stay reachable; a name found in neither reads as nil
//! - writes run the setter; a field without one is private and an unknown
//!   name is rejected, so scripts never add fields to a usertype

use std::fmt;
use std::mem;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use bitflags::bitflags;
use mlua::ffi::{self, lua_State};
use rustc_hash::FxHashMap;

use crate::convert::{Get, Push};
use crate::error::{AccessError, Result};
use crate::lua_type::LuaType;
use crate::raise::callback_boundary;
use crate::stack::Stack;
use crate::usertype::{self, UserType};

bitflags! {
    /// What scripts may do with a field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        const READ = 1;
        const WRITE = 1 << 1;
    }
}

type Getter<T> = Box<dyn Fn(&T, Stack) -> Result<()>>;
/// Receives the object index and the value index.
type Setter = Box<dyn Fn(Stack, c_int, c_int) -> Result<()>>;

/// One named field of a usertype.
pub struct Field<T> {
    name: String,
    access: Access,
    getter: Getter<T>,
    setter: Option<Setter>,
}

impl<T> Field<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

/// Ordered field table for the usertype `T`.
pub struct MemberTable<T> {
    fields: Vec<Field<T>>,
    by_name: FxHashMap<String, usize>,
}

impl<T: UserType> Default for MemberTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MemberTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.fields).finish()
    }
}

impl<T: UserType> MemberTable<T> {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    /// A readable and writable field.
    pub fn field<V, G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        V: Push + Get + 'static,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let name = name.into();
        let context = format!("field '{name}'");
        let setter: Setter = Box::new(move |stack, object, value| {
            let value = V::get(stack, value).map_err(|e| e.with_context(context.as_str()))?;
            let mut target = unsafe { usertype::borrow_mut::<T>(stack, object)? };
            set(&mut target, value);
            Ok(())
        });
        self.insert(Field {
            name,
            access: Access::READ | Access::WRITE,
            getter: Box::new(move |object, stack| get(object).push(stack)),
            setter: Some(setter),
        })
    }

    /// A field scripts can read but not assign.
    pub fn readonly<V, G>(self, name: impl Into<String>, get: G) -> Self
    where
        V: Push + 'static,
        G: Fn(&T) -> V + 'static,
    {
        self.insert(Field {
            name: name.into(),
            access: Access::READ,
            getter: Box::new(move |object, stack| get(object).push(stack)),
            setter: None,
        })
    }

    fn insert(mut self, field: Field<T>) -> Self {
        match self.by_name.get(&field.name) {
            Some(&index) => self.fields[index] = field,
            None => {
                self.by_name.insert(field.name.clone(), self.fields.len());
                self.fields.push(field);
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field<T>> {
        self.by_name.get(name).map(|&index| &self.fields[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field<T>> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Replace `__index` and `__newindex` of the metatable at `metatable`.
    pub fn install(self, stack: Stack, metatable: c_int) -> Result<()> {
        let metatable = stack.abs_index(metatable);
        stack.reserve(4)?;
        let guard = stack.guard();
        let members = Rc::new(self);

        push_members(stack, Rc::clone(&members));
        stack.push_value(metatable);
        unsafe { ffi::lua_pushcclosure(stack.as_ptr(), member_index::<T>, 2) };
        stack.raw_set_field(metatable, "__index");

        push_members(stack, members);
        unsafe { ffi::lua_pushcclosure(stack.as_ptr(), member_newindex::<T>, 1) };
        stack.raw_set_field(metatable, "__newindex");

        drop(guard);
        Ok(())
    }
}

// ============================================================================
// Upvalue storage
// ============================================================================

type Slot<T> = Option<Rc<MemberTable<T>>>;

fn push_members<T: UserType>(stack: Stack, members: Rc<MemberTable<T>>) {
    unsafe {
        let state = stack.as_ptr();
        let slot = ffi::lua_newuserdatauv(state, mem::size_of::<Slot<T>>(), 0) as *mut Slot<T>;
        ptr::write(slot, Some(members));
        ffi::lua_createtable(state, 0, 2);
        ffi::lua_pushcfunction(state, drop_members::<T>);
        stack.raw_set_field(-2, "__gc");
        ffi::lua_pushboolean(state, 0);
        stack.raw_set_field(-2, "__metatable");
        ffi::lua_setmetatable(state, -2);
    }
}

fn members_at<T: UserType>(stack: Stack, upvalue: c_int) -> Option<Rc<MemberTable<T>>> {
    let slot = unsafe { ffi::lua_touserdata(stack.as_ptr(), ffi::lua_upvalueindex(upvalue)) } as *const Slot<T>;
    unsafe { slot.as_ref() }.and_then(Clone::clone)
}

unsafe extern "C-unwind" fn drop_members<T: UserType>(state: *mut lua_State) -> c_int {
    let slot = unsafe { ffi::lua_touserdata(state, 1) } as *mut Slot<T>;
    if let Some(slot) = unsafe { slot.as_mut() } {
        let members = slot.take();
        if panic::catch_unwind(AssertUnwindSafe(move || drop(members))).is_err() {
            log::error!("dropping the member table of '{}' panicked", T::NAME);
        }
    }
    0
}

// ============================================================================
// Metamethods
// ============================================================================

fn key_at<'a>(stack: Stack, index: c_int) -> Option<&'a str> {
    if stack.type_of(index) != LuaType::String {
        return None;
    }
    std::str::from_utf8(unsafe { stack.string_bytes(index) }).ok()
}

fn describe_key(stack: Stack, index: c_int) -> String {
    match key_at(stack, index) {
        Some(key) => key.to_owned(),
        None => format!("<{}>", stack.type_name(index)),
    }
}

unsafe extern "C-unwind" fn member_index<T: UserType>(state: *mut lua_State) -> c_int {
    unsafe {
        callback_boundary(state, |stack| {
            let members = members_at::<T>(stack, 1);
            let field = key_at(stack, 2).and_then(|key| members.as_deref()?.get(key));
            if let Some(field) = field {
                let object = usertype::borrow::<T>(stack, 1)?;
                (field.getter)(&*object, stack).map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
                return Ok(1);
            }
            stack.push_value(2);
            ffi::lua_rawget(stack.as_ptr(), ffi::lua_upvalueindex(2));
            Ok(1)
        })
    }
}

unsafe extern "C-unwind" fn member_newindex<T: UserType>(state: *mut lua_State) -> c_int {
    unsafe {
        callback_boundary(state, |stack| {
            let members = members_at::<T>(stack, 1);
            let field = key_at(stack, 2).and_then(|key| members.as_deref()?.get(key));
            let Some(field) = field else {
                return Err(AccessError::UnknownField {
                    type_name: T::NAME.to_owned(),
                    field: describe_key(stack, 2),
                }
                .into());
            };
            let Some(setter) = &field.setter else {
                return Err(AccessError::PrivateField {
                    type_name: T::NAME.to_owned(),
                    field: field.name.clone(),
                }
                .into());
            };
            setter(stack, 1, 3)?;
            Ok(0)
        })
    }
}
