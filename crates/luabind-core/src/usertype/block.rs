//! Userdata block layouts and identity checks.

use std::cell::Cell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use mlua::ffi::{self, lua_State};

use super::registry::Descriptor;
use super::{FLAT_ALIGN, FLAT_CAPACITY, MemoryClass, UserType};
use crate::error::{CastError, RegistrationError, Result};
use crate::lua_type::LuaType;
use crate::shape::Shape;
use crate::stack::{METATABLES_KEY, Stack};

/// Marks a block whose payload has been dropped.
const DEAD: u64 = u64::MAX;

/// Common prefix of every usertype block.
#[repr(C)]
pub(crate) struct BlockHeader {
    type_index: Cell<u64>,
    /// `> 0`: shared borrows, `-1`: exclusive borrow.
    borrow: Cell<isize>,
}

impl BlockHeader {
    fn new(type_index: usize) -> Self {
        Self {
            type_index: Cell::new(type_index as u64),
            borrow: Cell::new(0),
        }
    }
}

#[repr(C)]
struct BoxedBlock<T> {
    header: BlockHeader,
    value: T,
}

#[repr(C, align(8))]
struct FlatBlock {
    header: BlockHeader,
    raw: [MaybeUninit<u8>; FLAT_CAPACITY],
}

/// Exact byte length of a block holding a `T`.
pub(crate) fn block_size<T: UserType>() -> usize {
    const {
        assert!(
            !matches!(T::CLASS, MemoryClass::Flat)
                || (mem::size_of::<T>() <= FLAT_CAPACITY && mem::align_of::<T>() <= FLAT_ALIGN),
            "flat usertypes must fit in 24 bytes with at most 8-byte alignment"
        )
    };
    match T::CLASS {
        MemoryClass::Flat => mem::size_of::<FlatBlock>(),
        MemoryClass::Boxed => mem::size_of::<BoxedBlock<T>>(),
    }
}

fn block_align<T: UserType>() -> usize {
    match T::CLASS {
        MemoryClass::Flat => mem::align_of::<FlatBlock>(),
        MemoryClass::Boxed => mem::align_of::<BoxedBlock<T>>(),
    }
}

/// Payload address inside a block.
///
/// # Safety
///
/// `block` must point to a block laid out for `T`.
unsafe fn payload<T: UserType>(block: *mut u8) -> *mut T {
    match T::CLASS {
        MemoryClass::Flat => unsafe { (*(block as *mut FlatBlock)).raw.as_mut_ptr() as *mut T },
        MemoryClass::Boxed => unsafe { ptr::addr_of_mut!((*(block as *mut BoxedBlock<T>)).value) },
    }
}

/// Drop the payload of a block laid out for `T`.
///
/// # Safety
///
/// `block` must hold a live `T` that is not dropped again afterwards.
pub(super) unsafe fn drop_payload<T: UserType>(block: *mut u8) {
    unsafe { ptr::drop_in_place(payload::<T>(block)) }
}

// ============================================================================
// Metatables
// ============================================================================

/// Push the metatable registered for `type_index`.
pub fn push_metatable(stack: Stack, type_index: usize) -> Result<()> {
    stack.reserve(2)?;
    stack.push_registry_table(&METATABLES_KEY);
    let found = unsafe { ffi::lua_rawgeti(stack.as_ptr(), -1, type_index as ffi::lua_Integer + 1) };
    unsafe { ffi::lua_rotate(stack.as_ptr(), -2, 1) };
    stack.pop(1);
    if found == ffi::LUA_TTABLE {
        Ok(())
    } else {
        stack.pop(1);
        let type_name = stack
            .types()
            .and_then(|types| types.descriptor(type_index))
            .map_or("<unknown>", |d| d.rust_name());
        Err(RegistrationError::NotRegistered { type_name }.into())
    }
}

/// Build the metatable for `descriptor`, record it in the registry and leave
/// it on top of the stack.
pub fn create_metatable(stack: Stack, descriptor: &Descriptor) -> Result<()> {
    stack.reserve(4)?;
    let guard = stack.guard();
    stack.new_table(0, 4);
    stack.push_str(descriptor.name());
    stack.raw_set_field(-2, "__name");
    stack.push_value(-1);
    stack.raw_set_field(-2, "__index");
    if descriptor.class() == MemoryClass::Boxed {
        unsafe { ffi::lua_pushcfunction(stack.as_ptr(), finalize) };
        stack.raw_set_field(-2, "__gc");
    }

    stack.push_registry_table(&METATABLES_KEY);
    stack.push_value(-2);
    unsafe {
        ffi::lua_rawseti(stack.as_ptr(), -2, descriptor.index() as ffi::lua_Integer + 1);
    }
    stack.pop(1);

    descriptor.install_members(stack, -1)?;
    guard.keep(1);
    log::debug!("installed metatable for '{}' ({})", descriptor.name(), descriptor.class());
    Ok(())
}

// ============================================================================
// Push
// ============================================================================

fn registered_index<T: UserType>(stack: Stack) -> Result<usize> {
    stack
        .types()
        .and_then(|types| types.index_of::<T>())
        .ok_or_else(|| {
            RegistrationError::NotRegistered {
                type_name: std::any::type_name::<T>(),
            }
            .into()
        })
}

/// Move `value` into a new block carrying the type's metatable.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn push_usertype<T: UserType>(stack: Stack, value: T) -> Result<()> {
    let type_index = registered_index::<T>(stack)?;
    stack.reserve(2)?;
    push_metatable(stack, type_index)?;
    let state = stack.as_ptr();
    let block = unsafe { ffi::lua_newuserdatauv(state, block_size::<T>(), 0) } as *mut u8;
    if block.align_offset(block_align::<T>()) != 0 {
        stack.pop(2);
        return Err(RegistrationError::Misaligned {
            type_name: T::NAME,
            align: block_align::<T>(),
        }
        .into());
    }
    unsafe {
        ptr::write(block as *mut BlockHeader, BlockHeader::new(type_index));
        ptr::write(payload::<T>(block), value);
        ffi::lua_rotate(state, -2, 1);
        ffi::lua_setmetatable(state, -2);
    }
    Ok(())
}

// ============================================================================
// Identity
// ============================================================================

/// Locate the block at `index` after verifying it holds a live `T`.
fn block_at<T: UserType>(stack: Stack, index: c_int) -> Result<*mut u8> {
    let expected = || Shape::Usertype(T::NAME);
    let actual = stack.type_of(index);
    if actual != LuaType::Userdata {
        return Err(CastError::new(expected(), actual.name()).into());
    }
    let index = stack.abs_index(index);
    let type_index = registered_index::<T>(stack)?;

    if !metatable_matches(stack, index, type_index)? {
        let reason = match foreign_name(stack, index) {
            Some(name) => format!("wrong usertype '{name}'"),
            None => "userdata is not a registered usertype".to_owned(),
        };
        return Err(CastError::new(expected(), "userdata").with_reason(reason).into());
    }
    if stack.raw_len(index) != block_size::<T>() {
        return Err(CastError::new(expected(), "userdata")
            .with_reason("wrong block length")
            .into());
    }
    let block = unsafe { ffi::lua_touserdata(stack.as_ptr(), index) } as *mut u8;
    let header = unsafe { &*(block as *const BlockHeader) };
    if header.type_index.get() != type_index as u64 {
        return Err(CastError::new(expected(), "userdata")
            .with_reason("value was already finalized")
            .into());
    }
    Ok(block)
}

fn metatable_matches(stack: Stack, index: c_int, type_index: usize) -> Result<bool> {
    stack.reserve(2)?;
    if unsafe { ffi::lua_getmetatable(stack.as_ptr(), index) } == 0 {
        return Ok(false);
    }
    if let Err(err) = push_metatable(stack, type_index) {
        stack.pop(1);
        return Err(err);
    }
    let same = stack.raw_equal(-1, -2);
    stack.pop(2);
    Ok(same)
}

fn foreign_name(stack: Stack, index: c_int) -> Option<String> {
    if unsafe { ffi::lua_getmetatable(stack.as_ptr(), index) } == 0 {
        return None;
    }
    let name = match stack.raw_get_field(-1, "__name") {
        LuaType::String => Some(String::from_utf8_lossy(unsafe { stack.string_bytes(-1) }).into_owned()),
        _ => None,
    };
    stack.pop(2);
    name
}

/// Whether the value at `index` is a live `T` block.
pub fn check_usertype<T: UserType>(stack: Stack, index: c_int) -> bool {
    block_at::<T>(stack, index).is_ok()
}

/// Copy a flat value out of its block.
pub fn get_flat<T: UserType + Copy>(stack: Stack, index: c_int) -> Result<T> {
    let guard = unsafe { borrow::<T>(stack, index)? };
    Ok(*guard)
}

/// Clone a value out of its block.
pub fn get_cloned<T: UserType + Clone>(stack: Stack, index: c_int) -> Result<T> {
    let guard = unsafe { borrow::<T>(stack, index)? };
    Ok(T::clone(&guard))
}

// ============================================================================
// Borrows
// ============================================================================

fn borrow_conflict<T: UserType>(reason: &str) -> crate::Error {
    CastError::new(Shape::Usertype(T::NAME), "userdata")
        .with_reason(reason)
        .into()
}

/// Borrow the value at `index` in place.
///
/// # Safety
///
/// The block must stay reachable (for example by staying on the stack) for
/// as long as the returned guard lives.
pub unsafe fn borrow<'a, T: UserType>(stack: Stack, index: c_int) -> Result<UserRef<'a, T>> {
    let block = block_at::<T>(stack, index)?;
    let header = unsafe { &*(block as *const BlockHeader) };
    let state = header.borrow.get();
    if state < 0 {
        return Err(borrow_conflict::<T>("already mutably borrowed"));
    }
    header.borrow.set(state + 1);
    Ok(UserRef {
        header,
        value: unsafe { &*payload::<T>(block) },
    })
}

/// Borrow the value at `index` mutably in place.
///
/// # Safety
///
/// Same contract as [`borrow`].
pub unsafe fn borrow_mut<'a, T: UserType>(stack: Stack, index: c_int) -> Result<UserMut<'a, T>> {
    let block = block_at::<T>(stack, index)?;
    let header = unsafe { &*(block as *const BlockHeader) };
    if header.borrow.get() != 0 {
        return Err(borrow_conflict::<T>("already borrowed"));
    }
    header.borrow.set(-1);
    Ok(UserMut {
        header,
        value: unsafe { &mut *payload::<T>(block) },
    })
}

/// Shared access to a value living in the runtime heap.
pub struct UserRef<'a, T> {
    header: &'a BlockHeader,
    value: &'a T,
}

impl<T> Deref for UserRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> Drop for UserRef<'_, T> {
    fn drop(&mut self) {
        self.header.borrow.set(self.header.borrow.get() - 1);
    }
}

impl<T: fmt::Debug> fmt::Debug for UserRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.value, f)
    }
}

/// Exclusive access to a value living in the runtime heap.
pub struct UserMut<'a, T> {
    header: &'a BlockHeader,
    value: &'a mut T,
}

impl<T> Deref for UserMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> DerefMut for UserMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T> Drop for UserMut<'_, T> {
    fn drop(&mut self) {
        self.header.borrow.set(0);
    }
}

impl<T: fmt::Debug> fmt::Debug for UserMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

// ============================================================================
// Finalizer
// ============================================================================

/// `__gc` for boxed usertypes: drops the payload exactly once.
unsafe extern "C-unwind" fn finalize(state: *mut lua_State) -> c_int {
    let stack = unsafe { Stack::from_raw(state) };
    let Some(types) = stack.types() else {
        return 0;
    };
    if stack.type_of(1) != LuaType::Userdata || stack.raw_len(1) < mem::size_of::<BlockHeader>() {
        return 0;
    }
    let block = unsafe { ffi::lua_touserdata(state, 1) } as *mut u8;
    let header = unsafe { &*(block as *const BlockHeader) };
    let type_index = header.type_index.get();
    if type_index == DEAD {
        return 0;
    }
    // Skipped rather than dropped under a live borrow. The collector runs
    // `__gc` once, so when it is the caller the value leaks.
    if header.borrow.get() != 0 {
        log::warn!("finalizer found a borrowed block; its value is not dropped");
        return 0;
    }
    let Ok(type_index) = usize::try_from(type_index) else {
        return 0;
    };

    types.dispatch_by_index(type_index, |descriptor| {
        let owned = stack.raw_len(1) == descriptor.block_size()
            && metatable_matches(stack, 1, type_index).unwrap_or(false);
        if !owned {
            return;
        }
        header.type_index.set(DEAD);
        let dropped = panic::catch_unwind(AssertUnwindSafe(|| unsafe { descriptor.finalize(block) }));
        if dropped.is_err() {
            log::error!("drop of a '{}' value panicked during collection", descriptor.name());
        }
    });
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::test_state::TestState;
    use crate::usertype::TypeRegistry;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Point {
        x: f64,
        y: f64,
    }

    impl UserType for Point {
        const NAME: &'static str = "point";
        const CLASS: MemoryClass = MemoryClass::Flat;
    }

    #[derive(Debug)]
    struct Tracked {
        drops: Rc<Cell<u32>>,
        label: String,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    impl UserType for Tracked {
        const NAME: &'static str = "tracked";
    }

    struct Lonely;

    impl UserType for Lonely {
        const NAME: &'static str = "lonely";
    }

    fn setup(lua: &TestState, types: &TypeRegistry) {
        let stack = lua.stack;
        unsafe {
            stack.set_registry_pointer(&crate::stack::TYPES_KEY, types as *const TypeRegistry as *const _)
        };
        for descriptor in types.iter() {
            create_metatable(stack, descriptor).unwrap();
            stack.pop(1);
        }
    }

    #[test]
    fn block_sizes_follow_memory_class() {
        assert_eq!(block_size::<Point>(), 16 + FLAT_CAPACITY);
        assert_eq!(block_size::<Tracked>(), mem::size_of::<BoxedBlock<Tracked>>());
    }

    #[test]
    fn flat_values_round_trip() {
        let types = TypeRegistry::new().with::<Point>();
        let lua = TestState::new();
        setup(&lua, &types);
        let stack = lua.stack;
        push_usertype(stack, Point { x: 1.0, y: -2.0 }).unwrap();
        assert_eq!(stack.top(), 1);
        assert!(check_usertype::<Point>(stack, 1));
        assert_eq!(get_flat::<Point>(stack, 1).unwrap(), Point { x: 1.0, y: -2.0 });
        assert_eq!(stack.top(), 1);
    }

    #[test]
    fn identity_rejects_other_usertypes_and_plain_values() {
        let types = TypeRegistry::new().with::<Point>().with::<Tracked>();
        let lua = TestState::new();
        setup(&lua, &types);
        let stack = lua.stack;
        push_usertype(stack, Point { x: 0.0, y: 0.0 }).unwrap();
        assert!(!check_usertype::<Tracked>(stack, 1));
        let err = get_cloned_tracked(stack).unwrap_err();
        assert!(err.to_string().contains("wrong usertype 'point'"), "{err}");

        stack.push(3).unwrap();
        assert!(!check_usertype::<Point>(stack, 2));
        unsafe { ffi::lua_getglobal(stack.as_ptr(), c"io".as_ptr()) };
        stack.raw_get_field(-1, "stdout");
        assert!(!check_usertype::<Point>(stack, -1));
        stack.set_top(0);
    }

    fn get_cloned_tracked(stack: Stack) -> Result<String> {
        let guard = unsafe { borrow::<Tracked>(stack, 1)? };
        Ok(guard.label.clone())
    }

    #[test]
    fn unregistered_types_cannot_be_pushed() {
        let types = TypeRegistry::new().with::<Point>();
        let lua = TestState::new();
        setup(&lua, &types);
        let err = push_usertype(lua.stack, Lonely).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Registration(RegistrationError::NotRegistered { .. })
        ));
        assert_eq!(lua.stack.top(), 0);
    }

    #[test]
    fn borrows_conflict() {
        let types = TypeRegistry::new().with::<Tracked>();
        let lua = TestState::new();
        setup(&lua, &types);
        let stack = lua.stack;
        let drops = Rc::new(Cell::new(0));
        push_usertype(
            stack,
            Tracked {
                drops: drops.clone(),
                label: "a".into(),
            },
        )
        .unwrap();
        {
            let shared = unsafe { borrow::<Tracked>(stack, 1).unwrap() };
            let again = unsafe { borrow::<Tracked>(stack, 1).unwrap() };
            assert_eq!(shared.label, again.label);
            assert!(unsafe { borrow_mut::<Tracked>(stack, 1) }.is_err());
        }
        {
            let mut exclusive = unsafe { borrow_mut::<Tracked>(stack, 1).unwrap() };
            exclusive.label.push('b');
            assert!(unsafe { borrow::<Tracked>(stack, 1) }.is_err());
        }
        assert_eq!(get_cloned_tracked(stack).unwrap(), "ab");
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn collector_drops_boxed_values_once() {
        let types = TypeRegistry::new().with::<Tracked>();
        let lua = TestState::new();
        setup(&lua, &types);
        let stack = lua.stack;
        let drops = Rc::new(Cell::new(0));
        push_usertype(
            stack,
            Tracked {
                drops: drops.clone(),
                label: "gone".into(),
            },
        )
        .unwrap();
        stack.collect_garbage();
        assert_eq!(drops.get(), 0);
        stack.pop(1);
        stack.collect_garbage();
        stack.collect_garbage();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn manual_finalizer_call_invalidates_the_block() {
        let types = TypeRegistry::new().with::<Tracked>();
        let lua = TestState::new();
        setup(&lua, &types);
        let stack = lua.stack;
        let drops = Rc::new(Cell::new(0));
        push_usertype(
            stack,
            Tracked {
                drops: drops.clone(),
                label: "x".into(),
            },
        )
        .unwrap();
        unsafe { ffi::lua_setglobal(stack.as_ptr(), c"victim".as_ptr()) };
        lua.run("getmetatable(victim).__gc(victim); getmetatable(victim).__gc(victim)");
        assert_eq!(drops.get(), 1);
        unsafe { ffi::lua_getglobal(stack.as_ptr(), c"victim".as_ptr()) };
        assert!(!check_usertype::<Tracked>(stack, -1));
        stack.pop(1);
        lua.run("victim = nil");
        stack.collect_garbage();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn finalizer_skips_borrowed_blocks() {
        let types = TypeRegistry::new().with::<Tracked>();
        let lua = TestState::new();
        setup(&lua, &types);
        let stack = lua.stack;
        let drops = Rc::new(Cell::new(0));
        push_usertype(
            stack,
            Tracked {
                drops: drops.clone(),
                label: "held".into(),
            },
        )
        .unwrap();
        stack.push_value(1);
        unsafe { ffi::lua_setglobal(stack.as_ptr(), c"held".as_ptr()) };
        {
            let held = unsafe { borrow::<Tracked>(stack, 1).unwrap() };
            lua.run("getmetatable(held).__gc(held)");
            assert_eq!(drops.get(), 0);
            assert_eq!(held.label, "held");
        }
        assert!(check_usertype::<Tracked>(stack, 1));
        assert_eq!(get_cloned_tracked(stack).unwrap(), "held");

        drop(lua);
        assert_eq!(drops.get(), 1);
    }
}
