//! Namespace paths on the host side: writing through `a.b.c` and reading it back.
//!
//! Writes create missing intermediate tables and use raw sets. Reads go
//! through `__index` in protected mode, so a script-defined lookup runs and
//! its errors come back as values.

use std::os::raw::c_int;

use luabind_core::ffi;
use luabind_core::{AccessError, LuaType, NamePath, Result, Stack};

/// Push `path` into nested tables rooted at globals.
///
/// `push` must leave exactly one value on the stack. The stack is unchanged
/// afterwards, on success and on failure.
pub(crate) fn set_path(stack: Stack, path: &NamePath, push: impl FnOnce(Stack) -> Result<()>) -> Result<()> {
    let guard = stack.guard();
    stack.reserve(4)?;
    stack.push_globals();
    let root = stack.top();
    set_path_in(stack, root, path, push)?;
    drop(guard);
    Ok(())
}

/// [`set_path`] rooted at the table at `root` instead of globals.
pub(crate) fn set_path_in(
    stack: Stack,
    root: c_int,
    path: &NamePath,
    push: impl FnOnce(Stack) -> Result<()>,
) -> Result<()> {
    let guard = stack.guard();
    stack.reserve(4)?;
    let root = stack.abs_index(root);

    push(stack)?;
    let value = stack.top();

    let (parent, last) = path.split_last();
    stack.push_value(root);
    if let Some(parent) = parent {
        let mut walked = String::with_capacity(parent.len());
        for segment in parent.split('.') {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            descend(stack, segment, &walked);
        }
    }

    stack.push_value(value);
    stack.raw_set_field(-2, last);
    drop(guard);
    Ok(())
}

/// Replace the table on top with its `segment` field, creating it if needed.
fn descend(stack: Stack, segment: &str, walked: &str) {
    let found = stack.raw_get_field(-1, segment);
    if found != LuaType::Table {
        if found != LuaType::Nil {
            log::warn!("replacing {} at '{}' with a table", found.name(), walked);
        }
        stack.pop(1);
        stack.new_table(0, 0);
        stack.push_value(-1);
        stack.raw_set_field(-3, segment);
    }
    unsafe {
        ffi::lua_rotate(stack.as_ptr(), -2, 1);
    }
    stack.pop(1);
}

/// Push the value at `path`, resolved from globals.
///
/// Leaves exactly one value on success. A missing final segment resolves to
/// nil; a missing or non-indexable intermediate segment is an
/// [`AccessError`]. The stack is unchanged on failure.
pub(crate) fn push_path(stack: Stack, path: &NamePath) -> Result<LuaType> {
    let guard = stack.guard();
    stack.reserve(2)?;
    stack.push_globals();

    let mut segments = path.segments().peekable();
    let mut walked = String::with_capacity(path.as_str().len());
    let mut found = LuaType::Table;
    while let Some(segment) = segments.next() {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);

        found = stack.get_field_protected(-1, segment)?;
        unsafe {
            ffi::lua_rotate(stack.as_ptr(), -2, 1);
        }
        stack.pop(1);

        if segments.peek().is_some() {
            match found {
                LuaType::Nil => {
                    return Err(AccessError::MissingSegment {
                        path: path.to_string(),
                        segment: walked,
                    }
                    .into());
                }
                other if !other.is_indexable() => {
                    return Err(AccessError::NotIndexable {
                        path: path.to_string(),
                        segment: walked,
                        actual: other.name(),
                    }
                    .into());
                }
                _ => {}
            }
        }
    }

    guard.keep(1);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use luabind_core::Error;

    #[test]
    fn writes_create_intermediate_tables() {
        let ctx = Context::new().unwrap();
        let stack = ctx.stack();
        let path = NamePath::parse("a.b.c").unwrap();
        set_path(stack, &path, |s| s.push(7)).unwrap();
        assert_eq!(stack.top(), 0);

        assert_eq!(push_path(stack, &path).unwrap(), LuaType::Number);
        assert_eq!(stack.get::<i32>(-1).unwrap(), 7);
        stack.pop(1);

        let sibling = NamePath::parse("a.d").unwrap();
        set_path(stack, &sibling, |s| s.push("x")).unwrap();
        assert_eq!(push_path(stack, &path).unwrap(), LuaType::Number);
        stack.pop(1);
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn writes_replace_scalars_in_the_way() {
        let ctx = Context::new().unwrap();
        let stack = ctx.stack();
        set_path(stack, &NamePath::parse("cfg").unwrap(), |s| s.push(1)).unwrap();
        set_path(stack, &NamePath::parse("cfg.depth").unwrap(), |s| s.push(2)).unwrap();
        assert_eq!(push_path(stack, &NamePath::parse("cfg.depth").unwrap()).unwrap(), LuaType::Number);
        stack.pop(1);
    }

    #[test]
    fn failed_pushes_leave_the_stack_alone() {
        let ctx = Context::new().unwrap();
        let stack = ctx.stack();
        let path = NamePath::parse("p.q").unwrap();
        let err = set_path(stack, &path, |_| Err(AccessError::InvalidName { name: "?".into() }.into()));
        assert!(err.is_err());
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn reads_distinguish_missing_and_unindexable_segments() {
        let ctx = Context::new().unwrap();
        let stack = ctx.stack();
        ctx.load_and_call("n = 5").unwrap();

        match push_path(stack, &NamePath::parse("nope.x").unwrap()).unwrap_err() {
            Error::Access(AccessError::MissingSegment { segment, .. }) => assert_eq!(segment, "nope"),
            other => panic!("unexpected {other:?}"),
        }
        match push_path(stack, &NamePath::parse("n.x.y").unwrap()).unwrap_err() {
            Error::Access(AccessError::NotIndexable { segment, actual, .. }) => {
                assert_eq!(segment, "n");
                assert_eq!(actual, "number");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stack.top(), 0);

        assert_eq!(push_path(stack, &NamePath::parse("absent").unwrap()).unwrap(), LuaType::Nil);
        stack.pop(1);
    }

    #[test]
    fn reads_run_index_metamethods() {
        let ctx = Context::new().unwrap();
        let stack = ctx.stack();
        ctx.load_and_call("proxy = setmetatable({}, { __index = function(_, k) return k .. '!' end })")
            .unwrap();
        push_path(stack, &NamePath::parse("proxy.hello").unwrap()).unwrap();
        assert_eq!(stack.get::<String>(-1).unwrap(), "hello!");
        stack.pop(1);
    }
}
