//! Unified error types for the binding layer.
//!
//! Every host-facing operation reports failure through [`Error`], which wraps
//! one phase-specific error type per failure domain:
//!
//! ```text
//! Error (top-level wrapper)
//! ├── CastError          - a runtime value cannot become the requested native type
//! ├── CallError          - argument count or overload resolution failed
//! ├── AccessError        - namespace traversal or member-table access was rejected
//! ├── RuntimeError       - the embedded runtime (or a native callback) raised an error
//! ├── LoadError          - a chunk failed to load
//! └── RegistrationError  - usertype registration or state creation failed
//! ```
//!
//! Errors raised inside a native trampoline keep their variant when they travel
//! through script frames back to the host, see [`crate::raise`].

use std::fmt;

use thiserror::Error;

use crate::shape::Shape;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ============================================================================
// Cast Errors
// ============================================================================

/// A runtime value is incompatible with the requested native type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cast from {actual} to {expected} failed{}{}", Suffix(" (", .reason, ")"), Suffix(" in ", .context, ""))]
pub struct CastError {
    /// Shape of the native type that was requested.
    pub expected: Shape,
    /// Runtime tag of the value that was found (`"nil"`, `"number"`, ...).
    pub actual: &'static str,
    /// Where the value was read, e.g. `argument #2` or `global 'a.d'`.
    pub context: String,
    /// Extra detail, e.g. `out of range` or `wrong usertype 'vec2'`.
    pub reason: String,
}

impl CastError {
    pub fn new(expected: Shape, actual: &'static str) -> Self {
        Self {
            expected,
            actual,
            context: String::new(),
            reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Attach call-site context unless a more specific one is already set.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if self.context.is_empty() {
            self.context = context.into();
        }
        self
    }
}

/// Formats `prefix value suffix` only when `value` is non-empty.
struct Suffix<'a>(&'static str, &'a String, &'static str);

impl fmt::Display for Suffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.1.is_empty() {
            Ok(())
        } else {
            write!(f, "{}{}{}", self.0, self.1, self.2)
        }
    }
}

// ============================================================================
// Call Errors
// ============================================================================

/// Dispatching a script call onto a native function failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// A single-candidate function was called with the wrong number of arguments.
    #[error(
        "arguments count mismatch (called with {called_with}, but function defined with {expected} arguments)"
    )]
    ArityMismatch { called_with: usize, expected: usize },

    /// No overload candidate accepts the given argument count.
    #[error("no matched overloaded function (cannot call with {called_with} arguments)")]
    NoArity { called_with: usize },

    /// No overload candidate accepts the given argument types.
    #[error("no matched overloaded function")]
    NoMatch,

    /// A candidate can never be selected because an earlier one accepts everything it does.
    #[error(
        "overload #{shadowed} of '{name}' ({signature}) is unreachable: overload #{by} accepts every call it would"
    )]
    ShadowedOverload {
        name: String,
        shadowed: usize,
        by: usize,
        signature: String,
    },

    /// An overload set with no candidates was provided.
    #[error("overload set '{name}' is empty")]
    EmptyOverloadSet { name: String },
}

// ============================================================================
// Access Errors
// ============================================================================

/// Namespace traversal or member-table access was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// A path segment resolved to nil.
    #[error("'{segment}' is missing while resolving '{path}'")]
    MissingSegment { path: String, segment: String },

    /// A path segment resolved to a value that cannot be indexed.
    #[error("'{segment}' is a {actual} and cannot be indexed while resolving '{path}'")]
    NotIndexable {
        path: String,
        segment: String,
        actual: &'static str,
    },

    /// A name contains characters outside `[A-Za-z0-9_.]` or an empty segment.
    #[error("invalid name '{name}'")]
    InvalidName { name: String },

    /// Write to a member-table field that only has a getter.
    #[error("the field '{field}' of object type {type_name} is private")]
    PrivateField { type_name: String, field: String },

    /// Write to a field the member table does not know.
    #[error("object of type '{type_name}' has no '{field}' field")]
    UnknownField { type_name: String, field: String },
}

// ============================================================================
// Runtime Errors
// ============================================================================

/// Errors raised while the embedded runtime executes code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The script raised an error (`LUA_ERRRUN`).
    #[error("{message}")]
    Script { message: String },

    /// The runtime failed to allocate (`LUA_ERRMEM`).
    #[error("memory allocation error")]
    Memory,

    /// The message handler itself failed (`LUA_ERRERR`).
    #[error("error in error handling: {message}")]
    ErrorHandler { message: String },

    /// A native callback returned an error or panicked.
    #[error("native callback failed: {message}")]
    Callback { message: String },

    /// The runtime value stack could not grow.
    #[error("value stack exhausted (needed {needed} more slots)")]
    StackExhausted { needed: usize },
}

// ============================================================================
// Load Errors
// ============================================================================

/// A chunk could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("syntax error: {message}")]
    Syntax { message: String },

    #[error("memory allocation error while loading")]
    Memory,

    #[error("cannot open file '{path}': {message}")]
    File { path: String, message: String },
}

// ============================================================================
// Registration Errors
// ============================================================================

/// Usertype registration or state setup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The type was never added to the [`TypeRegistry`](crate::TypeRegistry).
    #[error("type '{type_name}' is not registered")]
    NotRegistered { type_name: &'static str },

    /// `luaL_newstate` returned null.
    #[error("cannot create new state")]
    StateCreation,

    /// A native function was pushed onto, or called from, a state that no
    /// binding context owns.
    #[error("state is not owned by a binding context")]
    Detached,

    /// The runtime handed out a block whose alignment is too small for the payload.
    #[error("userdata block for '{type_name}' is not aligned to {align} bytes")]
    Misaligned { type_name: &'static str, align: usize },
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Top-level error for every binding operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("cast error: {0}")]
    Cast(#[from] CastError),

    #[error("call error: {0}")]
    Call(#[from] CallError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),
}

impl Error {
    /// Attach call-site context to a cast error; other variants pass through.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            Error::Cast(err) => Error::Cast(err.with_context(context)),
            other => other,
        }
    }

    pub fn is_cast(&self) -> bool {
        matches!(self, Error::Cast(_))
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Error::Call(_))
    }

    pub fn is_access(&self) -> bool {
        matches!(self, Error::Access(_))
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, Error::Runtime(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_error_display_includes_optional_parts() {
        let bare = CastError::new(Shape::Integer, "string");
        assert_eq!(bare.to_string(), "cast from string to integer failed");

        let full = CastError::new(Shape::Integer, "number")
            .with_reason("out of range for i8")
            .with_context("argument #2");
        assert_eq!(
            full.to_string(),
            "cast from number to integer failed (out of range for i8) in argument #2"
        );
    }

    #[test]
    fn context_is_not_overwritten() {
        let err = CastError::new(Shape::String, "nil")
            .with_context("element [3]")
            .with_context("argument #1");
        assert_eq!(err.context, "element [3]");
    }

    #[test]
    fn call_error_messages() {
        assert_eq!(
            CallError::NoArity { called_with: 2 }.to_string(),
            "no matched overloaded function (cannot call with 2 arguments)"
        );
        assert_eq!(
            CallError::ArityMismatch {
                called_with: 1,
                expected: 3
            }
            .to_string(),
            "arguments count mismatch (called with 1, but function defined with 3 arguments)"
        );
    }

    #[test]
    fn access_error_messages() {
        let private = AccessError::PrivateField {
            type_name: "vec3".into(),
            field: "x".into(),
        };
        assert_eq!(private.to_string(), "the field 'x' of object type vec3 is private");

        let unknown = AccessError::UnknownField {
            type_name: "vec3".into(),
            field: "w".into(),
        };
        assert_eq!(unknown.to_string(), "object of type 'vec3' has no 'w' field");
    }

    #[test]
    fn unified_conversion_and_predicates() {
        let err: Error = CallError::NoMatch.into();
        assert!(err.is_call());
        assert!(!err.is_cast());

        let err: Error = CastError::new(Shape::Boolean, "nil").into();
        let err = err.with_context("result #1");
        match err {
            Error::Cast(cast) => assert_eq!(cast.context, "result #1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
