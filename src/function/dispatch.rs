//! Overload resolution.
//!
//! Candidates are grouped by arity when the dispatcher is built. A call first
//! picks the group matching its argument count, then walks the group's
//! members in declaration order, probing each argument with the parameter's
//! `check`. Positions where every member declares the same type are skipped
//! while probing: the chosen candidate decodes them anyway, and probing them
//! cannot tell the members apart.

use std::fmt;
use std::os::raw::c_int;

use luabind_core::{CallError, Result, Stack};

use super::Candidate;

/// Candidates sharing an argument count.
#[derive(Debug)]
struct ArityGroup {
    arity: usize,
    /// Indices into `Dispatcher::candidates`, in declaration order.
    members: Vec<usize>,
    /// `shared[p]`: every member declares the same type at position `p`.
    shared: Vec<bool>,
}

/// Selects and invokes one candidate of a named function per call.
pub struct Dispatcher {
    name: String,
    candidates: Vec<Candidate>,
    groups: Vec<ArityGroup>,
}

impl Dispatcher {
    pub(crate) fn single(name: String, candidate: Candidate) -> Self {
        Self {
            name,
            candidates: vec![candidate],
            groups: Vec::new(),
        }
    }

    pub(crate) fn overloaded(name: String, candidates: Vec<Candidate>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(CallError::EmptyOverloadSet { name }.into());
        }
        check_shadowing(&name, &candidates)?;
        let groups = group_by_arity(&candidates);
        log::debug!(
            "built overload set '{}' with {} candidates in {} arity groups",
            name,
            candidates.len(),
            groups.len()
        );
        Ok(Self {
            name,
            candidates,
            groups,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Resolve the call whose arguments occupy the whole current frame and
    /// run the selected candidate.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn call(&self, stack: Stack) -> Result<c_int> {
        self.select(stack)?.invoke(stack)
    }

    /// Pick the candidate for the arguments in the current frame.
    pub fn select(&self, stack: Stack) -> Result<&Candidate> {
        let called_with = usize::try_from(stack.top()).unwrap_or(0);

        if let [only] = self.candidates.as_slice() {
            if only.arity() != called_with {
                return Err(CallError::ArityMismatch {
                    called_with,
                    expected: only.arity(),
                }
                .into());
            }
            return Ok(only);
        }

        let group = self
            .groups
            .iter()
            .find(|group| group.arity == called_with)
            .ok_or(CallError::NoArity { called_with })?;

        if let [only] = group.members.as_slice() {
            return Ok(&self.candidates[*only]);
        }

        let mut member = 0;
        let mut position = 0;
        while member < group.members.len() {
            let candidate = &self.candidates[group.members[member]];
            if position == group.arity {
                return Ok(candidate);
            }
            if group.shared[position] || candidate.params[position].accepts(stack, position as c_int + 1) {
                position += 1;
            } else {
                member += 1;
                position = 0;
            }
        }

        log::trace!("no overload of '{}' accepts the {} given arguments", self.name, called_with);
        Err(CallError::NoMatch.into())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

fn group_by_arity(candidates: &[Candidate]) -> Vec<ArityGroup> {
    let mut groups: Vec<ArityGroup> = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        match groups.iter_mut().find(|group| group.arity == candidate.arity()) {
            Some(group) => group.members.push(index),
            None => groups.push(ArityGroup {
                arity: candidate.arity(),
                members: vec![index],
                shared: Vec::new(),
            }),
        }
    }

    for group in &mut groups {
        let first = &candidates[group.members[0]];
        group.shared = (0..group.arity)
            .map(|position| {
                let type_id = first.params[position].type_id();
                group
                    .members
                    .iter()
                    .all(|&member| candidates[member].params[position].type_id() == type_id)
            })
            .collect();
    }
    groups
}

/// Reject candidates that can never be selected.
///
/// A later candidate is unreachable when an earlier one of the same arity
/// accepts, position by position, every value the later one accepts.
fn check_shadowing(name: &str, candidates: &[Candidate]) -> Result<()> {
    for (later_index, later) in candidates.iter().enumerate() {
        let shadowing = candidates[..later_index].iter().position(|earlier| {
            earlier.arity() == later.arity()
                && earlier
                    .params
                    .iter()
                    .zip(&later.params)
                    .all(|(a, b)| a.covers(b))
        });
        if let Some(earlier_index) = shadowing {
            return Err(CallError::ShadowedOverload {
                name: name.to_owned(),
                shadowed: later_index + 1,
                by: earlier_index + 1,
                signature: later.signature(),
            }
            .into());
        }
    }
    Ok(())
}
