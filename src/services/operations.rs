//! Retain/insert/delete edit scripts over plain text.
//!
//! All lengths count Unicode scalar values (`char`s). An operation sequence
//! only needs to describe the edited region: content left after the last
//! operation is carried over unchanged, as if a final `Retain` covered it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Retain { length: usize },
    Insert { content: String },
    Delete { length: usize },
}

impl Operation {
    pub fn retain(length: usize) -> Self {
        Operation::Retain { length }
    }

    pub fn insert(content: impl Into<String>) -> Self {
        Operation::Insert { content: content.into() }
    }

    pub fn delete(length: usize) -> Self {
        Operation::Delete { length }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    #[error("{op} of {length} exceeds the {remaining} characters left in the content")]
    OutOfBounds {
        op: &'static str,
        length: usize,
        remaining: usize,
    },
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Appends `op`, dropping empty ops and merging with a trailing op of the same kind.
fn push_op(ops: &mut Vec<Operation>, op: Operation) {
    let empty = match &op {
        Operation::Retain { length } | Operation::Delete { length } => *length == 0,
        Operation::Insert { content } => content.is_empty(),
    };
    if empty {
        return;
    }
    if let Some(last) = ops.last_mut() {
        match (last, &op) {
            (Operation::Retain { length: acc }, Operation::Retain { length }) => {
                *acc += length;
                return;
            }
            (Operation::Delete { length: acc }, Operation::Delete { length }) => {
                *acc += length;
                return;
            }
            (Operation::Insert { content: acc }, Operation::Insert { content }) => {
                acc.push_str(content);
                return;
            }
            _ => {}
        }
    }
    ops.push(op);
}

/// Minimal prefix/suffix edit script turning `old` into `new`.
///
/// One contiguous changed region is described exactly; several separate
/// edits collapse into a single delete+insert spanning all of them.
pub fn diff(old: &str, new: &str) -> Vec<Operation> {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let prefix = old_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
    let suffix = old_chars
        .iter()
        .rev()
        .zip(new_chars.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let mut ops = Vec::with_capacity(3);
    push_op(&mut ops, Operation::retain(prefix));
    push_op(&mut ops, Operation::delete(old_chars.len() - prefix - suffix));
    let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();
    push_op(&mut ops, Operation::insert(inserted));
    ops
}

/// Replay `ops` against `content`.
///
/// A retain or delete running past the end of the content is rejected rather
/// than clamped.
pub fn apply(content: &str, ops: &[Operation]) -> Result<String, OtError> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content.chars();
    let mut remaining = char_len(content);

    for op in ops {
        match op {
            Operation::Retain { length } => {
                if *length > remaining {
                    return Err(OtError::OutOfBounds { op: "retain", length: *length, remaining });
                }
                result.extend(rest.by_ref().take(*length));
                remaining -= length;
            }
            Operation::Insert { content } => result.push_str(content),
            Operation::Delete { length } => {
                if *length > remaining {
                    return Err(OtError::OutOfBounds { op: "delete", length: *length, remaining });
                }
                rest.by_ref().take(*length).for_each(drop);
                remaining -= length;
            }
        }
    }

    result.extend(rest);
    Ok(result)
}

/// Reconcile two concurrent edit scripts made against the same content.
///
/// Returns `(a', b')` such that applying `b'` after `a` and `a'` after `b`
/// give the same text. Inserts at the same position are ordered by comparing
/// the inserted text; the smaller one lands first and `a` wins ties.
pub fn transform(a: &[Operation], b: &[Operation]) -> (Vec<Operation>, Vec<Operation>) {
    let mut a_prime = Vec::new();
    let mut b_prime = Vec::new();

    let mut a_iter = a.iter().cloned();
    let mut b_iter = b.iter().cloned();
    let mut a_op = a_iter.next();
    let mut b_op = b_iter.next();

    loop {
        match (a_op.take(), b_op.take()) {
            (None, None) => break,

            // One side is exhausted and behaves like an unbounded retain.
            (Some(op), None) => {
                if let Operation::Insert { content } = &op {
                    push_op(&mut b_prime, Operation::retain(char_len(content)));
                }
                push_op(&mut a_prime, op);
                a_op = a_iter.next();
            }
            (None, Some(op)) => {
                if let Operation::Insert { content } = &op {
                    push_op(&mut a_prime, Operation::retain(char_len(content)));
                }
                push_op(&mut b_prime, op);
                b_op = b_iter.next();
            }

            (Some(Operation::Insert { content: ins_a }), Some(Operation::Insert { content: ins_b })) => {
                if ins_a.cmp(&ins_b) != Ordering::Greater {
                    push_op(&mut b_prime, Operation::retain(char_len(&ins_a)));
                    push_op(&mut a_prime, Operation::Insert { content: ins_a });
                    a_op = a_iter.next();
                    b_op = Some(Operation::Insert { content: ins_b });
                } else {
                    push_op(&mut a_prime, Operation::retain(char_len(&ins_b)));
                    push_op(&mut b_prime, Operation::Insert { content: ins_b });
                    b_op = b_iter.next();
                    a_op = Some(Operation::Insert { content: ins_a });
                }
            }
            (Some(Operation::Insert { content }), other) => {
                push_op(&mut b_prime, Operation::retain(char_len(&content)));
                push_op(&mut a_prime, Operation::Insert { content });
                a_op = a_iter.next();
                b_op = other;
            }
            (other, Some(Operation::Insert { content })) => {
                push_op(&mut a_prime, Operation::retain(char_len(&content)));
                push_op(&mut b_prime, Operation::Insert { content });
                b_op = b_iter.next();
                a_op = other;
            }

            (Some(Operation::Retain { length: la }), Some(Operation::Retain { length: lb })) => {
                let n = la.min(lb);
                push_op(&mut a_prime, Operation::retain(n));
                push_op(&mut b_prime, Operation::retain(n));
                a_op = remainder(Operation::retain(la - n), &mut a_iter);
                b_op = remainder(Operation::retain(lb - n), &mut b_iter);
            }
            (Some(Operation::Delete { length: la }), Some(Operation::Retain { length: lb })) => {
                let n = la.min(lb);
                push_op(&mut a_prime, Operation::delete(n));
                a_op = remainder(Operation::delete(la - n), &mut a_iter);
                b_op = remainder(Operation::retain(lb - n), &mut b_iter);
            }
            (Some(Operation::Retain { length: la }), Some(Operation::Delete { length: lb })) => {
                let n = la.min(lb);
                push_op(&mut b_prime, Operation::delete(n));
                a_op = remainder(Operation::retain(la - n), &mut a_iter);
                b_op = remainder(Operation::delete(lb - n), &mut b_iter);
            }
            // Both removed the same span; nothing left to do on either side.
            (Some(Operation::Delete { length: la }), Some(Operation::Delete { length: lb })) => {
                let n = la.min(lb);
                a_op = remainder(Operation::delete(la - n), &mut a_iter);
                b_op = remainder(Operation::delete(lb - n), &mut b_iter);
            }
        }
    }

    (a_prime, b_prime)
}

/// The unconsumed part of a split op, or the next op once it is used up.
fn remainder(op: Operation, rest: &mut impl Iterator<Item = Operation>) -> Option<Operation> {
    match op {
        Operation::Retain { length: 0 } | Operation::Delete { length: 0 } => rest.next(),
        op => Some(op),
    }
}
