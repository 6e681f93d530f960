//! Text change sets
//!
//! A [`ChangeSet`] describes an edit of a whole text as a sequence of
//! retained spans, deletions and insertions. Offsets count Unicode scalar
//! values. Change sets compose, map over concurrent change sets and map
//! positions, which is all the synchronization engine needs to rebase local
//! edits against the server's order.
//!
//! ## JSON form
//! ```text
//! [4, [0, "E"]]        retain 4, insert "E"
//! [1, [2, "xy"], 3]    retain 1, replace 2 chars by "xy", retain 3
//! [[3]]                delete 3
//! ```

use crate::error::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A single change operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Retain(usize),
    Delete(usize),
    Insert(String),
}

impl Op {
    /// Returns (is_delete, length in the source text)
    fn base_span(&self) -> (bool, usize) {
        match self {
            Op::Retain(n) => (false, *n),
            Op::Delete(n) => (true, *n),
            Op::Insert(_) => (false, 0),
        }
    }

    fn span(is_delete: bool, len: usize) -> Op {
        if is_delete {
            Op::Delete(len)
        } else {
            Op::Retain(len)
        }
    }
}

/// Which side of an insertion at the same offset a mapped position sticks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Before,
    After,
}

/// An edit of a complete text
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    ops: Vec<Op>,
    len_before: usize,
    len_after: usize,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The change that leaves a text of `len` characters untouched
    pub fn identity(len: usize) -> Self {
        Self::new().retain(len)
    }

    /// Insert `text` at `pos` in a text of `doc_len` characters
    pub fn insert_at(doc_len: usize, pos: usize, text: &str) -> Result<Self> {
        Self::replace(doc_len, pos, pos, text)
    }

    /// Delete the characters in `from..to`
    pub fn delete_range(doc_len: usize, from: usize, to: usize) -> Result<Self> {
        Self::replace(doc_len, from, to, "")
    }

    /// Replace the characters in `from..to` by `text`
    pub fn replace(doc_len: usize, from: usize, to: usize, text: &str) -> Result<Self> {
        if from > to || to > doc_len {
            return Err(Error::InvalidChange(format!(
                "range {}..{} outside text of length {}",
                from, to, doc_len
            )));
        }
        Ok(Self::new()
            .retain(from)
            .insert(text)
            .delete(to - from)
            .retain(doc_len - to))
    }

    pub fn retain(mut self, n: usize) -> Self {
        self.push_retain(n);
        self
    }

    pub fn insert(mut self, text: &str) -> Self {
        self.push_insert(text);
        self
    }

    pub fn delete(mut self, n: usize) -> Self {
        self.push_delete(n);
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Length of the text this change applies to
    pub fn len_before(&self) -> usize {
        self.len_before
    }

    /// Length of the text this change produces
    pub fn len_after(&self) -> usize {
        self.len_after
    }

    /// True if applying this change leaves the text unchanged
    pub fn is_identity(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Op::Retain(_)))
    }

    fn push_retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.len_before += n;
        self.len_after += n;
        if let Some(Op::Retain(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(Op::Retain(n));
        }
    }

    fn push_delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.len_before += n;
        if let Some(Op::Delete(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(Op::Delete(n));
        }
    }

    fn push_insert(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.len_after += text.chars().count();

        if let Some(Op::Insert(last)) = self.ops.last_mut() {
            last.push_str(text);
            return;
        }
        // Keep inserts ahead of an adjacent delete so equal edits compare equal
        let n = self.ops.len();
        if let Some(Op::Delete(_)) = self.ops.last() {
            if n >= 2 {
                if let Op::Insert(prev) = &mut self.ops[n - 2] {
                    prev.push_str(text);
                    return;
                }
            }
            self.ops.insert(n - 1, Op::Insert(text.to_string()));
            return;
        }
        self.ops.push(Op::Insert(text.to_string()));
    }

    /// Apply this change to a text
    pub fn apply(&self, doc: &str) -> Result<String> {
        let len = doc.chars().count();
        if len != self.len_before {
            return Err(Error::LengthMismatch {
                expected: self.len_before,
                actual: len,
            });
        }

        let mut chars = doc.chars();
        let mut out = String::with_capacity(doc.len());
        for op in &self.ops {
            match op {
                Op::Retain(n) => out.extend(chars.by_ref().take(*n)),
                Op::Delete(n) => chars.by_ref().take(*n).for_each(drop),
                Op::Insert(text) => out.push_str(text),
            }
        }
        Ok(out)
    }

    /// Combine this change with one that applies to its output
    pub fn compose(&self, other: &ChangeSet) -> Result<ChangeSet> {
        if self.len_after != other.len_before {
            return Err(Error::ComposeMismatch {
                first: self.len_after,
                second: other.len_before,
            });
        }

        let mut out = ChangeSet::new();
        let mut it1 = self.ops.iter().cloned();
        let mut it2 = other.ops.iter().cloned();
        let mut op1 = it1.next();
        let mut op2 = it2.next();

        loop {
            if op1.is_none() && op2.is_none() {
                break;
            }
            if let Some(Op::Delete(n)) = op1 {
                out.push_delete(n);
                op1 = it1.next();
                continue;
            }
            if let Some(Op::Insert(text)) = &op2 {
                out.push_insert(text);
                op2 = it2.next();
                continue;
            }

            let (x, y) = match (op1.take(), op2.take()) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(Error::ComposeMismatch {
                        first: self.len_after,
                        second: other.len_before,
                    })
                }
            };

            match (x, y) {
                (Op::Retain(a), Op::Retain(b)) => {
                    let m = a.min(b);
                    out.push_retain(m);
                    op1 = if a > m { Some(Op::Retain(a - m)) } else { it1.next() };
                    op2 = if b > m { Some(Op::Retain(b - m)) } else { it2.next() };
                }
                (Op::Retain(a), Op::Delete(b)) => {
                    let m = a.min(b);
                    out.push_delete(m);
                    op1 = if a > m { Some(Op::Retain(a - m)) } else { it1.next() };
                    op2 = if b > m { Some(Op::Delete(b - m)) } else { it2.next() };
                }
                (Op::Insert(text), Op::Retain(b)) => {
                    let len = text.chars().count();
                    let m = len.min(b);
                    let (head, tail) = split_chars(&text, m);
                    out.push_insert(head);
                    op1 = if len > m { Some(Op::Insert(tail.to_string())) } else { it1.next() };
                    op2 = if b > m { Some(Op::Retain(b - m)) } else { it2.next() };
                }
                (Op::Insert(text), Op::Delete(b)) => {
                    // Inserted then deleted: nothing survives
                    let len = text.chars().count();
                    let m = len.min(b);
                    let (_, tail) = split_chars(&text, m);
                    op1 = if len > m { Some(Op::Insert(tail.to_string())) } else { it1.next() };
                    op2 = if b > m { Some(Op::Delete(b - m)) } else { it2.next() };
                }
                (x, y) => {
                    return Err(Error::InvalidChange(format!(
                        "unexpected operations while composing: {:?} then {:?}",
                        x, y
                    )))
                }
            }
        }

        Ok(out)
    }

    /// Map this change over a concurrent change to the same text, so it can
    /// be applied after `other`.
    ///
    /// When `before` is true, insertions of this change at the same offset as
    /// insertions of `other` end up in front of them.
    pub fn map(&self, other: &ChangeSet, before: bool) -> Result<ChangeSet> {
        if before {
            Ok(transform(self, other)?.0)
        } else {
            Ok(transform(other, self)?.1)
        }
    }

    /// Map a position in the source text to the corresponding position in
    /// the output text. Returns `None` for positions outside the source text.
    pub fn map_pos(&self, pos: usize, assoc: Assoc) -> Option<usize> {
        if pos > self.len_before {
            return None;
        }

        let mut old = 0;
        let mut new = 0;
        for op in &self.ops {
            match op {
                Op::Retain(n) => {
                    if pos < old + n {
                        return Some(new + pos - old);
                    }
                    old += n;
                    new += n;
                }
                Op::Delete(n) => {
                    if pos < old + n {
                        return Some(new);
                    }
                    old += n;
                }
                Op::Insert(text) => {
                    if pos == old && assoc == Assoc::Before {
                        return Some(new);
                    }
                    new += text.chars().count();
                }
            }
        }
        Some(new + pos - old)
    }

    /// Serialize into the compact JSON form
    pub fn to_json(&self) -> Value {
        let mut sections = Vec::with_capacity(self.ops.len());
        let mut pending_insert: Option<&str> = None;

        for op in &self.ops {
            match op {
                Op::Retain(n) => {
                    if let Some(text) = pending_insert.take() {
                        sections.push(Value::from(vec![Value::from(0), Value::from(text)]));
                    }
                    sections.push(Value::from(*n));
                }
                Op::Insert(text) => pending_insert = Some(text),
                Op::Delete(n) => {
                    let mut section = vec![Value::from(*n)];
                    if let Some(text) = pending_insert.take() {
                        section.push(Value::from(text));
                    }
                    sections.push(Value::from(section));
                }
            }
        }
        if let Some(text) = pending_insert {
            sections.push(Value::from(vec![Value::from(0), Value::from(text)]));
        }
        Value::Array(sections)
    }

    /// Parse the compact JSON form
    pub fn from_json(value: &Value) -> Result<ChangeSet> {
        let sections = value
            .as_array()
            .ok_or_else(|| Error::InvalidChange("change set must be an array".into()))?;

        let mut out = ChangeSet::new();
        for section in sections {
            match section {
                Value::Number(n) => {
                    let n = n
                        .as_u64()
                        .ok_or_else(|| Error::InvalidChange(format!("invalid retain length {}", n)))?;
                    out.push_retain(n as usize);
                }
                Value::Array(parts) => {
                    let deleted = parts
                        .first()
                        .and_then(Value::as_u64)
                        .ok_or_else(|| Error::InvalidChange("replacement must start with a length".into()))?;
                    let lines = parts[1..]
                        .iter()
                        .map(|part| {
                            part.as_str().ok_or_else(|| {
                                Error::InvalidChange("inserted text must be a string".into())
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    out.push_insert(&lines.join("\n"));
                    out.push_delete(deleted as usize);
                }
                other => {
                    return Err(Error::InvalidChange(format!("unexpected section {}", other)));
                }
            }
        }
        Ok(out)
    }
}

/// Transform two concurrent changes to the same text into `(a', b')` such
/// that `b.then(a') == a.then(b')`. Insertions of `a` win ties.
fn transform(a: &ChangeSet, b: &ChangeSet) -> Result<(ChangeSet, ChangeSet)> {
    if a.len_before != b.len_before {
        return Err(Error::MapMismatch {
            left: a.len_before,
            right: b.len_before,
        });
    }

    let mut a_prime = ChangeSet::new();
    let mut b_prime = ChangeSet::new();
    let mut it1 = a.ops.iter().cloned();
    let mut it2 = b.ops.iter().cloned();
    let mut op1 = it1.next();
    let mut op2 = it2.next();

    loop {
        if op1.is_none() && op2.is_none() {
            break;
        }
        if let Some(Op::Insert(text)) = &op1 {
            a_prime.push_insert(text);
            b_prime.push_retain(text.chars().count());
            op1 = it1.next();
            continue;
        }
        if let Some(Op::Insert(text)) = &op2 {
            a_prime.push_retain(text.chars().count());
            b_prime.push_insert(text);
            op2 = it2.next();
            continue;
        }

        let (x, y) = match (op1.take(), op2.take()) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(Error::MapMismatch {
                    left: a.len_before,
                    right: b.len_before,
                })
            }
        };
        let (x_del, lx) = x.base_span();
        let (y_del, ly) = y.base_span();
        let m = lx.min(ly);

        match (x_del, y_del) {
            (false, false) => {
                a_prime.push_retain(m);
                b_prime.push_retain(m);
            }
            (true, true) => {}
            (true, false) => a_prime.push_delete(m),
            (false, true) => b_prime.push_delete(m),
        }

        op1 = if lx > m { Some(Op::span(x_del, lx - m)) } else { it1.next() };
        op2 = if ly > m { Some(Op::span(y_del, ly - m)) } else { it2.next() };
    }

    Ok((a_prime, b_prime))
}

fn split_chars(text: &str, at: usize) -> (&str, &str) {
    match text.char_indices().nth(at) {
        Some((idx, _)) => text.split_at(idx),
        None => (text, ""),
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ChangeSet::from_json(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply() {
        let change = ChangeSet::insert_at(4, 4, "E").unwrap();
        assert_eq!(change.apply("ABCD").unwrap(), "ABCDE");

        let change = ChangeSet::replace(5, 1, 3, "xy").unwrap();
        assert_eq!(change.apply("hello").unwrap(), "hxylo");
    }

    #[test]
    fn test_apply_length_mismatch() {
        let change = ChangeSet::insert_at(4, 0, "x").unwrap();
        assert_eq!(
            change.apply("ABC"),
            Err(Error::LengthMismatch { expected: 4, actual: 3 })
        );
    }

    #[test]
    fn test_apply_multibyte() {
        let change = ChangeSet::insert_at(3, 1, "ü").unwrap();
        assert_eq!(change.apply("äöß").unwrap(), "äüöß");
    }

    #[test]
    fn test_compose() {
        let a = ChangeSet::insert_at(4, 4, "E").unwrap();
        let b = ChangeSet::delete_range(5, 0, 2).unwrap();
        let composed = a.compose(&b).unwrap();
        assert_eq!(composed.apply("ABCD").unwrap(), "CDE");
        assert_eq!(composed.len_before(), 4);
        assert_eq!(composed.len_after(), 3);
    }

    #[test]
    fn test_compose_insert_then_delete_cancels() {
        let a = ChangeSet::insert_at(2, 1, "xyz").unwrap();
        let b = ChangeSet::delete_range(5, 1, 4).unwrap();
        let composed = a.compose(&b).unwrap();
        assert!(composed.is_identity());
    }

    #[test]
    fn test_compose_mismatch() {
        let a = ChangeSet::insert_at(4, 4, "E").unwrap();
        assert!(a.compose(&ChangeSet::identity(4)).is_err());
    }

    #[test]
    fn test_map_converges() {
        let doc = "ABCD";
        let local = ChangeSet::insert_at(4, 4, "E").unwrap();
        let remote = ChangeSet::insert_at(4, 0, "0").unwrap();

        let local_after = local.map(&remote, false).unwrap();
        let remote_after = remote.map(&local, true).unwrap();

        let a = local_after.apply(&remote.apply(doc).unwrap()).unwrap();
        let b = remote_after.apply(&local.apply(doc).unwrap()).unwrap();
        assert_eq!(a, "0ABCDE");
        assert_eq!(a, b);
    }

    #[test]
    fn test_map_tie_break() {
        let x = ChangeSet::insert_at(2, 1, "x").unwrap();
        let y = ChangeSet::insert_at(2, 1, "y").unwrap();

        // x first
        let after_y = x.map(&y, true).unwrap();
        assert_eq!(after_y.apply(&y.apply("ab").unwrap()).unwrap(), "axyb");

        // y first
        let after_y = x.map(&y, false).unwrap();
        assert_eq!(after_y.apply(&y.apply("ab").unwrap()).unwrap(), "ayxb");
    }

    #[test]
    fn test_map_overlapping_deletes() {
        let doc = "abcdef";
        let a = ChangeSet::delete_range(6, 1, 4).unwrap();
        let b = ChangeSet::delete_range(6, 2, 5).unwrap();

        let left = a.map(&b, false).unwrap().apply(&b.apply(doc).unwrap()).unwrap();
        let right = b.map(&a, true).unwrap().apply(&a.apply(doc).unwrap()).unwrap();
        assert_eq!(left, "af");
        assert_eq!(left, right);
    }

    #[test]
    fn test_map_pos() {
        let change = ChangeSet::replace(6, 2, 4, "XYZ").unwrap();
        assert_eq!(change.map_pos(0, Assoc::Before), Some(0));
        assert_eq!(change.map_pos(2, Assoc::Before), Some(2));
        assert_eq!(change.map_pos(2, Assoc::After), Some(5));
        assert_eq!(change.map_pos(3, Assoc::Before), Some(5));
        assert_eq!(change.map_pos(4, Assoc::Before), Some(5));
        assert_eq!(change.map_pos(6, Assoc::After), Some(7));
        assert_eq!(change.map_pos(7, Assoc::After), None);
    }

    #[test]
    fn test_json_form() {
        let change = ChangeSet::replace(6, 1, 3, "xy").unwrap();
        assert_eq!(change.to_json(), json!([1, [2, "xy"], 3]));

        let insert = ChangeSet::insert_at(4, 4, "E").unwrap();
        assert_eq!(serde_json::to_value(&insert).unwrap(), json!([4, [0, "E"]]));

        let parsed: ChangeSet = serde_json::from_value(json!([1, [2, "a", "b"], 3])).unwrap();
        assert_eq!(parsed, ChangeSet::replace(6, 1, 3, "a\nb").unwrap());

        assert!(serde_json::from_value::<ChangeSet>(json!([1, ["x"]])).is_err());
        assert!(serde_json::from_value::<ChangeSet>(json!({"retain": 1})).is_err());
    }
}
