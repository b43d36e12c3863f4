//! Field-path parsing and resolution.
//!
//! A field path addresses a value inside a nested document, e.g.
//! `children[key=="a1b2c3d4e5"].rows[key=="f6g7h8i9j0"].title`.
//! Array elements are addressed by `[key=="…"]` predicates; bare integer
//! selectors (`[0]`, `[-1]`) parse but are only legal in internal builder
//! paths — the validator rejects them on anything coming from the model,
//! because client-side and server-side array orderings can diverge.
//!
//! Resolution helpers operate on `serde_json::Value` and are used by the
//! in-memory store to apply patches with the same semantics the backend has.

use std::fmt;

use serde_json::Value;

use super::errors::StoreError;

// ─── Path Model ─────────────────────────────────────────────────────────────

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A plain object field, e.g. `title`.
    Field(String),
    /// A key-predicate selector into an array, e.g. `[key=="a1b2c3d4e5"]`.
    Key(String),
    /// A numeric index selector, e.g. `[0]` or `[-1]`.
    Index(i64),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a dotted/bracketed path string.
    ///
    /// Selector contents are scanned string-aware: quotes inside a key value
    /// may be escaped with `\`, and `]` inside a quoted value does not close
    /// the selector.
    pub fn parse(path: &str) -> Result<FieldPath, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.trim().is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        let bytes = path.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    // Leading/doubled dots produce empty field names
                    if i == 0 || i + 1 >= bytes.len() || bytes[i + 1] == b'.' {
                        return Err(invalid("empty path segment"));
                    }
                    i += 1;
                }
                b'[' => {
                    let (segment, consumed) = parse_selector(&path[i..])
                        .map_err(|reason| invalid(&reason))?;
                    segments.push(segment);
                    i += consumed;
                }
                _ => {
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                        i += 1;
                    }
                    segments.push(Segment::Field(path[start..i].to_string()));
                }
            }
        }

        if segments.is_empty() {
            return Err(invalid("empty path"));
        }
        Ok(FieldPath { segments })
    }

    /// Whether any selector in this path is a bare numeric index.
    pub fn contains_numeric_index(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Index(_)))
    }

    /// All `[key=="…"]` predicate values, in path order.
    pub fn key_predicates(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Key(k) => Some(k.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                Segment::Key(k) => write!(f, "[key==\"{k}\"]")?,
                Segment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

/// Parse one `[...]` selector at the start of `input`.
///
/// Returns the segment and the number of bytes consumed (including brackets).
fn parse_selector(input: &str) -> Result<(Segment, usize), String> {
    debug_assert!(input.starts_with('['));
    let inner_start = 1;

    // Find the closing bracket, skipping over quoted strings
    let bytes = input.as_bytes();
    let mut i = inner_start;
    let mut in_string = false;
    let mut escaped = false;
    let close = loop {
        if i >= bytes.len() {
            return Err("unterminated selector".to_string());
        }
        let b = bytes[i];
        if escaped {
            escaped = false;
        } else if in_string {
            match b {
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => in_string = true,
                b']' => break i,
                _ => {}
            }
        }
        i += 1;
    };

    let inner = input[inner_start..close].trim();

    // Integer selector
    if let Ok(n) = inner.parse::<i64>() {
        return Ok((Segment::Index(n), close + 1));
    }

    // key=="value" selector
    if let Some(rest) = inner.strip_prefix("key") {
        let rest = rest.trim_start();
        if let Some(quoted) = rest.strip_prefix("==") {
            let quoted = quoted.trim();
            if quoted.len() >= 2 && quoted.starts_with('"') && quoted.ends_with('"') {
                let value = quoted[1..quoted.len() - 1].replace("\\\"", "\"");
                if value.is_empty() {
                    return Err("empty key predicate".to_string());
                }
                return Ok((Segment::Key(value), close + 1));
            }
        }
    }

    Err(format!("unsupported selector '[{inner}]'"))
}

// ─── Resolution ─────────────────────────────────────────────────────────────

/// Position of an `insert` relative to the addressed array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
    Replace,
}

/// Walk `root` down to the value addressed by `path` (read-only).
pub fn get_value<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;
    for seg in &path.segments {
        current = match seg {
            Segment::Field(name) => current.get(name.as_str())?,
            Segment::Key(k) => current
                .as_array()?
                .iter()
                .find(|el| el.get("key").and_then(Value::as_str) == Some(k))?,
            Segment::Index(n) => {
                let arr = current.as_array()?;
                let idx = normalize_index(*n, arr.len())?;
                arr.get(idx)?
            }
        };
    }
    Some(current)
}

/// Set the value addressed by `path`, creating intermediate objects for
/// plain field segments that do not exist yet.
pub fn set_value(root: &mut Value, path: &FieldPath, new_value: Value) -> Result<(), StoreError> {
    let missing = |seg: &Segment| StoreError::InvalidPath {
        path: path.to_string(),
        reason: format!("no element matching {seg:?}"),
    };

    let (parent_path, last) = split_last(path);
    let mut parent = root;
    if let Some(parent_path) = &parent_path {
        for seg in &parent_path.segments {
            parent = descend_mut_vivify(parent, seg).ok_or_else(|| missing(seg))?;
        }
    }

    match last {
        Segment::Field(name) => {
            let obj = parent.as_object_mut().ok_or_else(|| missing(last))?;
            obj.insert(name.clone(), new_value);
        }
        Segment::Key(_) | Segment::Index(_) => {
            let slot = descend_mut(parent, last).ok_or_else(|| missing(last))?;
            *slot = new_value;
        }
    }
    Ok(())
}

/// Remove the value addressed by `path` (object field or array element).
pub fn unset_value(root: &mut Value, path: &FieldPath) -> Result<(), StoreError> {
    let err = || StoreError::InvalidPath {
        path: path.to_string(),
        reason: "nothing at path to unset".to_string(),
    };

    let (parent_path, last) = split_last(path);
    let parent = match parent_path {
        Some(p) => get_value_mut(root, &p).ok_or_else(err)?,
        None => root,
    };

    match last {
        Segment::Field(name) => {
            parent
                .as_object_mut()
                .and_then(|obj| obj.remove(name))
                .ok_or_else(err)?;
        }
        Segment::Key(k) => {
            let arr = parent.as_array_mut().ok_or_else(err)?;
            let pos = arr
                .iter()
                .position(|el| el.get("key").and_then(Value::as_str) == Some(k.as_str()))
                .ok_or_else(err)?;
            arr.remove(pos);
        }
        Segment::Index(n) => {
            let arr = parent.as_array_mut().ok_or_else(err)?;
            let idx = normalize_index(*n, arr.len()).ok_or_else(err)?;
            arr.remove(idx);
        }
    }
    Ok(())
}

/// Insert `items` into the array addressed by all-but-the-last segment of
/// `path`, positioned relative to the element the last segment selects.
///
/// `arr[-1]` with `After` appends; on an empty array any index selector
/// degrades to a plain append so the first insert into a fresh shell works.
pub fn insert_items(
    root: &mut Value,
    position: InsertPosition,
    path: &FieldPath,
    items: Vec<Value>,
) -> Result<(), StoreError> {
    let bad = |reason: String| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let (parent_path, last) = split_last(path);
    let parent = match parent_path {
        Some(p) => {
            get_value_mut(root, &p).ok_or_else(|| bad("array not found".to_string()))?
        }
        None => root,
    };
    let arr = parent
        .as_array_mut()
        .ok_or_else(|| bad("path does not address an array element".to_string()))?;

    if arr.is_empty() {
        if matches!(position, InsertPosition::Replace) {
            return Err(bad("cannot replace in an empty array".to_string()));
        }
        arr.extend(items);
        return Ok(());
    }

    let anchor = match last {
        Segment::Index(n) => normalize_index(*n, arr.len())
            .ok_or_else(|| bad(format!("index {n} out of bounds")))?,
        Segment::Key(k) => arr
            .iter()
            .position(|el| el.get("key").and_then(Value::as_str) == Some(k.as_str()))
            .ok_or_else(|| bad(format!("no element with key \"{k}\"")))?,
        Segment::Field(_) => {
            return Err(bad("insert path must end in an array selector".to_string()))
        }
    };

    match position {
        InsertPosition::Before => {
            arr.splice(anchor..anchor, items);
        }
        InsertPosition::After => {
            arr.splice(anchor + 1..anchor + 1, items);
        }
        InsertPosition::Replace => {
            arr.splice(anchor..anchor + 1, items);
        }
    }
    Ok(())
}

// ─── Internal helpers ───────────────────────────────────────────────────────

fn get_value_mut<'a>(root: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
    let mut current = root;
    for seg in &path.segments {
        current = descend_mut(current, seg)?;
    }
    Some(current)
}

/// Like [`descend_mut`], but creates missing plain fields as empty objects.
fn descend_mut_vivify<'a>(current: &'a mut Value, seg: &Segment) -> Option<&'a mut Value> {
    match seg {
        Segment::Field(name) => {
            let obj = current.as_object_mut()?;
            Some(
                obj.entry(name.clone())
                    .or_insert_with(|| Value::Object(serde_json::Map::new())),
            )
        }
        Segment::Key(_) | Segment::Index(_) => descend_mut(current, seg),
    }
}

fn descend_mut<'a>(current: &'a mut Value, seg: &Segment) -> Option<&'a mut Value> {
    match seg {
        Segment::Field(name) => current.get_mut(name.as_str()),
        Segment::Key(k) => current
            .as_array_mut()?
            .iter_mut()
            .find(|el| el.get("key").and_then(Value::as_str) == Some(k.as_str())),
        Segment::Index(n) => {
            let arr = current.as_array_mut()?;
            let idx = normalize_index(*n, arr.len())?;
            arr.get_mut(idx)
        }
    }
}

fn split_last(path: &FieldPath) -> (Option<FieldPath>, &Segment) {
    let last = path
        .segments
        .last()
        .expect("FieldPath::parse guarantees at least one segment");
    if path.segments.len() == 1 {
        (None, last)
    } else {
        (
            Some(FieldPath {
                segments: path.segments[..path.segments.len() - 1].to_vec(),
            }),
            last,
        )
    }
}

/// Map a possibly-negative index onto the array: `-1` is the last element.
fn normalize_index(n: i64, len: usize) -> Option<usize> {
    if n >= 0 {
        let idx = n as usize;
        (idx < len).then_some(idx)
    } else {
        let back = n.unsigned_abs() as usize;
        len.checked_sub(back)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
