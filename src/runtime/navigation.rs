use serde_json::{Map, Value};
use std::collections::btree_map::Entry;

use super::{Instance, ShrValue};
use crate::error::ExecutionError;
use crate::plan::{AssignMode, InitKind, PathSegment, SliceSelector};
use crate::types::Identifier;

type Result<T> = std::result::Result<T, ExecutionError>;

/// A value bound to a scope name: an object-model value or a piece of the wire document.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Shr(ShrValue),
    Json(Value),
}

impl Datum {
    /// Absent values, JSON `null` and empty lists are not present.
    pub fn is_present(&self) -> bool {
        match self {
            Self::Shr(value) => !value.is_empty(),
            Self::Json(Value::Null) => false,
            Self::Json(Value::Array(items)) => !items.is_empty(),
            Self::Json(_) => true,
        }
    }

    /// The datum itself, or one datum per list item.
    pub fn into_items(self) -> Vec<Datum> {
        match self {
            Self::Shr(ShrValue::List(items)) => items.into_iter().map(Self::Shr).collect(),
            Self::Json(Value::Array(items)) => items.into_iter().map(Self::Json).collect(),
            Self::Json(Value::Null) => Vec::new(),
            other => vec![other],
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Shr(value) => shr_to_json(&value),
        }
    }

    pub fn into_shr(self) -> ShrValue {
        match self {
            Self::Shr(value) => value,
            Self::Json(value) => json_to_shr(value),
        }
    }
}

/// Primitive projection of an object-model value onto JSON.
pub fn shr_to_json(value: &ShrValue) -> Value {
    match value {
        ShrValue::Primitive(value) => value.clone(),
        ShrValue::Element(instance) => instance.value().map(shr_to_json).unwrap_or(Value::Null),
        ShrValue::List(items) => Value::Array(items.iter().map(shr_to_json).collect()),
        ShrValue::Reference(envelope) => {
            let mut reference = Map::new();
            reference.insert("reference".to_string(), Value::String(envelope.entry_id.clone()));
            Value::Object(reference)
        }
    }
}

pub fn json_to_shr(value: Value) -> ShrValue {
    match value {
        Value::Array(items) => ShrValue::List(items.into_iter().map(json_to_shr).collect()),
        other => ShrValue::Primitive(other),
    }
}

fn shape_mismatch(path: &str, segment: &PathSegment) -> ExecutionError {
    ExecutionError::ShapeMismatch {
        path: path.to_string(),
        segment: segment.field.clone(),
    }
}

// Wire side

/// Reads `segments` below `current`. A list segment filters by its slice; intermediate
/// lists contribute their first match, a terminal list yields every match.
pub fn read_json(current: &Value, segments: &[PathSegment]) -> Value {
    let Some((segment, rest)) = segments.split_first() else {
        return current.clone();
    };
    let current = match current {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Value::Null,
        },
        other => other,
    };
    let next = current.get(&segment.field);

    if segment.list {
        let matches: Vec<&Value> = json_items(next)
            .into_iter()
            .filter(|item| read_matches(item, segment.slice.as_ref()))
            .collect();
        if rest.is_empty() {
            return Value::Array(matches.into_iter().cloned().collect());
        }
        return match matches.first() {
            Some(item) => read_json(item, rest),
            None => Value::Null,
        };
    }

    match next {
        Some(value) => read_json(value, rest),
        None => Value::Null,
    }
}

fn json_items(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Slices whose discriminator never resolved match nothing on read.
fn read_matches(item: &Value, slice: Option<&SliceSelector>) -> bool {
    match slice {
        None => true,
        Some(selector) => selector.is_selectable() && slice_matches(item, selector),
    }
}

/// On write an unselectable slice falls back to the last list element.
fn write_matches(item: &Value, slice: Option<&SliceSelector>) -> bool {
    match slice {
        Some(selector) if selector.is_selectable() => slice_matches(item, selector),
        _ => true,
    }
}

pub fn slice_matches(item: &Value, selector: &SliceSelector) -> bool {
    selector.constraints.iter().all(|constraint| {
        values_at(item, &constraint.path)
            .into_iter()
            .any(|actual| contains(actual, &constraint.value))
    })
}

fn values_at<'v>(value: &'v Value, path: &[String]) -> Vec<&'v Value> {
    let Some((field, rest)) = path.split_first() else {
        return vec![value];
    };
    match value {
        Value::Array(items) => items.iter().flat_map(|item| values_at(item, path)).collect(),
        Value::Object(object) => object
            .get(field)
            .map(|next| values_at(next, rest))
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Whether `actual` carries everything `expected` fixes.
pub fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected.iter().all(|(key, value)| {
            actual
                .get(key)
                .is_some_and(|present| contains(present, value))
        }),
        (Value::Array(actual), Value::Array(expected)) => expected
            .iter()
            .all(|wanted| actual.iter().any(|item| contains(item, wanted))),
        (Value::Array(actual), expected) => actual.iter().any(|item| contains(item, expected)),
        (actual, expected) => actual == expected,
    }
}

/// Fresh list element pre-filled with the slice's fixed values.
pub fn slice_template(slice: Option<&SliceSelector>) -> Value {
    let mut template = Value::Object(Map::new());
    let Some(selector) = slice else {
        return template;
    };
    for constraint in &selector.constraints {
        let nested = constraint
            .path
            .iter()
            .rev()
            .fold(constraint.value.clone(), |inner, field| {
                let mut object = Map::new();
                object.insert(field.clone(), inner);
                Value::Object(object)
            });
        deep_merge(&mut template, nested);
    }
    template
}

fn deep_merge(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(target), Value::Object(value)) => {
            for (key, item) in value {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, item),
                    None => {
                        target.insert(key, item);
                    }
                }
            }
        }
        (target, value) => *target = value,
    }
}

fn merge(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(target), Value::Object(value)) => {
            for (key, item) in value {
                target.insert(key, item);
            }
        }
        (target, value) => *target = value,
    }
}

fn with_template(value: Value, slice: Option<&SliceSelector>) -> Value {
    match (slice, value) {
        (Some(selector), Value::Object(object)) if selector.is_selectable() => {
            let mut filled = slice_template(Some(selector));
            merge(&mut filled, Value::Object(object));
            filled
        }
        (_, value) => value,
    }
}

fn ensure_object<'v>(value: &'v mut Value, path: &str, segment: &PathSegment) -> Result<&'v mut Map<String, Value>> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| shape_mismatch(path, segment))
}

fn ensure_array<'v>(value: &'v mut Value, path: &str, field: &str) -> Result<&'v mut Vec<Value>> {
    if value.is_null() {
        *value = Value::Array(Vec::new());
    } else if !value.is_array() {
        let taken = value.take();
        *value = Value::Array(vec![taken]);
    }
    value.as_array_mut().ok_or_else(|| ExecutionError::ShapeMismatch {
        path: path.to_string(),
        segment: field.to_string(),
    })
}

fn child_json<'v>(current: &'v mut Value, segment: &PathSegment, path: &str) -> Result<&'v mut Value> {
    let object = ensure_object(current, path, segment)?;
    let slot = object.entry(segment.field.clone()).or_insert(Value::Null);
    if !segment.list {
        return Ok(slot);
    }

    let items = ensure_array(slot, path, &segment.field)?;
    let index = match items
        .iter()
        .rposition(|item| write_matches(item, segment.slice.as_ref()))
    {
        Some(index) => index,
        None => {
            items.push(slice_template(segment.slice.as_ref()));
            items.len() - 1
        }
    };
    Ok(&mut items[index])
}

fn descend_json<'v>(
    mut current: &'v mut Value,
    segments: &[PathSegment],
    path: &str,
) -> Result<&'v mut Value> {
    for segment in segments {
        current = child_json(current, segment, path)?;
    }
    Ok(current)
}

pub fn write_json(
    root: &mut Value,
    segments: &[PathSegment],
    value: Value,
    mode: AssignMode,
    path: &str,
) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        match mode {
            AssignMode::Set => *root = value,
            AssignMode::Push => ensure_array(root, path, "")?.push(value),
            AssignMode::Extend => {
                ensure_array(root, path, "")?.extend(json_items(Some(&value)).into_iter().cloned())
            }
        }
        return Ok(());
    };

    let parent = descend_json(root, parents, path)?;
    let object = ensure_object(parent, path, last)?;
    let slot = object.entry(last.field.clone()).or_insert(Value::Null);
    let slice = last.slice.as_ref();

    if last.list {
        let items = ensure_array(slot, path, &last.field)?;
        match mode {
            AssignMode::Set => match items.iter().rposition(|item| write_matches(item, slice)) {
                Some(index) => merge(&mut items[index], value),
                None => items.push(with_template(value, slice)),
            },
            AssignMode::Push => items.push(with_template(value, slice)),
            AssignMode::Extend => {
                for item in json_items(Some(&value)) {
                    items.push(with_template(item.clone(), slice));
                }
            }
        }
        return Ok(());
    }

    match mode {
        AssignMode::Set => *slot = value,
        AssignMode::Push => ensure_array(slot, path, &last.field)?.push(value),
        AssignMode::Extend => {
            ensure_array(slot, path, &last.field)?.extend(json_items(Some(&value)).into_iter().cloned())
        }
    }
    Ok(())
}

pub fn init_json(root: &mut Value, segments: &[PathSegment], kind: InitKind, path: &str) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        if root.is_null() {
            *root = Value::Object(Map::new());
        }
        return Ok(());
    };

    match kind {
        InitKind::Object => {
            let target = descend_json(root, segments, path)?;
            if target.is_null() {
                *target = Value::Object(Map::new());
            }
        }
        InitKind::Array => {
            let parent = descend_json(root, parents, path)?;
            let object = ensure_object(parent, path, last)?;
            ensure_array(object.entry(last.field.clone()).or_insert(Value::Null), path, &last.field)?;
        }
        InitKind::Append => {
            let parent = descend_json(root, parents, path)?;
            let object = ensure_object(parent, path, last)?;
            let slot = object.entry(last.field.clone()).or_insert(Value::Null);
            if last.list {
                ensure_array(slot, path, &last.field)?.push(slice_template(last.slice.as_ref()));
            } else {
                *slot = Value::Object(Map::new());
            }
        }
    }
    Ok(())
}

// Instance side

/// Reads `segments` below `instance`; intermediate lists contribute their first item.
pub fn read_instance(instance: &Instance, segments: &[PathSegment]) -> Option<ShrValue> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(ShrValue::Element(Box::new(instance.clone())));
    };
    let next = instance.get(&segment.field)?;
    if rest.is_empty() {
        Some(next.clone())
    } else {
        read_shr(next, rest)
    }
}

pub fn read_shr(current: &ShrValue, segments: &[PathSegment]) -> Option<ShrValue> {
    if segments.is_empty() {
        return Some(current.clone());
    }
    match current {
        ShrValue::Element(instance) => read_instance(instance, segments),
        ShrValue::List(items) => read_shr(items.first()?, segments),
        ShrValue::Reference(envelope) => read_instance(envelope.target.as_deref()?, segments),
        ShrValue::Primitive(_) => None,
    }
}

fn fresh_instance(segment: &PathSegment) -> ShrValue {
    let identifier = segment
        .element
        .clone()
        .unwrap_or_else(|| Identifier::new("", segment.field.clone()));
    ShrValue::Element(Box::new(Instance::new(identifier)))
}

fn child_instance<'i>(
    current: &'i mut Instance,
    segment: &PathSegment,
    path: &str,
) -> Result<&'i mut Instance> {
    let slot = current
        .fields
        .entry(segment.field.clone())
        .or_insert_with(|| {
            if segment.list {
                ShrValue::List(Vec::new())
            } else {
                fresh_instance(segment)
            }
        });

    match slot {
        ShrValue::List(items) => {
            if !matches!(items.last(), Some(ShrValue::Element(_))) {
                items.push(fresh_instance(segment));
            }
            match items.last_mut() {
                Some(ShrValue::Element(instance)) => Ok(&mut **instance),
                _ => Err(shape_mismatch(path, segment)),
            }
        }
        ShrValue::Element(instance) => Ok(&mut **instance),
        ShrValue::Reference(envelope) => envelope
            .target
            .as_deref_mut()
            .ok_or_else(|| shape_mismatch(path, segment)),
        ShrValue::Primitive(_) => Err(shape_mismatch(path, segment)),
    }
}

fn descend_instance<'i>(
    mut current: &'i mut Instance,
    segments: &[PathSegment],
    path: &str,
) -> Result<&'i mut Instance> {
    for segment in segments {
        current = child_instance(current, segment, path)?;
    }
    Ok(current)
}

fn push_shr(slot: &mut ShrValue, value: ShrValue) {
    match slot {
        ShrValue::List(items) => items.push(value),
        other => {
            let previous = std::mem::replace(other, ShrValue::List(Vec::new()));
            *other = ShrValue::List(vec![previous, value]);
        }
    }
}

pub fn write_instance(
    root: &mut Instance,
    segments: &[PathSegment],
    value: ShrValue,
    mode: AssignMode,
    path: &str,
) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return match value {
            ShrValue::Element(instance) => {
                root.fields = instance.fields;
                Ok(())
            }
            _ => Err(ExecutionError::ShapeMismatch {
                path: path.to_string(),
                segment: String::new(),
            }),
        };
    };

    let parent = descend_instance(root, parents, path)?;
    let field = last.field.clone();

    match mode {
        AssignMode::Set => {
            let replace_last = last.list
                && !matches!(value, ShrValue::List(_))
                && matches!(parent.fields.get(&field), Some(ShrValue::List(items)) if !items.is_empty());
            if !replace_last {
                parent.fields.insert(field, value);
            } else if let Some(ShrValue::List(items)) = parent.fields.get_mut(&field)
                && let Some(slot) = items.last_mut()
            {
                *slot = value;
            }
        }
        AssignMode::Push => match parent.fields.entry(field) {
            Entry::Occupied(mut slot) => push_shr(slot.get_mut(), value),
            Entry::Vacant(slot) => {
                slot.insert(ShrValue::List(vec![value]));
            }
        },
        AssignMode::Extend => {
            let items = match value {
                ShrValue::List(items) => items,
                other => vec![other],
            };
            let slot = parent
                .fields
                .entry(field)
                .or_insert_with(|| ShrValue::List(Vec::new()));
            for item in items {
                push_shr(slot, item);
            }
        }
    }
    Ok(())
}

pub fn init_instance(
    root: &mut Instance,
    segments: &[PathSegment],
    kind: InitKind,
    path: &str,
) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    match kind {
        InitKind::Object => {
            descend_instance(root, segments, path)?;
        }
        InitKind::Array => {
            let parent = descend_instance(root, parents, path)?;
            parent
                .fields
                .entry(last.field.clone())
                .or_insert_with(|| ShrValue::List(Vec::new()));
        }
        InitKind::Append => {
            let parent = descend_instance(root, parents, path)?;
            match parent.fields.entry(last.field.clone()) {
                Entry::Occupied(mut slot) => push_shr(slot.get_mut(), fresh_instance(last)),
                Entry::Vacant(slot) => {
                    slot.insert(ShrValue::List(vec![fresh_instance(last)]));
                }
            }
        }
    }
    Ok(())
}
