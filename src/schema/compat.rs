use serde_json::{Map, Value};

use super::SchemaError;
use super::validate::validate;

const ANY: Value = Value::Bool(true);

const ANNOTATIONS: [&str; 7] = [
    "description",
    "title",
    "default",
    "examples",
    "format",
    "$schema",
    "$comment",
];

/// Keywords the structural comparison reasons about.
const MODELLED: [&str; 19] = [
    "type",
    "enum",
    "const",
    "properties",
    "required",
    "additionalProperties",
    "items",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "pattern",
];

fn child(path: &str, segment: &str) -> String {
    format!("{path}/{segment}")
}

/// Declared types of a schema; `None` means any type.
fn schema_types(schema: &Map<String, Value>) -> Option<Vec<&str>> {
    match schema.get("type")? {
        Value::String(t) => Some(vec![t.as_str()]),
        Value::Array(items) => Some(items.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

/// Checks that every instance accepted by `old` is still accepted by `new`.
///
/// The comparison is structural and errs on the side of rejecting: types may
/// only widen, allowed values may not be removed, no property may become
/// required, bounds may not tighten and patterns may not be added or changed.
/// Any other keyword (`oneOf`, `not`, `$ref`, `$defs`, ...) must appear in
/// `new` exactly as it did in `old`.
/// Properties that `new` declares but `old` did not are accepted even when
/// `old` left additional properties open, since stored data only carries the
/// properties the old schema declared.
pub fn check_compatible(old: &Value, new: &Value) -> Result<(), SchemaError> {
    compat_at(old, new, "")
}

/// True when the schema accepts every value.
fn is_unconstrained(schema: &Value) -> bool {
    match schema {
        Value::Bool(b) => *b,
        Value::Object(obj) => obj.iter().all(|(keyword, value)| match keyword.as_str() {
            "properties" => value
                .as_object()
                .is_none_or(|props| props.values().all(is_unconstrained)),
            "additionalProperties" | "items" => is_unconstrained(value),
            k => ANNOTATIONS.contains(&k),
        }),
        _ => false,
    }
}

fn finite_values(obj: &Map<String, Value>) -> Option<Vec<&Value>> {
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        return Some(values.iter().collect());
    }
    obj.get("const").map(|v| vec![v])
}

/// Whether instances of the schema may be of JSON kind `kind`.
fn may_be(obj: &Map<String, Value>, kind: &str) -> bool {
    match schema_types(obj) {
        None => true,
        Some(types) => types.iter().any(|t| {
            *t == kind || (kind == "number" && *t == "integer")
        }),
    }
}

fn compat_at(old: &Value, new: &Value, path: &str) -> Result<(), SchemaError> {
    if is_unconstrained(new) {
        return Ok(());
    }
    let old_obj = match old {
        Value::Bool(false) => return Ok(()),
        Value::Object(obj) => obj,
        _ => return Err(SchemaError::new(path, "constraints added to a schema that accepted anything")),
    };
    let new_obj = match new {
        Value::Object(obj) => obj,
        _ => return Err(SchemaError::new(path, "schema no longer accepts any value")),
    };
    if is_unconstrained(old) {
        return Err(SchemaError::new(path, "constraints added to a schema that accepted anything"));
    }

    // A finite set of old values can be checked exhaustively.
    if let Some(values) = finite_values(old_obj) {
        for value in values {
            if validate(old, value).is_ok() && validate(new, value).is_err() {
                return Err(SchemaError::new(
                    path,
                    format!("value {value} is no longer accepted"),
                ));
            }
        }
        return Ok(());
    }

    check_unmodelled(old_obj, new_obj, path)?;
    check_types(old_obj, new_obj, path)?;

    if new_obj.contains_key("enum") || new_obj.contains_key("const") {
        return Err(SchemaError::new(path, "allowed values restricted"));
    }

    if may_be(old_obj, "number") {
        check_numbers(old_obj, new_obj, path)?;
    }
    if may_be(old_obj, "string") {
        check_sizes(old_obj, new_obj, "minLength", "maxLength", path)?;
        if let Some(pattern) = new_obj.get("pattern") {
            if old_obj.get("pattern") != Some(pattern) {
                return Err(SchemaError::new(path, "pattern added or changed"));
            }
        }
    }
    if may_be(old_obj, "array") {
        check_sizes(old_obj, new_obj, "minItems", "maxItems", path)?;
        if let Some(new_items) = new_obj.get("items") {
            let old_items = old_obj.get("items").unwrap_or(&ANY);
            compat_at(old_items, new_items, &child(path, "items"))?;
        }
    }
    if may_be(old_obj, "object") {
        check_sizes(old_obj, new_obj, "minProperties", "maxProperties", path)?;
        check_required(old_obj, new_obj, path)?;
        check_properties(old_obj, new_obj, path)?;
    }

    Ok(())
}

fn check_unmodelled(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaError> {
    for (keyword, value) in new {
        let keyword = keyword.as_str();
        if MODELLED.contains(&keyword) || ANNOTATIONS.contains(&keyword) {
            continue;
        }
        if old.get(keyword) != Some(value) {
            return Err(SchemaError::new(path, format!("{keyword} added or changed")));
        }
    }
    Ok(())
}

fn check_types(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaError> {
    let Some(new_types) = schema_types(new) else {
        return Ok(());
    };
    let Some(old_types) = schema_types(old) else {
        return Err(SchemaError::new(path, "type constraint added"));
    };

    for ty in old_types {
        let accepted = new_types
            .iter()
            .any(|t| *t == ty || (ty == "integer" && *t == "number"));
        if !accepted {
            return Err(SchemaError::new(path, format!("type {ty} is no longer accepted")));
        }
    }
    Ok(())
}

fn check_required(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaError> {
    let names = |obj: &Map<String, Value>| -> Vec<String> {
        obj.get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let old_required = names(old);
    for name in names(new) {
        if !old_required.contains(&name) {
            return Err(SchemaError::new(path, format!("property {name} is now required")));
        }
    }
    Ok(())
}

/// A numeric bound: value and whether it is exclusive.
type Bound = (f64, bool);

fn lower_bound(obj: &Map<String, Value>) -> Option<Bound> {
    tighter(
        obj.get("minimum").and_then(Value::as_f64).map(|v| (v, false)),
        obj.get("exclusiveMinimum").and_then(Value::as_f64).map(|v| (v, true)),
        |a, b| a > b,
    )
}

fn upper_bound(obj: &Map<String, Value>) -> Option<Bound> {
    tighter(
        obj.get("maximum").and_then(Value::as_f64).map(|v| (v, false)),
        obj.get("exclusiveMaximum").and_then(Value::as_f64).map(|v| (v, true)),
        |a, b| a < b,
    )
}

fn tighter(a: Option<Bound>, b: Option<Bound>, stricter: fn(f64, f64) -> bool) -> Option<Bound> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if stricter(b.0, a.0) || (b.0 == a.0 && b.1) {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, b) => a.or(b),
    }
}

/// `new` is no stricter than `old`.
fn bound_relaxed(old: Option<Bound>, new: Option<Bound>, looser: fn(f64, f64) -> bool) -> bool {
    match (old, new) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some((ov, oe)), Some((nv, ne))) => looser(nv, ov) || (nv == ov && (!ne || oe)),
    }
}

fn check_numbers(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaError> {
    if !bound_relaxed(lower_bound(old), lower_bound(new), |n, o| n < o) {
        return Err(SchemaError::new(path, "lower bound tightened"));
    }
    if !bound_relaxed(upper_bound(old), upper_bound(new), |n, o| n > o) {
        return Err(SchemaError::new(path, "upper bound tightened"));
    }
    if let Some(new_multiple) = new.get("multipleOf").and_then(Value::as_f64) {
        let ok = old
            .get("multipleOf")
            .and_then(Value::as_f64)
            .is_some_and(|old_multiple| (old_multiple / new_multiple).fract() == 0.0);
        if !ok {
            return Err(SchemaError::new(path, "multipleOf added or changed"));
        }
    }
    Ok(())
}

fn check_sizes(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    min_keyword: &str,
    max_keyword: &str,
    path: &str,
) -> Result<(), SchemaError> {
    let get = |obj: &Map<String, Value>, k: &str| obj.get(k).and_then(Value::as_u64);

    let old_min = get(old, min_keyword).unwrap_or(0);
    let new_min = get(new, min_keyword).unwrap_or(0);
    if new_min > old_min {
        return Err(SchemaError::new(path, format!("{min_keyword} raised")));
    }

    if let Some(new_max) = get(new, max_keyword) {
        match get(old, max_keyword) {
            Some(old_max) if new_max >= old_max => {}
            _ => return Err(SchemaError::new(path, format!("{max_keyword} lowered"))),
        }
    }
    Ok(())
}

enum Additional<'a> {
    Any,
    Forbidden,
    Schema(&'a Value),
}

fn additional(obj: &Map<String, Value>) -> Additional<'_> {
    match obj.get("additionalProperties") {
        None | Some(Value::Bool(true)) => Additional::Any,
        Some(Value::Bool(false)) => Additional::Forbidden,
        Some(schema) if is_unconstrained(schema) => Additional::Any,
        Some(schema) => Additional::Schema(schema),
    }
}

fn check_properties(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaError> {
    let empty = Map::new();
    let old_props = old.get("properties").and_then(Value::as_object).unwrap_or(&empty);
    let new_props = new.get("properties").and_then(Value::as_object).unwrap_or(&empty);
    let old_additional = additional(old);
    let new_additional = additional(new);

    for (name, old_prop) in old_props {
        let prop_path = child(path, name);
        match new_props.get(name) {
            Some(new_prop) => compat_at(old_prop, new_prop, &prop_path)?,
            None => match new_additional {
                Additional::Any => {}
                Additional::Forbidden => {
                    return Err(SchemaError::new(path, format!("property {name} removed")));
                }
                Additional::Schema(schema) => compat_at(old_prop, schema, &prop_path)?,
            },
        }
    }

    for (name, new_prop) in new_props {
        if old_props.contains_key(name) {
            continue;
        }
        if let Additional::Schema(schema) = old_additional {
            compat_at(schema, new_prop, &child(path, name))?;
        }
    }

    let additional_path = child(path, "additionalProperties");
    match (old_additional, new_additional) {
        (_, Additional::Any) | (Additional::Forbidden, _) => Ok(()),
        (Additional::Any | Additional::Schema(_), Additional::Forbidden) => Err(SchemaError::new(
            path,
            "additional properties are no longer allowed",
        )),
        (Additional::Any, Additional::Schema(schema)) => compat_at(&ANY, schema, &additional_path),
        (Additional::Schema(old), Additional::Schema(new)) => compat_at(old, new, &additional_path),
    }
}
