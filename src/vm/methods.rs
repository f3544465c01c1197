//! Native method/field/index dispatch for builtin types.
//!
//! The checker only validates that a call is legal against the type
//! pool's method tables (§4.3); there is no user-overridable method body
//! for builtin types, so the VM resolves `CallMethod`/`Index`/`LoadField`
//! directly against the `Value` tag rather than through a vtable.

use crate::types::{TypeId, TypePool};
use crate::value::Value;

pub fn call(recv: &Value, name: &str, args: &[Value]) -> Result<Value, String> {
    match (recv, name) {
        (Value::Array(a), "size") => Ok(Value::Int(a.borrow().len() as i64)),
        (Value::Array(a), "add") | (Value::Array(a), "push") => {
            a.borrow_mut().push(args[0].clone());
            Ok(Value::Void)
        }
        (Value::Array(a), "get") => {
            let i = args[0].as_int();
            a.borrow()
                .get(i as usize)
                .cloned()
                .map(|v| Value::Option(Some(Box::new(v))))
                .ok_or_else(|| "index out of range".to_string())
        }
        (Value::Array(a), "remove") => {
            let i = args[0].as_int() as usize;
            let mut b = a.borrow_mut();
            if i >= b.len() {
                return Err("index out of range".into());
            }
            Ok(b.remove(i))
        }
        (Value::Array(a), "reverse") => {
            a.borrow_mut().reverse();
            Ok(Value::Void)
        }
        (Value::Array(a), "sort") => {
            a.borrow_mut().sort_by(|x, y| x.partial_cmp_numeric(y).unwrap_or(std::cmp::Ordering::Equal));
            Ok(Value::Void)
        }
        (Value::Array(a), "join") => {
            let sep = args.first().map(Value::to_display_string).unwrap_or_default();
            let items: Vec<String> = a.borrow().iter().map(Value::to_display_string).collect();
            Ok(Value::string(items.join(&sep)))
        }
        (Value::Array(a), "contains") => Ok(Value::Bool(a.borrow().iter().any(|v| v.value_eq(&args[0])))),
        (Value::Array(a), "clear") => {
            a.borrow_mut().clear();
            Ok(Value::Void)
        }
        (Value::Map(m), "size") => Ok(Value::Int(m.borrow().len() as i64)),
        (Value::Map(m), "get") => Ok(m
            .borrow()
            .iter()
            .find(|(k, _)| k.value_eq(&args[0]))
            .map(|(_, v)| Value::Option(Some(Box::new(v.clone()))))
            .unwrap_or(Value::Option(None))),
        (Value::Map(m), "put") | (Value::Map(m), "set") => {
            let mut b = m.borrow_mut();
            if let Some(slot) = b.iter_mut().find(|(k, _)| k.value_eq(&args[0])) {
                slot.1 = args[1].clone();
            } else {
                b.push((args[0].clone(), args[1].clone()));
            }
            Ok(Value::Void)
        }
        (Value::Map(m), "remove") => {
            let mut b = m.borrow_mut();
            if let Some(pos) = b.iter().position(|(k, _)| k.value_eq(&args[0])) {
                Ok(b.remove(pos).1)
            } else {
                Err("key not found".into())
            }
        }
        (Value::Map(m), "keys") => Ok(Value::array(m.borrow().iter().map(|(k, _)| k.clone()).collect())),
        (Value::Map(m), "values") => Ok(Value::array(m.borrow().iter().map(|(_, v)| v.clone()).collect())),
        (Value::Map(m), "containsKey") => Ok(Value::Bool(m.borrow().iter().any(|(k, _)| k.value_eq(&args[0])))),
        (Value::String(s), "size") | (Value::String(s), "length") => Ok(Value::Int(s.chars().count() as i64)),
        (Value::String(s), "__PLUS__") => Ok(Value::string(format!("{s}{}", args[0].to_display_string()))),
        (Value::String(s), "__EQ__") => Ok(Value::Bool(s.as_str() == args[0].to_display_string())),
        (Value::String(s), "__NE__") => Ok(Value::Bool(s.as_str() != args[0].to_display_string())),
        (Value::String(s), "split") => {
            let sep = args.first().map(Value::to_display_string).unwrap_or_default();
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Value::string).collect()
            };
            Ok(Value::array(parts))
        }
        (Value::String(s), "trim") => Ok(Value::string(s.trim().to_string())),
        (Value::String(s), "toUpper") => Ok(Value::string(s.to_uppercase())),
        (Value::String(s), "toLower") => Ok(Value::string(s.to_lowercase())),
        (Value::String(s), "contains") => Ok(Value::Bool(s.contains(args[0].to_display_string().as_str()))),
        (Value::String(s), "startsWith") => Ok(Value::Bool(s.starts_with(args[0].to_display_string().as_str()))),
        (Value::String(s), "endsWith") => Ok(Value::Bool(s.ends_with(args[0].to_display_string().as_str()))),
        (Value::String(s), "replace") => {
            let from = args[0].to_display_string();
            let to = args[1].to_display_string();
            Ok(Value::string(s.replace(&from, &to)))
        }
        (Value::String(s), "slice") => {
            let chars: Vec<char> = s.chars().collect();
            let from = args[0].as_int().max(0) as usize;
            let to = args.get(1).map(|v| v.as_int() as usize).unwrap_or(chars.len()).min(chars.len());
            Ok(Value::string(chars.get(from..to).map(|c| c.iter().collect::<String>()).unwrap_or_default()))
        }
        (Value::Int(_), m) | (Value::Float(_), m) if matches!(m, "__PLUS__" | "__MINUS__" | "__MUL__" | "__DIV__" | "__MOD__") => {
            numeric_method(recv, m, &args[0])
        }
        (Value::Option(o), "isSome") => Ok(Value::Bool(o.is_some())),
        (Value::Option(o), "get") => o.as_ref().map(|v| (**v).clone()).ok_or_else(|| "unwrap of None".to_string()),
        (Value::Option(o), "getOrElse") => Ok(o.as_ref().map(|v| (**v).clone()).unwrap_or_else(|| args[0].clone())),
        (Value::Error(e), "message") => Ok(Value::string(e.message.clone())),
        _ => Err(format!("undefined method '{name}' for this value")),
    }
}

fn numeric_method(recv: &Value, name: &str, arg: &Value) -> Result<Value, String> {
    let is_float = matches!(recv, Value::Float(_)) || matches!(arg, Value::Float(_));
    if is_float {
        let (a, b) = (recv.as_float(), arg.as_float());
        Ok(Value::Float(match name {
            "__PLUS__" => a + b,
            "__MINUS__" => a - b,
            "__MUL__" => a * b,
            "__DIV__" => a / b,
            "__MOD__" => a % b,
            _ => unreachable!(),
        }))
    } else {
        let (a, b) = (recv.as_int(), arg.as_int());
        Ok(Value::Int(match name {
            "__PLUS__" => a + b,
            "__MINUS__" => a - b,
            "__MUL__" => a * b,
            "__DIV__" => a / b,
            "__MOD__" => a % b,
            _ => unreachable!(),
        }))
    }
}

/// No builtin type currently exposes a field that's actually safe to
/// mutate in place (`Error`/`Job` fields are read-only by design, `Tuple`
/// is immutable) so this always fails; it exists so `StoreField` throws a
/// real error instead of silently discarding the assignment.
pub fn store_field(_field: &str) -> Result<(), ()> {
    Err(())
}

pub fn load_field(recv: &Value, field: &str) -> Value {
    match (recv, field) {
        (Value::Error(e), "message") => Value::string(e.message.clone()),
        (Value::Job(j), "pid") => Value::Int(j.pgid as i64),
        (Value::Tuple(t), idx) if idx.starts_with('_') => {
            let i: usize = idx.trim_start_matches('_').parse().unwrap_or(usize::MAX);
            t.get(i).cloned().unwrap_or(Value::Void)
        }
        _ => Value::Void,
    }
}

/// Distinguishes *why* an index operation failed, so the VM can throw the
/// matching builtin error subtype (`OutOfRangeError`, `KeyNotFoundError`)
/// instead of a generic `Error`.
pub enum IndexError {
    OutOfRange { index: String },
    KeyNotFound { key: String },
    NotIndexable { ty: String },
}

pub fn index(base: &Value, idx: &Value) -> Result<Value, IndexError> {
    match base {
        Value::Array(a) => {
            let i = idx.as_int();
            a.borrow().get(i as usize).cloned().ok_or(IndexError::OutOfRange { index: i.to_string() })
        }
        Value::Map(m) => m
            .borrow()
            .iter()
            .find(|(k, _)| k.value_eq(idx))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| IndexError::KeyNotFound { key: idx.to_display_string() }),
        Value::Tuple(t) => {
            let i = idx.as_int();
            t.get(i as usize).cloned().ok_or(IndexError::OutOfRange { index: i.to_string() })
        }
        Value::String(s) => {
            let i = idx.as_int();
            s.chars().nth(i as usize).map(|c| Value::string(c.to_string())).ok_or(IndexError::OutOfRange { index: i.to_string() })
        }
        _ => Err(IndexError::NotIndexable { ty: coarse_value_kind(base).to_string() }),
    }
}

/// A cheap variant-name label for diagnostics where a `TypePool` isn't
/// available (unlike `runtime_type_name`, which needs one to resolve
/// user-defined/container element types).
fn coarse_value_kind(v: &Value) -> &'static str {
    match v {
        Value::Void => "Void",
        Value::Int(_) => "Int",
        Value::Float(_) => "Float",
        Value::Bool(_) => "Boolean",
        Value::String(_) => "String",
        Value::Regex(_) => "Regex",
        Value::Signal(_) => "Signal",
        Value::Array(_) => "Array",
        Value::Map(_) => "Map",
        Value::Tuple(_) => "Tuple",
        Value::Error(_) => "Error",
        Value::Func(_) => "Func",
        Value::UnixFd(_) => "UnixFd",
        Value::Job(_) => "Job",
        Value::Option(_) => "Option",
    }
}

pub fn set_index(base: &Value, idx: &Value, value: Value) -> Result<(), IndexError> {
    match base {
        Value::Array(a) => {
            let i = idx.as_int();
            let mut b = a.borrow_mut();
            if i >= 0 && (i as usize) < b.len() {
                b[i as usize] = value;
                Ok(())
            } else {
                Err(IndexError::OutOfRange { index: i.to_string() })
            }
        }
        Value::Map(m) => {
            let mut b = m.borrow_mut();
            if let Some(slot) = b.iter_mut().find(|(k, _)| k.value_eq(idx)) {
                slot.1 = value;
            } else {
                b.push((idx.clone(), value));
            }
            Ok(())
        }
        _ => Err(IndexError::NotIndexable { ty: coarse_value_kind(base).to_string() }),
    }
}

/// The runtime type name `typeof(expr)` reports. Containers report their
/// bare template name rather than reconstructing element types, matching
/// `to_display_string`'s flat style elsewhere in this module.
pub fn runtime_type_name(pool: &TypePool, v: &Value) -> String {
    let b = &pool.builtin;
    match v {
        Value::Void => pool.get(b.void).name.clone(),
        Value::Int(_) => pool.get(b.int).name.clone(),
        Value::Float(_) => pool.get(b.float).name.clone(),
        Value::Bool(_) => pool.get(b.boolean).name.clone(),
        Value::String(_) => pool.get(b.string).name.clone(),
        Value::Regex(_) => pool.get(b.regex).name.clone(),
        Value::Signal(_) => pool.get(b.signal).name.clone(),
        Value::UnixFd(_) => pool.get(b.unix_fd).name.clone(),
        Value::Error(e) => pool.get(e.ty).name.clone(),
        Value::Array(_) => "Array".to_string(),
        Value::Map(_) => "Map".to_string(),
        Value::Tuple(_) => "Tuple".to_string(),
        Value::Option(Some(inner)) => format!("{}?", runtime_type_name(pool, inner)),
        Value::Option(None) => "Void?".to_string(),
        Value::Func(f) => format!("Func({})", f.name),
        Value::Job(_) => "Job".to_string(),
    }
}

/// Approximate runtime subtype check: templates and user error subtypes
/// are matched by name against the pool, since `Value` doesn't carry a
/// full `TypeId` tag for container element types at runtime.
pub fn runtime_type_matches(pool: &TypePool, v: &Value, ty: TypeId) -> bool {
    let b = &pool.builtin;
    if ty == b.any {
        return true;
    }
    match v {
        Value::Void => ty == b.void,
        Value::Int(_) => ty == b.int || ty == b.float,
        Value::Float(_) => ty == b.float,
        Value::Bool(_) => ty == b.boolean,
        Value::String(_) => ty == b.string,
        Value::Regex(_) => ty == b.regex,
        Value::Signal(_) => ty == b.signal,
        Value::UnixFd(_) => ty == b.unix_fd,
        Value::Array(_) => pool.get(ty).template == Some(crate::types::TemplateKind::Array),
        Value::Map(_) => pool.get(ty).template == Some(crate::types::TemplateKind::Map),
        Value::Tuple(_) => pool.get(ty).template == Some(crate::types::TemplateKind::Tuple),
        Value::Option(_) => pool.get(ty).is_option,
        Value::Error(e) => pool.is_subtype_of(e.ty, ty),
        Value::Func(f) => {
            let info = pool.get(ty);
            ty == b.any
                || (info.template == Some(crate::types::TemplateKind::Tuple)
                    && info.name.starts_with("Func<")
                    && info.type_args.len() == f.params.len() + 1)
        }
        Value::Job(_) => true,
    }
}
