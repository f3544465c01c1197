//! Legal coercion table (§4.3). `checkType` tries exact equality, then
//! sub-type-of, then one of these coercions before giving up.

use super::{TypeId, TypePool};

/// A `TypeOp` opcode: the bytecode instruction a coercion materializes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    ToVoid,
    NumCast,
    ToString,
    ToBool,
    CheckCast,
    CheckUnwrap,
    AlwaysTrue,
    AlwaysFalse,
    InstanceOf,
    NoCast,
}

/// Fixed numeric-widening table: `(from, to)` pairs that widen without loss.
fn numeric_widens(pool: &TypePool, from: TypeId, to: TypeId) -> bool {
    let b = &pool.builtin;
    (from == b.int && to == b.float) || from == to
}

/// Decide which coercion (if any) takes `node_type` to `expected`, outside
/// of exact-equality / subtype-of (the caller checks those first).
pub fn coercion_of(pool: &TypePool, expected: TypeId, actual: TypeId) -> Option<Coercion> {
    let b = &pool.builtin;
    if expected == b.void {
        return Some(Coercion::ToVoid);
    }
    if numeric_widens(pool, actual, expected) {
        return Some(Coercion::NumCast);
    }
    if expected == b.boolean && pool.lookup_method(actual, "%BOOL").is_some() {
        return Some(Coercion::ToBool);
    }
    if expected == b.string && pool.lookup_method(actual, "%STR").is_some() {
        return Some(Coercion::ToString);
    }
    // `T -> Option<T>` on specific sites (assignment to an Option-typed
    // local, etc.) — the caller is expected to have already unwrapped the
    // `Option` template to compare its element type against `actual`.
    if pool.get(expected).is_option {
        let elem = pool.get(expected).type_args.first().copied();
        if elem == Some(actual) {
            return Some(Coercion::NoCast);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_widens_to_float() {
        let pool = TypePool::new();
        assert_eq!(
            coercion_of(&pool, pool.builtin.float, pool.builtin.int),
            Some(Coercion::NumCast)
        );
    }

    #[test]
    fn unrelated_types_have_no_coercion() {
        let pool = TypePool::new();
        assert_eq!(coercion_of(&pool, pool.builtin.int, pool.builtin.string), None);
    }
}
