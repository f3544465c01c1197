use indexmap::IndexMap;

use super::{BuiltinIds, FieldAttr, FieldHandle, MethodHandle, TemplateKind, TypeId, TypeInfo};

/// Append-only interned type store. `TypeId`s are stable for the life of
/// the process (§3 invariant).
pub struct TypePool {
    types: Vec<TypeInfo>,
    by_name: IndexMap<String, TypeId>,
    pub builtin: BuiltinIds,
}

impl TypePool {
    pub fn new() -> Self {
        let mut pool = TypePool {
            types: Vec::new(),
            by_name: IndexMap::new(),
            builtin: BuiltinIds::default(),
        };
        pool.builtin = pool.register_builtins();
        pool
    }

    fn intern(&mut self, name: &str, super_type: Option<TypeId>, extendable: bool) -> TypeId {
        let id = self.types.len();
        self.types.push(TypeInfo {
            id,
            name: name.to_string(),
            super_type,
            extendable,
            is_option: false,
            template: None,
            type_args: Vec::new(),
            fields: IndexMap::new(),
            methods: IndexMap::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn register_builtins(&mut self) -> BuiltinIds {
        let void = self.intern("Void", None, false);
        let nothing = self.intern("Nothing", None, false);
        let any = self.intern("Any", None, true);
        let int = self.intern("Int", Some(any), false);
        let float = self.intern("Float", Some(any), false);
        let boolean = self.intern("Boolean", Some(any), false);
        let string = self.intern("String", Some(any), false);
        let regex = self.intern("Regex", Some(any), false);
        let signal = self.intern("Signal", Some(any), false);
        let unix_fd = self.intern("UnixFD", Some(any), false);
        let error = self.intern("Error", Some(any), true);
        let arithmetic_error = self.intern("ArithmeticError", Some(error), true);
        let out_of_range_error = self.intern("OutOfRangeError", Some(error), true);
        let key_not_found_error = self.intern("KeyNotFoundError", Some(error), true);
        let type_cast_error = self.intern("TypeCastError", Some(error), true);
        let system_error = self.intern("SystemError", Some(error), true);
        let stack_overflow_error = self.intern("StackOverflowError", Some(error), true);
        let regex_syntax_error = self.intern("RegexSyntaxError", Some(error), true);
        let unwrapping_error = self.intern("UnwrappingError", Some(error), true);
        let assertion_error = self.intern("AssertionError", Some(error), true);
        // Internal sentinels: not subtypes of Error, unreachable from `catch`.
        let shell_exit = self.intern("_ShellExit", None, false);
        let assert_fail = self.intern("_AssertFail", None, false);

        for &t in &[int, float] {
            self.add_method(t, "__PLUS__", vec![t], t);
            self.add_method(t, "__MINUS__", vec![t], t);
            self.add_method(t, "__MUL__", vec![t], t);
            self.add_method(t, "__DIV__", vec![t], t);
            self.add_method(t, "__MOD__", vec![t], t);
            self.add_method(t, "__LT__", vec![t], boolean);
            self.add_method(t, "__GT__", vec![t], boolean);
            self.add_method(t, "__LE__", vec![t], boolean);
            self.add_method(t, "__GE__", vec![t], boolean);
            self.add_method(t, "__EQ__", vec![t], boolean);
            self.add_method(t, "__NE__", vec![t], boolean);
        }
        self.add_method(string, "__PLUS__", vec![string], string);
        self.add_method(string, "__EQ__", vec![string], boolean);
        self.add_method(string, "__NE__", vec![string], boolean);
        self.add_method(string, "size", vec![], int);

        BuiltinIds {
            void,
            nothing,
            any,
            int,
            float,
            boolean,
            string,
            regex,
            signal,
            unix_fd,
            error,
            arithmetic_error,
            out_of_range_error,
            key_not_found_error,
            type_cast_error,
            system_error,
            stack_overflow_error,
            regex_syntax_error,
            unwrapping_error,
            assertion_error,
            shell_exit,
            assert_fail,
        }
    }

    pub fn add_method(
        &mut self,
        recv: TypeId,
        name: &str,
        param_types: Vec<TypeId>,
        return_type: TypeId,
    ) {
        let method_index = self.types[recv].methods.len();
        self.types[recv].methods.insert(
            name.to_string(),
            MethodHandle { method_index, param_types, return_type, recv_type: recv },
        );
    }

    pub fn add_field(&mut self, owner: TypeId, name: &str, declared_type: TypeId, attrs: FieldAttr) {
        let index = self.types[owner].fields.len();
        self.types[owner]
            .fields
            .insert(name.to_string(), FieldHandle { declared_type, index, attributes: attrs });
    }

    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.types[id]
    }

    pub fn by_name(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    /// Returns (or creates) `Array<elem>`.
    pub fn array_of(&mut self, elem: TypeId) -> TypeId {
        self.reify(TemplateKind::Array, "Array", vec![elem])
    }

    pub fn map_of(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.reify(TemplateKind::Map, "Map", vec![key, value])
    }

    pub fn tuple_of(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.reify(TemplateKind::Tuple, "Tuple", elems)
    }

    pub fn option_of(&mut self, elem: TypeId) -> TypeId {
        if self.types[elem].is_option {
            return elem;
        }
        let id = self.reify(TemplateKind::Option, "Option", vec![elem]);
        self.types[id].is_option = true;
        id
    }

    pub fn func_of(&mut self, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        let mut args = vec![ret];
        args.extend(params);
        self.reify(TemplateKind::Tuple, "Func", args)
    }

    fn reify(&mut self, template: TemplateKind, base: &str, args: Vec<TypeId>) -> TypeId {
        let key = format!("{}<{}>", base, args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(","));
        if let Some(&id) = self.by_name.get(&key) {
            return id;
        }
        let any = self.builtin.any;
        let id = self.intern(&key, Some(any), false);
        self.types[id].template = Some(template);
        self.types[id].type_args = args;
        let size_ret = self.builtin.int;
        if template == TemplateKind::Array || template == TemplateKind::Map {
            self.add_method(id, "size", vec![], size_ret);
        }
        id
    }

    /// `is_subtype_of(t, s)`: true iff `t == s` or `t`'s super-type chain
    /// reaches `s`.
    pub fn is_subtype_of(&self, t: TypeId, s: TypeId) -> bool {
        if t == s {
            return true;
        }
        let mut cur = self.types[t].super_type;
        while let Some(c) = cur {
            if c == s {
                return true;
            }
            cur = self.types[c].super_type;
        }
        false
    }

    /// Common super type of a set of types, used by break-value gather
    /// (§4.4). Falls back to `Any` when types diverge with no common
    /// ancestor closer than that.
    pub fn common_super_type(&self, types: &[TypeId]) -> TypeId {
        let mut iter = types.iter().copied();
        let Some(first) = iter.next() else { return self.builtin.void };
        let mut result = first;
        for t in iter {
            result = self.pairwise_common(result, t);
        }
        result
    }

    fn pairwise_common(&self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        if self.is_subtype_of(a, b) {
            return b;
        }
        if self.is_subtype_of(b, a) {
            return a;
        }
        let mut chain = std::collections::HashSet::new();
        let mut cur = Some(a);
        while let Some(c) = cur {
            chain.insert(c);
            cur = self.types[c].super_type;
        }
        let mut cur = Some(b);
        while let Some(c) = cur {
            if chain.contains(&c) {
                return c;
            }
            cur = self.types[c].super_type;
        }
        self.builtin.any
    }

    pub fn lookup_method(&self, recv: TypeId, name: &str) -> Option<&MethodHandle> {
        let mut cur = Some(recv);
        while let Some(c) = cur {
            if let Some(m) = self.types[c].methods.get(name) {
                return Some(m);
            }
            cur = self.types[c].super_type;
        }
        None
    }

    pub fn lookup_field(&self, recv: TypeId, name: &str) -> Option<&FieldHandle> {
        let mut cur = Some(recv);
        while let Some(c) = cur {
            if let Some(f) = self.types[c].fields.get(name) {
                return Some(f);
            }
            cur = self.types[c].super_type;
        }
        None
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_error_is_subtype_of_error() {
        let pool = TypePool::new();
        assert!(pool.is_subtype_of(pool.builtin.arithmetic_error, pool.builtin.error));
        assert!(!pool.is_subtype_of(pool.builtin.error, pool.builtin.arithmetic_error));
    }

    #[test]
    fn shell_exit_is_not_an_error_subtype() {
        let pool = TypePool::new();
        assert!(!pool.is_subtype_of(pool.builtin.shell_exit, pool.builtin.error));
    }

    #[test]
    fn array_of_is_memoized() {
        let mut pool = TypePool::new();
        let int = pool.builtin.int;
        let a1 = pool.array_of(int);
        let a2 = pool.array_of(int);
        assert_eq!(a1, a2);
    }

    #[test]
    fn common_super_type_of_error_subtypes_is_error() {
        let pool = TypePool::new();
        let common = pool.common_super_type(&[pool.builtin.arithmetic_error, pool.builtin.key_not_found_error]);
        assert_eq!(common, pool.builtin.error);
    }
}
