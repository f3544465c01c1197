//! Type pool (C4).
//!
//! Types are interned and compared by identity (`TypeId` equality). Each
//! type owns a field table and a method table, keyed by name, mirroring the
//! ydsh `DSType`/`TypePool` design described in `original_source/`.

mod coercion;
mod pool;

pub use coercion::{coercion_of, Coercion};
pub use pool::TypePool;

use indexmap::IndexMap;

/// Stable index into a `TypePool`. Identities are never reused.
pub type TypeId = usize;

/// Minimal hand-rolled bitflags (kept dependency-free; this is the only use
/// site, so a real `bitflags` macro would be overkill).
macro_rules! bitflags_like {
    (pub struct $name:ident: $repr:ty { $(const $variant:ident = $value:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);
        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
            pub fn union(self, other: $name) -> $name {
                $name(self.0 | other.0)
            }
        }
        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { self.union(rhs) }
        }
    };
}

bitflags_like! {
    pub struct FieldAttr: u8 {
        const READ_ONLY   = 0b0000_0001;
        const GLOBAL      = 0b0000_0010;
        const ENV         = 0b0000_0100;
        const SECONDS     = 0b0000_1000;
        const RANDOM      = 0b0001_0000;
        const INTERFACE   = 0b0010_0000;
        const FUNC_HANDLE = 0b0100_0000;
        const MOD_CONST   = 0b1000_0000;
    }
}

#[derive(Debug, Clone)]
pub struct FieldHandle {
    pub declared_type: TypeId,
    pub index: usize,
    pub attributes: FieldAttr,
}

#[derive(Debug, Clone)]
pub struct MethodHandle {
    pub method_index: usize,
    pub param_types: Vec<TypeId>,
    pub return_type: TypeId,
    pub recv_type: TypeId,
}

/// Element-arity / acceptable-element predicate for template types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Array,
    Map,
    Tuple,
    Option,
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: String,
    pub super_type: Option<TypeId>,
    pub extendable: bool,
    pub is_option: bool,
    pub template: Option<TemplateKind>,
    pub type_args: Vec<TypeId>,
    pub fields: IndexMap<String, FieldHandle>,
    pub methods: IndexMap<String, MethodHandle>,
}

impl TypeInfo {
    pub fn display_name(&self) -> String {
        if self.type_args.is_empty() {
            self.name.clone()
        } else {
            format!(
                "{}<{}>",
                self.name,
                self.type_args.iter().map(|_| "_").collect::<Vec<_>>().join(",")
            )
        }
    }
}

/// Well-known builtin type ids, stable for the process lifetime because the
/// pool is append-only and these are always interned first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuiltinIds {
    pub void: TypeId,
    pub nothing: TypeId,
    pub any: TypeId,
    pub int: TypeId,
    pub float: TypeId,
    pub boolean: TypeId,
    pub string: TypeId,
    pub regex: TypeId,
    pub signal: TypeId,
    pub unix_fd: TypeId,
    pub error: TypeId,
    pub arithmetic_error: TypeId,
    pub out_of_range_error: TypeId,
    pub key_not_found_error: TypeId,
    pub type_cast_error: TypeId,
    pub system_error: TypeId,
    pub stack_overflow_error: TypeId,
    pub regex_syntax_error: TypeId,
    pub unwrapping_error: TypeId,
    pub assertion_error: TypeId,
    pub shell_exit: TypeId,
    pub assert_fail: TypeId,
}
