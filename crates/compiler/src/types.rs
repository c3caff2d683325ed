//! The Aria type system (spec §3.3).
//!
//! Continues the teacher's `types.rs` in spirit (a small, structurally-equal
//! tagged enum the rest of the pipeline matches on exhaustively) but drops
//! row polymorphism entirely — Aria has ordinary nominal/structural types,
//! not stack effects, so there is no `StackType`/`Effect` here.

use std::fmt;

/// Pointer provenance, carried as part of the pointer type itself (spec §3.3
/// "pointer kinds are part of the type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// Ordinary GC-managed reference.
    Gc,
    /// Manually-managed `wild` heap allocation.
    Wild,
    /// Executable `wild` allocation under a W^X discipline.
    Wildx,
    /// A GC-managed value that has been pinned (`#x`) to a stable address.
    Pinned,
}

/// Vector component dimension. Aria only allows 2, 3, 4 or 9 (3x3 matrix
/// flattened) components (spec §4.5 vector constructor rule).
pub const VALID_VECTOR_DIMENSIONS: [u32; 4] = [2, 3, 4, 9];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionVariant {
    pub name: String,
    pub fields: Vec<StructField>,
}

/// A type, tagged-variant style (spec §3.3). Two types are equal iff their
/// shapes are structurally equal — derived `PartialEq` gives us that for
/// free since every variant's payload is itself structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    SignedInt(u16),
    UnsignedInt(u16),
    Float(u16),
    /// "Twisted balanced binary" signed integer: symmetric range, minimum
    /// value reserved as the sticky ERR sentinel (spec §3.3, glossary).
    Tbb(u16),
    String,
    /// Dynamically typed, GC-managed value (`dyn`).
    Dyn,
    Pointer {
        pointee: Box<Type>,
        kind: PointerKind,
    },
    Array {
        element: Box<Type>,
        size: Option<u64>,
    },
    Vector {
        component: Box<Type>,
        dimension: u32,
    },
    Struct {
        name: String,
        fields: Vec<StructField>,
        packed: bool,
    },
    Union {
        name: String,
        variants: Vec<UnionVariant>,
    },
    Result(Box<Type>),
    Function {
        params: Vec<Type>,
        returns: Box<Type>,
        variadic: bool,
    },
    /// Unbound generic placeholder, e.g. `T` in `func:id<T> = T(T:x)`.
    Generic(String),
    Future(Box<Type>),
    /// Type could not yet be determined (distinct from `Error`: this means
    /// "not computed yet", not "computation failed").
    Unknown,
    /// Absorbing error type (spec §3.3 invariant: any operation involving
    /// `Error` produces `Error` and suppresses further diagnostics at the
    /// same site).
    Error,
}

impl Type {
    pub const INT32: Type = Type::SignedInt(32);
    pub const INT64: Type = Type::SignedInt(64);
    pub const FLT64: Type = Type::Float(64);

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::SignedInt(_) | Type::UnsignedInt(_) | Type::Float(_) | Type::Tbb(_)
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::SignedInt(_) | Type::UnsignedInt(_) | Type::Tbb(_))
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Type::UnsignedInt(_))
    }

    pub fn is_tbb(&self) -> bool {
        matches!(self, Type::Tbb(_))
    }

    pub fn tbb_bits(&self) -> Option<u16> {
        match self {
            Type::Tbb(bits) => Some(*bits),
            _ => None,
        }
    }

    /// The ERR sentinel for a TBB width: the minimum representable value of
    /// a symmetric signed range, e.g. tbb8's valid range is [-127, 127] and
    /// ERR is the otherwise-unused -128.
    pub fn tbb_err_value(bits: u16) -> i128 {
        -(1i128 << (bits - 1))
    }

    /// The symmetric valid range excluding ERR: `[-(2^(n-1)-1), 2^(n-1)-1]`.
    pub fn tbb_valid_range(bits: u16) -> (i128, i128) {
        let max = (1i128 << (bits - 1)) - 1;
        (-max, max)
    }

    /// Whether this value, given as a raw literal, collides with this
    /// width's ERR sentinel (spec §4.5 "TBB-sentinel literal guard").
    pub fn tbb_is_sentinel_literal(bits: u16, value: i128) -> bool {
        value == Self::tbb_err_value(bits)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Whether `self` can be assigned from a value of type `other` without
    /// an explicit cast. TBB types never unify with plain integers (spec
    /// §3.3 invariant).
    pub fn assignable_from(&self, other: &Type) -> bool {
        if self.is_error() || other.is_error() {
            return true;
        }
        if self == other {
            return true;
        }
        match (self, other) {
            (Type::Dyn, _) => true,
            (Type::Pointer { pointee: a, .. }, Type::Pointer { pointee: b, .. }) => {
                a.assignable_from(b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for PointerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PointerKind::Gc => "gc",
            PointerKind::Wild => "wild",
            PointerKind::Wildx => "wildx",
            PointerKind::Pinned => "pinned",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::SignedInt(bits) => write!(f, "int{bits}"),
            Type::UnsignedInt(bits) => write!(f, "uint{bits}"),
            Type::Float(bits) => write!(f, "flt{bits}"),
            Type::Tbb(bits) => write!(f, "tbb{bits}"),
            Type::String => write!(f, "string"),
            Type::Dyn => write!(f, "dyn"),
            Type::Pointer { pointee, kind } => write!(f, "{kind}*{pointee}"),
            Type::Array { element, size: Some(n) } => write!(f, "{element}[{n}]"),
            Type::Array { element, size: None } => write!(f, "{element}[]"),
            Type::Vector { component, dimension } => write!(f, "vec{dimension}<{component}>"),
            Type::Struct { name, .. } => write!(f, "{name}"),
            Type::Union { name, .. } => write!(f, "{name}"),
            Type::Result(inner) => write!(f, "result<{inner}>"),
            Type::Function { params, returns, variadic } => {
                write!(f, "func(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                if *variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ") -> {returns}")
            }
            Type::Generic(name) => write!(f, "{name}"),
            Type::Future(inner) => write!(f, "future<{inner}>"),
            Type::Unknown => write!(f, "<unknown>"),
            Type::Error => write!(f, "<error>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tbb8_err_is_minimum_value() {
        assert_eq!(Type::tbb_err_value(8), -128);
        assert_eq!(Type::tbb_valid_range(8), (-127, 127));
    }

    #[test]
    fn tbb_sentinel_literal_detection() {
        assert!(Type::tbb_is_sentinel_literal(8, -128));
        assert!(!Type::tbb_is_sentinel_literal(8, -127));
    }

    #[test]
    fn error_type_is_absorbing_in_equality_checks() {
        assert!(Type::Error.assignable_from(&Type::INT32));
        assert!(Type::INT32.assignable_from(&Type::Error));
    }

    #[test]
    fn tbb_does_not_equal_plain_int_of_same_width() {
        assert_ne!(Type::Tbb(32), Type::SignedInt(32));
        assert!(!Type::Tbb(32).assignable_from(&Type::SignedInt(32)));
    }

    #[test]
    fn dyn_accepts_anything() {
        assert!(Type::Dyn.assignable_from(&Type::String));
    }
}
