//! Aria type -> LLVM IR type text (spec §4.11).
//!
//! Every `Type` that can reach codegen on a program that passed the type
//! checker maps to exactly one LLVM type string; variants that only exist
//! mid-inference (`Generic`, `Unknown`, `Error`) fall back to `ptr` since
//! they should never actually be emitted.

use crate::types::{PointerKind, Type};

pub fn llvm_type(ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::Bool => "i1".to_string(),
        Type::SignedInt(bits) | Type::UnsignedInt(bits) | Type::Tbb(bits) => format!("i{bits}"),
        Type::Float(32) => "float".to_string(),
        Type::Float(_) => "double".to_string(),
        Type::String | Type::Dyn => "ptr".to_string(),
        Type::Pointer { kind: PointerKind::Pinned, .. } => "ptr".to_string(),
        Type::Pointer { .. } => "ptr".to_string(),
        Type::Array { element, size: Some(n) } => format!("[{n} x {}]", llvm_type(element)),
        Type::Array { .. } => "ptr".to_string(),
        Type::Vector { component, dimension } => format!("<{dimension} x {}>", llvm_type(component)),
        Type::Struct { name, .. } => format!("%struct.{name}"),
        Type::Union { name, .. } => format!("%union.{name}"),
        Type::Result(inner) => format!("%result.{}", mangled_result_suffix(inner)),
        Type::Function { .. } => "ptr".to_string(),
        Type::Future(_) => "ptr".to_string(),
        Type::Generic(_) | Type::Unknown | Type::Error => "ptr".to_string(),
    }
}

/// Result types are emitted once per distinct payload type as
/// `%result.<suffix> = type { i1, <payload>, ptr }` (ok flag, value, error
/// message pointer) — `codegen::program` defines the struct the first time
/// it sees a given payload and reuses the name after that.
pub fn mangled_result_suffix(payload: &Type) -> String {
    llvm_type(payload).replace(['%', ' ', '[', ']', '<', '>', ',', '*'], "_")
}

/// The size in bytes of a value of this type, for `alloca`/struct layout
/// purposes. Pointers and opaque handles are always word-sized.
pub fn size_of(ty: &Type) -> u64 {
    match ty {
        Type::Void => 0,
        Type::Bool => 1,
        Type::SignedInt(bits) | Type::UnsignedInt(bits) | Type::Tbb(bits) => {
            (*bits as u64).div_ceil(8)
        }
        Type::Float(bits) => (*bits as u64) / 8,
        Type::Array { element, size: Some(n) } => size_of(element) * n,
        Type::Vector { component, dimension } => size_of(component) * (*dimension as u64),
        Type::Struct { fields, .. } => fields.iter().map(|f| size_of(&f.ty)).sum(),
        _ => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_types_map_to_their_llvm_integer_width() {
        assert_eq!(llvm_type(&Type::SignedInt(32)), "i32");
        assert_eq!(llvm_type(&Type::Tbb(8)), "i8");
        assert_eq!(llvm_type(&Type::Bool), "i1");
    }

    #[test]
    fn vectors_map_to_llvm_vector_types() {
        assert_eq!(
            llvm_type(&Type::Vector { component: Box::new(Type::Float(32)), dimension: 3 }),
            "<3 x float>"
        );
    }

    #[test]
    fn unresolved_type_variants_fall_back_to_a_pointer() {
        assert_eq!(llvm_type(&Type::Unknown), "ptr");
        assert_eq!(llvm_type(&Type::Generic("T".to_string())), "ptr");
    }
}
