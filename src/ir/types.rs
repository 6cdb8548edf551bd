//! Value types and target data layout

use std::fmt;

/// Floating-point formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    Half,
    BFloat,
    Single,
    Double,
    X86Fp80,
    Quad,
}

impl FloatKind {
    pub fn bits(&self) -> u32 {
        match self {
            FloatKind::Half | FloatKind::BFloat => 16,
            FloatKind::Single => 32,
            FloatKind::Double => 64,
            FloatKind::X86Fp80 => 80,
            FloatKind::Quad => 128,
        }
    }
}

impl fmt::Display for FloatKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FloatKind::Half => write!(f, "half"),
            FloatKind::BFloat => write!(f, "bfloat"),
            FloatKind::Single => write!(f, "float"),
            FloatKind::Double => write!(f, "double"),
            FloatKind::X86Fp80 => write!(f, "x86_fp80"),
            FloatKind::Quad => write!(f, "fp128"),
        }
    }
}

/// Number of lanes in a vector type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementCount {
    /// Exactly `n` lanes
    Fixed(u32),
    /// `n` lanes times a hardware factor only known at run time
    Scalable(u32),
}

impl ElementCount {
    /// The known minimum lane count
    pub fn min(&self) -> u32 {
        match self {
            ElementCount::Fixed(n) | ElementCount::Scalable(n) => *n,
        }
    }

    pub fn is_scalable(&self) -> bool {
        matches!(self, ElementCount::Scalable(_))
    }
}

/// A first-class type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    Float(FloatKind),
    Ptr,
    Vector { elem: Box<Type>, count: ElementCount },
    Struct(Vec<Type>),
}

impl Type {
    pub fn i1() -> Type {
        Type::Int(1)
    }

    pub fn i8() -> Type {
        Type::Int(8)
    }

    pub fn i32() -> Type {
        Type::Int(32)
    }

    pub fn i64() -> Type {
        Type::Int(64)
    }

    pub fn f32() -> Type {
        Type::Float(FloatKind::Single)
    }

    pub fn f64() -> Type {
        Type::Float(FloatKind::Double)
    }

    pub fn vector(elem: Type, lanes: u32) -> Type {
        Type::Vector { elem: Box::new(elem), count: ElementCount::Fixed(lanes) }
    }

    pub fn scalable_vector(elem: Type, min_lanes: u32) -> Type {
        Type::Vector { elem: Box::new(elem), count: ElementCount::Scalable(min_lanes) }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    /// Element type of a vector, or the type itself for scalars
    pub fn scalar_type(&self) -> &Type {
        match self {
            Type::Vector { elem, .. } => elem,
            other => other,
        }
    }

    /// Integer or vector of integers
    pub fn is_int_or_int_vector(&self) -> bool {
        self.scalar_type().is_int()
    }

    /// Float or vector of floats
    pub fn is_float_or_float_vector(&self) -> bool {
        self.scalar_type().is_float()
    }

    /// The type a comparison of two `self` operands produces
    pub fn compare_result(&self) -> Type {
        match self {
            Type::Vector { count, .. } => Type::Vector { elem: Box::new(Type::i1()), count: *count },
            _ => Type::i1(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float(kind) => write!(f, "{}", kind),
            Type::Ptr => write!(f, "ptr"),
            Type::Vector { elem, count: ElementCount::Fixed(n) } => write!(f, "<{} x {}>", n, elem),
            Type::Vector { elem, count: ElementCount::Scalable(n) } => {
                write!(f, "<vscale x {} x {}>", n, elem)
            }
            Type::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// Sizes and alignments of the compilation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pub pointer_size: u64,
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout { pointer_size: 8 }
    }
}

impl DataLayout {
    pub fn new(pointer_size: u64) -> Self {
        DataLayout { pointer_size }
    }

    /// Bytes actually written by a store of `ty`
    pub fn store_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void => 0,
            Type::Int(bits) => (*bits as u64).div_ceil(8),
            Type::Float(kind) => (kind.bits() as u64).div_ceil(8),
            Type::Ptr => self.pointer_size,
            Type::Vector { elem, count } => self.alloc_size(elem) * count.min() as u64,
            Type::Struct(_) => self.alloc_size(ty),
        }
    }

    /// ABI alignment of `ty`
    pub fn abi_align(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void => 1,
            Type::Int(_) | Type::Float(_) => self.store_size(ty).next_power_of_two().min(16),
            Type::Ptr => self.pointer_size,
            Type::Vector { .. } => self.store_size(ty).next_power_of_two().clamp(1, 64),
            Type::Struct(fields) => fields.iter().map(|f| self.abi_align(f)).max().unwrap_or(1),
        }
    }

    /// Distance between consecutive elements of `ty` in memory
    pub fn alloc_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset = align_to(offset, self.abi_align(field)) + self.alloc_size(field);
                }
                align_to(offset, self.abi_align(ty))
            }
            _ => align_to(self.store_size(ty), self.abi_align(ty)),
        }
    }

    /// Byte offset of field `index` inside a struct type
    pub fn field_offset(&self, fields: &[Type], index: usize) -> u64 {
        let mut offset = 0;
        for (i, field) in fields.iter().enumerate() {
            offset = align_to(offset, self.abi_align(field));
            if i == index {
                return offset;
            }
            offset += self.alloc_size(field);
        }
        offset
    }
}

fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_sizes() {
        let dl = DataLayout::default();
        assert_eq!(dl.alloc_size(&Type::i1()), 1);
        assert_eq!(dl.alloc_size(&Type::i32()), 4);
        assert_eq!(dl.alloc_size(&Type::f64()), 8);
        assert_eq!(dl.alloc_size(&Type::Float(FloatKind::X86Fp80)), 16);
        assert_eq!(dl.alloc_size(&Type::Ptr), 8);
    }

    #[test]
    fn test_struct_layout() {
        let dl = DataLayout::default();
        let identity = vec![Type::i32(), Type::Ptr, Type::Ptr];
        assert_eq!(dl.field_offset(&identity, 0), 0);
        assert_eq!(dl.field_offset(&identity, 1), 8);
        assert_eq!(dl.field_offset(&identity, 2), 16);
        assert_eq!(dl.alloc_size(&Type::Struct(identity)), 24);
    }

    #[test]
    fn test_vector_display() {
        assert_eq!(Type::vector(Type::f32(), 4).to_string(), "<4 x float>");
        assert_eq!(Type::scalable_vector(Type::i64(), 2).to_string(), "<vscale x 2 x i64>");
    }
}
