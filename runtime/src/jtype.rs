use crate::error::VmError;
use crate::keys::Symbol;
use lasso::ThreadedRodeo;
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveType {
    pub fn values() -> &'static [PrimitiveType] {
        &[
            PrimitiveType::Boolean,
            PrimitiveType::Byte,
            PrimitiveType::Char,
            PrimitiveType::Short,
            PrimitiveType::Int,
            PrimitiveType::Long,
            PrimitiveType::Float,
            PrimitiveType::Double,
        ]
    }

    pub const fn java_name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Char => "char",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
        }
    }

    pub const fn descriptor_char(self) -> char {
        match self {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Char => 'C',
            PrimitiveType::Short => 'S',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
        }
    }

    pub const fn as_allocation_type(self) -> AllocationType {
        match self {
            PrimitiveType::Boolean => AllocationType::Boolean,
            PrimitiveType::Byte => AllocationType::Byte,
            PrimitiveType::Char => AllocationType::Char,
            PrimitiveType::Short => AllocationType::Short,
            PrimitiveType::Int => AllocationType::Int,
            PrimitiveType::Long => AllocationType::Long,
            PrimitiveType::Float => AllocationType::Float,
            PrimitiveType::Double => AllocationType::Double,
        }
    }

    /// Two operand/local slots in verified bytecode.
    pub const fn is_wide(self) -> bool {
        matches!(self, PrimitiveType::Long | PrimitiveType::Double)
    }
}

/// Storage shape of one field or array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AllocationType {
    Boolean = 0,
    Byte = 1,
    Char = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    Reference = 8,
}

impl AllocationType {
    pub const fn byte_size(self) -> usize {
        match self {
            AllocationType::Boolean | AllocationType::Byte => 1,
            AllocationType::Char | AllocationType::Short => 2,
            AllocationType::Int | AllocationType::Float => 4,
            AllocationType::Long | AllocationType::Double => 8,
            AllocationType::Reference => std::mem::size_of::<usize>(),
        }
    }
}

/// `newarray` atype operand values, straight from the instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ArrayType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
}

impl ArrayType {
    pub const fn as_primitive(self) -> PrimitiveType {
        match self {
            ArrayType::Boolean => PrimitiveType::Boolean,
            ArrayType::Char => PrimitiveType::Char,
            ArrayType::Float => PrimitiveType::Float,
            ArrayType::Double => PrimitiveType::Double,
            ArrayType::Byte => PrimitiveType::Byte,
            ArrayType::Short => PrimitiveType::Short,
            ArrayType::Int => PrimitiveType::Int,
            ArrayType::Long => PrimitiveType::Long,
        }
    }

    pub const fn descriptor(self) -> &'static str {
        match self {
            ArrayType::Boolean => "[Z",
            ArrayType::Char => "[C",
            ArrayType::Float => "[F",
            ArrayType::Double => "[D",
            ArrayType::Byte => "[B",
            ArrayType::Short => "[S",
            ArrayType::Int => "[I",
            ArrayType::Long => "[J",
        }
    }
}

/// Parsed JNI-form type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JavaType {
    Primitive(PrimitiveType),
    /// Internal-form class name (`java/lang/String`).
    Instance(Symbol),
    /// Full array descriptor (`[I`, `[Ljava/lang/String;`), kept whole so it
    /// doubles as the array class name.
    Array(Symbol),
}

impl JavaType {
    pub fn parse(desc: &str, interner: &ThreadedRodeo) -> Result<Self, VmError> {
        let mut chars = desc.chars();
        let (ty, rest) = Self::parse_partial(&mut chars, desc, interner)?;
        if rest != desc.len() {
            return Err(VmError::ClassFormat(format!(
                "trailing characters in type descriptor {desc:?}"
            )));
        }
        Ok(ty)
    }

    /// Parses one type starting at the front of `chars`; returns the type and
    /// how many bytes of `full` were consumed in total so far.
    fn parse_partial(
        chars: &mut std::str::Chars<'_>,
        full: &str,
        interner: &ThreadedRodeo,
    ) -> Result<(Self, usize), VmError> {
        let bad = || VmError::ClassFormat(format!("malformed type descriptor {full:?}"));
        let start = full.len() - chars.as_str().len();
        match chars.next().ok_or_else(bad)? {
            'Z' => Ok((JavaType::Primitive(PrimitiveType::Boolean), start + 1)),
            'B' => Ok((JavaType::Primitive(PrimitiveType::Byte), start + 1)),
            'C' => Ok((JavaType::Primitive(PrimitiveType::Char), start + 1)),
            'S' => Ok((JavaType::Primitive(PrimitiveType::Short), start + 1)),
            'I' => Ok((JavaType::Primitive(PrimitiveType::Int), start + 1)),
            'J' => Ok((JavaType::Primitive(PrimitiveType::Long), start + 1)),
            'F' => Ok((JavaType::Primitive(PrimitiveType::Float), start + 1)),
            'D' => Ok((JavaType::Primitive(PrimitiveType::Double), start + 1)),
            'L' => {
                let rest = chars.as_str();
                let semi = rest.find(';').ok_or_else(bad)?;
                let name = &rest[..semi];
                for _ in 0..=semi {
                    chars.next();
                }
                Ok((
                    JavaType::Instance(interner.get_or_intern(name)),
                    start + semi + 2,
                ))
            }
            '[' => {
                let (_, consumed) = Self::parse_partial(chars, full, interner)?;
                let whole = &full[start..consumed];
                Ok((JavaType::Array(interner.get_or_intern(whole)), consumed))
            }
            _ => Err(bad()),
        }
    }

    pub fn as_allocation_type(&self) -> AllocationType {
        match self {
            JavaType::Primitive(p) => p.as_allocation_type(),
            JavaType::Instance(_) | JavaType::Array(_) => AllocationType::Reference,
        }
    }

    pub const fn is_wide(&self) -> bool {
        matches!(
            self,
            JavaType::Primitive(PrimitiveType::Long) | JavaType::Primitive(PrimitiveType::Double)
        )
    }
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub params: Vec<JavaType>,
    /// `None` for `V`.
    pub ret: Option<JavaType>,
}

impl MethodDescriptor {
    pub fn parse(desc: &str, interner: &ThreadedRodeo) -> Result<Self, VmError> {
        let bad = || VmError::ClassFormat(format!("malformed method descriptor {desc:?}"));
        let close = desc.find(')').ok_or_else(bad)?;
        if !desc.starts_with('(') {
            return Err(bad());
        }

        let mut params = Vec::new();
        let params_str = &desc[1..close];
        let mut chars = params_str.chars();
        while !chars.as_str().is_empty() {
            let (ty, _) = JavaType::parse_partial(&mut chars, params_str, interner)?;
            params.push(ty);
        }

        let ret_str = &desc[close + 1..];
        let ret = match ret_str {
            "V" => None,
            _ => Some(JavaType::parse(ret_str, interner)?),
        };
        Ok(Self { params, ret })
    }

    /// Local-variable slots the parameters occupy, not counting `this`.
    pub fn param_slots(&self) -> usize {
        self.params
            .iter()
            .map(|p| if p.is_wide() { 2 } else { 1 })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("I", JavaType::Primitive(PrimitiveType::Int))]
    #[case("D", JavaType::Primitive(PrimitiveType::Double))]
    fn parses_primitives(#[case] desc: &str, #[case] expected: JavaType) {
        let interner = ThreadedRodeo::default();
        assert_eq!(JavaType::parse(desc, &interner).unwrap(), expected);
    }

    #[test]
    fn parses_instance_and_array_descriptors() {
        let interner = ThreadedRodeo::default();
        let ty = JavaType::parse("Ljava/lang/String;", &interner).unwrap();
        assert_eq!(
            ty,
            JavaType::Instance(interner.get_or_intern("java/lang/String"))
        );

        let arr = JavaType::parse("[[Ljava/lang/String;", &interner).unwrap();
        assert_eq!(
            arr,
            JavaType::Array(interner.get_or_intern("[[Ljava/lang/String;"))
        );
    }

    #[test]
    fn rejects_truncated_descriptors() {
        let interner = ThreadedRodeo::default();
        assert!(JavaType::parse("Ljava/lang/String", &interner).is_err());
        assert!(JavaType::parse("II", &interner).is_err());
        assert!(JavaType::parse("", &interner).is_err());
    }

    #[test]
    fn parses_method_descriptors() {
        let interner = ThreadedRodeo::default();
        let d = MethodDescriptor::parse("(IJLjava/lang/String;[B)V", &interner).unwrap();
        assert_eq!(d.params.len(), 4);
        assert!(d.ret.is_none());
        assert_eq!(d.param_slots(), 5);

        let d = MethodDescriptor::parse("()Ljava/lang/Object;", &interner).unwrap();
        assert!(d.params.is_empty());
        assert!(matches!(d.ret, Some(JavaType::Instance(_))));
    }
}
