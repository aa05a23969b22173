use crate::jtype::{AllocationType, PrimitiveType};
use crate::keys::{ClassId, Symbol};
use crate::rt::{BaseClass, ClassLike};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayComponent {
    Primitive(PrimitiveType),
    Reference(ClassId),
}

/// Synthesized on first use of an array type; the descriptor doubles as the
/// class name (`[I`, `[Ljava/lang/String;`).
pub struct ArrayClass {
    base: BaseClass,
    pub component: ArrayComponent,
}

impl ArrayClass {
    pub fn new(name: Symbol, object_class: ClassId, component: ArrayComponent) -> Self {
        Self {
            // Arrays answer with their descriptor for both name and signature.
            base: BaseClass::new_synthetic(name, name, Some(object_class)),
            component,
        }
    }

    pub fn element_kind(&self) -> AllocationType {
        match self.component {
            ArrayComponent::Primitive(p) => p.as_allocation_type(),
            ArrayComponent::Reference(_) => AllocationType::Reference,
        }
    }

    pub fn component_class(&self) -> Option<ClassId> {
        match self.component {
            ArrayComponent::Primitive(_) => None,
            ArrayComponent::Reference(id) => Some(id),
        }
    }
}

impl ClassLike for ArrayClass {
    fn base(&self) -> &BaseClass {
        &self.base
    }
}
