use crate::jvm::verifier::{Operand, SlotType};
use crate::jvm::{Error, SymbolId, SymbolResolver};
use crate::util::Width;

/// Utility trait for rendering descriptors
///
/// Class names are only known to the resolver, so rendering needs one.
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self, resolver: &dyn SymbolResolver) -> Result<String, Error> {
        let mut string = String::new();
        self.render_to(resolver, &mut string)?;
        Ok(string)
    }

    /// Write the descriptor to a string
    fn render_to(&self, resolver: &dyn SymbolResolver, write_to: &mut String)
        -> Result<(), Error>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Descriptor character
    pub fn descriptor_char(&self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    /// Type code used by `newarray`
    pub fn array_type_code(&self) -> u8 {
        match self {
            BaseType::Boolean => 4,
            BaseType::Char => 5,
            BaseType::Float => 6,
            BaseType::Double => 7,
            BaseType::Byte => 8,
            BaseType::Short => 9,
            BaseType::Int => 10,
            BaseType::Long => 11,
        }
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

/// Declared type of a field, parameter, local variable, or return value
///
/// Array types are references whose class symbol names the array class (eg. `[I`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Reference(SymbolId),
}

impl FieldType {
    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType {
        FieldType::Base(BaseType::Double)
    }

    pub const fn boolean() -> FieldType {
        FieldType::Base(BaseType::Boolean)
    }

    pub const fn object(class: SymbolId) -> FieldType {
        FieldType::Reference(class)
    }

    /// Tag of the (first) slot a value of this type occupies on the stack
    ///
    /// Sub-word integral types are all represented as `int`.
    pub fn slot_type(&self) -> SlotType {
        match self {
            FieldType::Base(BaseType::Long) => SlotType::Long,
            FieldType::Base(BaseType::Double) => SlotType::Double,
            FieldType::Base(BaseType::Float) => SlotType::Float,
            FieldType::Base(_) => SlotType::Int,
            FieldType::Reference(class) => SlotType::Reference(Some(*class)),
        }
    }

    /// What a stack slot must hold to be used as a value of this type
    pub fn operand(&self) -> Operand {
        match self {
            FieldType::Base(BaseType::Long) => Operand::Long,
            FieldType::Base(BaseType::Double) => Operand::Double,
            FieldType::Base(BaseType::Float) => Operand::Float,
            FieldType::Base(_) => Operand::Int,
            FieldType::Reference(_) => Operand::Reference,
        }
    }
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base) => base.width(),
            FieldType::Reference(_) => 1,
        }
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(
        &self,
        resolver: &dyn SymbolResolver,
        write_to: &mut String,
    ) -> Result<(), Error> {
        match self {
            FieldType::Base(base) => write_to.push(base.descriptor_char()),
            FieldType::Reference(class) => {
                let name = resolver.class_name(*class)?;
                if name.starts_with('[') {
                    write_to.push_str(&name);
                } else {
                    write_to.push('L');
                    write_to.push_str(&name);
                    write_to.push(';');
                }
            }
        }
        Ok(())
    }
}

/// Parameter and return types of a method
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodType {
    pub parameters: Vec<FieldType>,

    /// Absent for `void` methods
    pub return_type: Option<FieldType>,
}

impl MethodType {
    /// Number of local variable slots taken by the parameters
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = usize::from(has_this_param);
        this_len + self.parameters.iter().map(Width::width).sum::<usize>()
    }
}

impl RenderDescriptor for MethodType {
    fn render_to(
        &self,
        resolver: &dyn SymbolResolver,
        write_to: &mut String,
    ) -> Result<(), Error> {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(resolver, write_to)?;
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(return_type) => return_type.render_to(resolver, write_to)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::SymbolTable;

    #[test]
    fn render_field_types() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let string = symbols.intern_name("java.lang.String");
        let strings = symbols.array_of(FieldType::object(string))?;

        assert_eq!(FieldType::long().render(&symbols)?, "J");
        assert_eq!(FieldType::object(string).render(&symbols)?, "Ljava/lang/String;");
        assert_eq!(FieldType::object(strings).render(&symbols)?, "[Ljava/lang/String;");
        Ok(())
    }

    #[test]
    fn render_method_type() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let object = symbols.intern_name("java/lang/Object");
        let method = MethodType {
            parameters: vec![FieldType::int(), FieldType::double(), FieldType::object(object)],
            return_type: None,
        };

        assert_eq!(method.render(&symbols)?, "(IDLjava/lang/Object;)V");
        assert_eq!(method.parameter_length(true), 5);
        Ok(())
    }
}
