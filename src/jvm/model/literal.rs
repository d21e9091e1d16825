use crate::jvm::class_file::{ConstantIndex, ConstantsPool};
use crate::jvm::{BaseType, Error, FieldType, SymbolResolver};

/// Constant that can be loaded with `ldc`, or used as the initial value of a static field
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
}

impl Literal {
    /// `long` and `double` are loaded with `ldc2_w`
    pub fn is_wide(&self) -> bool {
        matches!(self, Literal::Long(_) | Literal::Double(_))
    }

    /// Can this literal be the value of a field of the given type?
    pub fn fits(
        &self,
        field_type: &FieldType,
        resolver: &dyn SymbolResolver,
    ) -> Result<bool, Error> {
        let fits = match (self, field_type) {
            (Literal::Int(_), FieldType::Base(base)) => !matches!(
                base,
                BaseType::Long | BaseType::Float | BaseType::Double
            ),
            (Literal::Float(_), FieldType::Base(BaseType::Float)) => true,
            (Literal::Long(_), FieldType::Base(BaseType::Long)) => true,
            (Literal::Double(_), FieldType::Base(BaseType::Double)) => true,
            (Literal::String(_), FieldType::Reference(class)) => {
                resolver.class_name(*class)? == "java/lang/String"
            }
            _ => false,
        };
        Ok(fits)
    }

    /// Get or insert the matching constant
    pub fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        let index = match self {
            Literal::Int(int) => constants.get_integer(*int)?,
            Literal::Float(float) => constants.get_float(*float)?,
            Literal::Long(long) => constants.get_long(*long)?,
            Literal::Double(double) => constants.get_double(*double)?,
            Literal::String(string) => constants.get_string(string)?.into(),
        };
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::SymbolTable;

    #[test]
    fn literals_fit_field_types() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let string = FieldType::object(symbols.intern_name("java.lang.String"));
        let object = FieldType::object(symbols.intern_name("java.lang.Object"));

        assert!(Literal::Int(1).fits(&FieldType::boolean(), &symbols)?);
        assert!(!Literal::Int(1).fits(&FieldType::long(), &symbols)?);
        assert!(Literal::Double(1.0).fits(&FieldType::double(), &symbols)?);
        assert!(Literal::String("hi".to_owned()).fits(&string, &symbols)?);
        assert!(!Literal::String("hi".to_owned()).fits(&object, &symbols)?);
        Ok(())
    }

    #[test]
    fn literals_are_pooled_once() -> Result<(), Error> {
        let mut constants = ConstantsPool::new();
        let first = Literal::Long(7).constant_index(&mut constants)?;
        let second = Literal::Long(7).constant_index(&mut constants)?;
        assert_eq!(first, second);
        assert_eq!(constants.len(), 1);
        Ok(())
    }
}
