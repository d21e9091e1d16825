use crate::jvm::{Error, FieldType, MethodType, RenderDescriptor};
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::fmt;

/// Opaque handle for an interned qualified name
///
/// Handles are only meaningful to the resolver that produced them.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("sym{}", self.0))
    }
}

/// Resolved field reference
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldSignature {
    /// Class declaring the field
    pub owner: SymbolId,

    /// Simple name of the field
    pub name: String,
    pub field_type: FieldType,
}

/// Resolved method reference
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodSignature {
    /// Class or interface declaring the method
    pub owner: SymbolId,

    /// Simple name of the method (`<init>` for constructors)
    pub name: String,
    pub descriptor: MethodType,

    /// Interface methods are referenced through `InterfaceMethodref` constants
    pub owner_is_interface: bool,
}

/// Source of every name and signature the assembler needs
///
/// The assembler never parses qualified names itself: it hands strings to the resolver and gets
/// back symbols, then asks the resolver for whatever it needs to know about those symbols. A
/// resolver is passed explicitly to every component that needs one, which keeps tests free to use
/// a small hand-built table.
///
/// Resolvers are not required to be thread-safe. Concurrent compilations should each use their
/// own resolver.
pub trait SymbolResolver {
    /// Intern a qualified name (dotted or slashed)
    fn intern_name(&self, qualified_name: &str) -> SymbolId;

    /// Text of a symbol, as it was first interned
    fn name(&self, symbol: SymbolId) -> Result<String, Error>;

    /// Internal binary name of a class symbol (eg. `java/lang/Object` or `[I`)
    fn class_name(&self, class: SymbolId) -> Result<String, Error>;

    /// Owner, name and type of a field symbol
    fn resolve_field_signature(&self, field: SymbolId) -> Result<FieldSignature, Error>;

    /// Owner, name, parameter and return types of a method symbol
    fn resolve_method_signature(&self, method: SymbolId) -> Result<MethodSignature, Error>;
}

enum Member {
    Field(FieldSignature),
    Method(MethodSignature),
}

/// Interning symbol table
///
/// Entries are only ever appended, so the table hands out symbols from a shared reference. Class
/// names are canonicalized to their dotted form, so `java/lang/Object` and `java.lang.Object`
/// intern to the same symbol.
pub struct SymbolTable {
    names: FrozenVec<String>,
    ids: FrozenMap<String, Box<SymbolId>>,
    members: FrozenMap<SymbolId, Box<Member>>,
    interfaces: FrozenMap<SymbolId, Box<bool>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            names: FrozenVec::new(),
            ids: FrozenMap::new(),
            members: FrozenMap::new(),
            interfaces: FrozenMap::new(),
        }
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.len() == 0
    }

    /// Intern a class name and mark it as an interface
    pub fn declare_interface(&self, qualified_name: &str) -> SymbolId {
        let symbol = self.intern_name(qualified_name);
        self.interfaces.insert(symbol, Box::new(true));
        symbol
    }

    /// Intern the array class whose elements have the given type
    pub fn array_of(&self, element: FieldType) -> Result<SymbolId, Error> {
        let mut descriptor = String::from("[");
        element.render_to(self, &mut descriptor)?;
        Ok(self.intern_name(&descriptor))
    }

    /// Declare a field on a class, returning the symbol for `owner.name`
    pub fn declare_field(&self, owner: SymbolId, name: &str, field_type: FieldType) -> SymbolId {
        let qualified = format!("{}.{}", self.raw_name(owner), name);
        let symbol = self.intern_name(&qualified);
        if self.members.get(&symbol).is_none() {
            self.members.insert(
                symbol,
                Box::new(Member::Field(FieldSignature {
                    owner,
                    name: name.to_owned(),
                    field_type,
                })),
            );
        }
        symbol
    }

    /// Declare a method on a class, returning the symbol for `owner.name(descriptor)`
    ///
    /// Overloads get distinct symbols since the descriptor is part of the qualified name.
    pub fn declare_method(
        &self,
        owner: SymbolId,
        name: &str,
        descriptor: MethodType,
    ) -> Result<SymbolId, Error> {
        let rendered = descriptor.render(self)?;
        let qualified = format!("{}.{}{}", self.raw_name(owner), name, rendered);
        let symbol = self.intern_name(&qualified);
        if self.members.get(&symbol).is_none() {
            let owner_is_interface = self.interfaces.get(&owner).copied().unwrap_or(false);
            self.members.insert(
                symbol,
                Box::new(Member::Method(MethodSignature {
                    owner,
                    name: name.to_owned(),
                    descriptor,
                    owner_is_interface,
                })),
            );
        }
        Ok(symbol)
    }

    fn raw_name(&self, symbol: SymbolId) -> &str {
        self.names.get(symbol.0 as usize).unwrap_or("")
    }

    fn canonical(qualified_name: &str) -> String {
        qualified_name.replace('/', ".")
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

impl SymbolResolver for SymbolTable {
    fn intern_name(&self, qualified_name: &str) -> SymbolId {
        let canonical = SymbolTable::canonical(qualified_name);
        if let Some(symbol) = self.ids.get(&canonical) {
            return *symbol;
        }
        let symbol = SymbolId(self.names.len() as u32);
        self.names.push(canonical.clone());
        self.ids.insert(canonical, Box::new(symbol));
        symbol
    }

    fn name(&self, symbol: SymbolId) -> Result<String, Error> {
        self.names
            .get(symbol.0 as usize)
            .map(str::to_owned)
            .ok_or(Error::UnknownSymbol(symbol))
    }

    fn class_name(&self, class: SymbolId) -> Result<String, Error> {
        if self.members.get(&class).is_some() {
            return Err(Error::NotAClass(class));
        }
        Ok(self.name(class)?.replace('.', "/"))
    }

    fn resolve_field_signature(&self, field: SymbolId) -> Result<FieldSignature, Error> {
        match self.members.get(&field) {
            Some(Member::Field(signature)) => Ok(signature.clone()),
            Some(Member::Method(_)) | None if self.names.get(field.0 as usize).is_some() => {
                Err(Error::NotAField(field))
            }
            _ => Err(Error::UnknownSymbol(field)),
        }
    }

    fn resolve_method_signature(&self, method: SymbolId) -> Result<MethodSignature, Error> {
        match self.members.get(&method) {
            Some(Member::Method(signature)) => Ok(signature.clone()),
            Some(Member::Field(_)) | None if self.names.get(method.0 as usize).is_some() => {
                Err(Error::NotAMethod(method))
            }
            _ => Err(Error::UnknownSymbol(method)),
        }
    }
}
