use crate::jvm::class_file::{ClassFile, ConstantValue, ConstantsPool, Field, Method, Serialize};
use crate::jvm::model::{ClassOptions, Literal, MethodDescriptor};
use crate::jvm::{
    ClassAccessFlags, Error, FieldAccessFlags, FieldType, IllegalState, MethodAccessFlags,
    RenderDescriptor, SymbolId, SymbolResolver,
};
use log::{debug, warn};
use std::collections::HashSet;
use std::io::Write;

/// Superclass of classes which never call [`ClassModel::set_extends_class_name`]
pub const DEFAULT_SUPERCLASS: &str = "java/lang/Object";

/// Class being assembled
///
/// The model is mutated through its setters and by completing [`MethodDescriptor`]s, then dumped
/// exactly once. Constants are added to the pool as members ask for them, so the dumped pool only
/// contains what the class actually references.
pub struct ClassModel<'r> {
    pub(crate) resolver: &'r dyn SymbolResolver,
    pub(crate) options: ClassOptions,
    pub(crate) constants: ConstantsPool,

    access_flags: ClassAccessFlags,
    name: Option<SymbolId>,
    super_class: Option<SymbolId>,
    interfaces: Vec<SymbolId>,
    fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,

    field_names: HashSet<String>,

    /// Name and descriptor of every completed method
    pub(crate) method_keys: HashSet<(String, String)>,

    /// Methods whose descriptor was dropped before completing successfully
    pub(crate) incomplete_methods: Vec<String>,
    dumped: bool,
}

impl<'r> ClassModel<'r> {
    pub fn new(resolver: &'r dyn SymbolResolver) -> ClassModel<'r> {
        ClassModel::with_options(resolver, ClassOptions::default())
    }

    pub fn with_options(resolver: &'r dyn SymbolResolver, options: ClassOptions) -> ClassModel<'r> {
        ClassModel {
            resolver,
            options,
            constants: ConstantsPool::new(),
            access_flags: ClassAccessFlags::empty(),
            name: None,
            super_class: None,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            field_names: HashSet::new(),
            method_keys: HashSet::new(),
            incomplete_methods: vec![],
            dumped: false,
        }
    }

    pub fn options(&self) -> &ClassOptions {
        &self.options
    }

    pub fn resolver(&self) -> &'r dyn SymbolResolver {
        self.resolver
    }

    pub fn is_dumped(&self) -> bool {
        self.dumped
    }

    /// Name the class (only once)
    pub fn set_class_name(
        &mut self,
        access_flags: ClassAccessFlags,
        class: SymbolId,
    ) -> Result<(), Error> {
        self.check_not_dumped()?;
        if self.name.is_some() {
            return Err(Error::IllegalState(IllegalState::ClassNameAlreadySet));
        }
        self.resolver.class_name(class)?;
        self.access_flags = access_flags;
        self.name = Some(class);
        Ok(())
    }

    /// Set the superclass (otherwise `java/lang/Object`)
    pub fn set_extends_class_name(&mut self, super_class: SymbolId) -> Result<(), Error> {
        self.check_not_dumped()?;
        self.resolver.class_name(super_class)?;
        self.super_class = Some(super_class);
        Ok(())
    }

    pub fn add_interface_name(&mut self, interface: SymbolId) -> Result<(), Error> {
        self.check_not_dumped()?;
        let name = self.resolver.class_name(interface)?;
        if self.interfaces.contains(&interface) {
            return Err(Error::DuplicateMember(name));
        }
        self.interfaces.push(interface);
        Ok(())
    }

    /// Class symbol, failing if the name is not set yet
    pub fn class_symbol(&self) -> Result<SymbolId, Error> {
        self.name
            .ok_or(Error::IllegalState(IllegalState::ClassNameNotSet))
    }

    /// Qualified name of the class, in dotted form
    pub fn get_class_name(&self) -> Result<String, Error> {
        let class = self.class_symbol()?;
        Ok(self.resolver.class_name(class)?.replace('/', "."))
    }

    /// Declare a field
    ///
    /// A constant value is only honoured by the loader on static fields, and is dropped (with a
    /// warning) on others.
    pub fn add_field_description(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        field_type: FieldType,
        constant_value: Option<Literal>,
    ) -> Result<(), Error> {
        self.check_not_dumped()?;
        if self.field_names.contains(name) {
            return Err(Error::DuplicateMember(name.to_owned()));
        }

        let descriptor = field_type.render(self.resolver)?;
        let mut attributes = vec![];
        if let Some(constant_value) = constant_value {
            if !constant_value.fits(&field_type, self.resolver)? {
                return Err(Error::ConstantTypeMismatch(name.to_owned()));
            }
            if access_flags.accepts_constant_value() {
                let index = constant_value.constant_index(&mut self.constants)?;
                attributes.push(self.constants.get_attribute(ConstantValue(index))?);
            } else {
                warn!("dropping constant value of non-static field {}", name);
            }
        }

        let field = Field {
            access_flags,
            name_index: self.constants.get_utf8(name)?,
            descriptor_index: self.constants.get_utf8(&descriptor)?,
            attributes,
        };
        self.fields.push(field);
        self.field_names.insert(name.to_owned());
        Ok(())
    }

    /// Start declaring a method
    ///
    /// The method is only added to the class once [`MethodDescriptor::complete`] succeeds. Dumping
    /// the class fails if a descriptor was dropped without completing.
    pub fn add_method_description<'c>(
        &'c mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        return_type: Option<FieldType>,
        throws: &[SymbolId],
    ) -> Result<MethodDescriptor<'c, 'r>, Error> {
        self.check_not_dumped()?;
        let class = self.class_symbol()?;
        for exception in throws {
            self.resolver.class_name(*exception)?;
        }
        MethodDescriptor::new(self, class, access_flags, name, return_type, throws.to_vec())
    }

    /// Lower the class into its class file form
    ///
    /// This can only be done once, since the constant pool is moved into the class file.
    pub fn to_class_file(&mut self) -> Result<ClassFile, Error> {
        self.check_not_dumped()?;
        let class = self.class_symbol()?;
        if let Some(method) = self.incomplete_methods.first() {
            return Err(Error::IncompleteMethod(method.clone()));
        }

        let this_name = self.resolver.class_name(class)?;
        let this_class = self.constants.get_class(&this_name)?;
        let super_name = match self.super_class {
            Some(super_class) => self.resolver.class_name(super_class)?,
            None => DEFAULT_SUPERCLASS.to_owned(),
        };
        let super_class = self.constants.get_class(&super_name)?;
        let mut interfaces = Vec::with_capacity(self.interfaces.len());
        for interface in &self.interfaces {
            let name = self.resolver.class_name(*interface)?;
            interfaces.push(self.constants.get_class(&name)?);
        }

        self.dumped = true;
        let constants = std::mem::take(&mut self.constants).into_offset_vec();
        debug!(
            "dumping class {} ({} constants, {} fields, {} methods)",
            this_name,
            constants.len(),
            self.fields.len(),
            self.methods.len()
        );
        Ok(ClassFile {
            version: self.options.version,
            constants,
            access_flags: self.access_flags.normalized(),
            this_class,
            super_class,
            interfaces,
            fields: std::mem::take(&mut self.fields),
            methods: std::mem::take(&mut self.methods),
            attributes: vec![],
        })
    }

    /// Serialize the class
    ///
    /// The class file is assembled in memory first, so nothing is written if assembly fails.
    pub fn dump<W: Write>(&mut self, output: &mut W) -> Result<(), Error> {
        let class_file = self.to_class_file()?;
        let bytes = class_file.to_bytes()?;
        output.write_all(&bytes)?;
        Ok(())
    }

    pub(crate) fn check_not_dumped(&self) -> Result<(), Error> {
        if self.dumped {
            Err(Error::IllegalState(IllegalState::ClassAlreadyDumped))
        } else {
            Ok(())
        }
    }
}
