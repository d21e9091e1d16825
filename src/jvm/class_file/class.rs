use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, Constant, Field, Method, Serialize, Version,
};
use crate::jvm::{ClassAccessFlags, Error};
use crate::util::OffsetVec;
use byteorder::WriteBytesExt;
use log::debug;
use std::fs;
use std::path::Path;

/// Lowered image of a [class file][0], ready to be written out
///
/// Every name in here is already a constant pool index.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug)]
pub struct ClassFile {
    pub version: Version,
    pub constants: OffsetVec<Constant>,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: ClassConstantIndex,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    pub const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Write the class file to disk
    ///
    /// The image is serialized in memory first, so a failure leaves no partial file behind.
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &bytes)?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::class_file::ConstantsPool;

    fn empty_class() -> Result<ClassFile, Error> {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class("Empty")?;
        let super_class = constants.get_class("java/lang/Object")?;
        Ok(ClassFile {
            version: Version::JAVA5,
            constants: constants.into_offset_vec(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        })
    }

    #[test]
    fn header_layout() -> Result<(), Error> {
        let bytes = empty_class()?.to_bytes()?;
        assert_eq!(bytes[0..4], ClassFile::MAGIC);
        assert_eq!(bytes[4..8], [0, 0, 0, 49]);

        // Two UTF-8 entries and two classes, counted from 1
        assert_eq!(bytes[8..10], [0, 5]);

        // Flags, this, super, and four empty tables
        let tail = &bytes[bytes.len() - 14..];
        assert_eq!(tail, &[0x00, 0x21, 0, 2, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn save_creates_directories() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("Empty.class");
        empty_class()?.save_to_path(&path, true)?;
        assert_eq!(fs::read(&path)?[0..4], ClassFile::MAGIC);
        Ok(())
    }
}
