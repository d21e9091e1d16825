use crate::jvm::class_file::Serialize;
use byteorder::WriteBytesExt;
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// Java SE 5: the newest version still checked by the type-inferencing verifier, so no
    /// `StackMapTable` is required
    pub const JAVA5: Version = Version {
        minor_version: 0,
        major_version: 49,
    };

    /// Java SE 6
    pub const JAVA6: Version = Version {
        minor_version: 0,
        major_version: 50,
    };

    /// Java SE 8
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };

    /// Java SE 11
    pub const JAVA11: Version = Version {
        minor_version: 0,
        major_version: 55,
    };
}

impl Default for Version {
    fn default() -> Version {
        Version::JAVA5
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}
