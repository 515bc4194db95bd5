//! On-disk module image format.
//!
//! A module file (`*.mod`) is a bincode-encoded [`ModuleImage`]: a header
//! carrying a per-build unique identifier, the names of referenced modules,
//! attributes (whose type-valued arguments are hidden references), type
//! declarations, native requirements and compiled code.
//!
//! The image is produced by the managed toolchain; this crate only reads
//! it, apart from the trimmer copy path and tests.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Module file extension, without the dot.
pub const MODULE_EXTENSION: &str = "mod";

const MAGIC: [u8; 4] = *b"UBMI";

/// Current image format version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors reading or writing a module image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    Io { path: PathBuf, message: String },
    Decode { path: PathBuf, message: String },
    BadMagic { path: PathBuf },
    UnsupportedVersion { path: PathBuf, version: u32 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "could not read '{}': {message}", path.display())
            }
            Self::Decode { path, message } => {
                write!(f, "'{}' is not a valid module: {message}", path.display())
            }
            Self::BadMagic { path } => {
                write!(f, "'{}' is not a module file", path.display())
            }
            Self::UnsupportedVersion { path, version } => write!(
                f,
                "'{}' uses module format version {version}, expected {FORMAT_VERSION}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ImageError {}

/// Fixed header at the start of every image.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModuleHeader {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub name: String,
    /// Regenerated by every build of the module, even when nothing else
    /// changed.
    pub build_id: [u8; 16],
}

/// Value of an attribute argument.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AttrArg {
    Null,
    Str(String),
    Bool(bool),
    Int(i64),
    /// A type, possibly defined in another module.
    TypeRef { type_name: String, module: Option<String> },
    Array(Vec<AttrArg>),
}

impl AttrArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrArg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrArg::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn collect_modules<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            AttrArg::TypeRef {
                module: Some(module),
                ..
            } => out.push(module),
            AttrArg::Array(items) => {
                for item in items {
                    item.collect_modules(out);
                }
            }
            _ => {}
        }
    }
}

/// A named field or property argument.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NamedArg {
    pub name: String,
    pub value: AttrArg,
}

/// A custom attribute instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub type_name: String,
    pub ctor_args: Vec<AttrArg>,
    pub fields: Vec<NamedArg>,
    pub properties: Vec<NamedArg>,
}

impl Attribute {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ctor_args: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ctor_arg(mut self, arg: AttrArg) -> Self {
        self.ctor_args.push(arg);
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: AttrArg) -> Self {
        self.fields.push(NamedArg {
            name: name.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: AttrArg) -> Self {
        self.properties.push(NamedArg {
            name: name.into(),
            value,
        });
        self
    }

    /// Look up a named argument, properties first.
    pub fn named(&self, name: &str) -> Option<&AttrArg> {
        self.properties
            .iter()
            .chain(&self.fields)
            .find(|arg| arg.name == name)
            .map(|arg| &arg.value)
    }

    /// Modules named by type-valued arguments.
    pub fn referenced_modules(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for arg in &self.ctor_args {
            arg.collect_modules(&mut out);
        }
        for named in self.fields.iter().chain(&self.properties) {
            named.value.collect_modules(&mut out);
        }
        out
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Field,
    Property,
    Event,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MemberDecl {
    pub name: String,
    pub kind: MemberKind,
    pub attributes: Vec<Attribute>,
}

/// A type declaration with its members and nested types.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub members: Vec<MemberDecl>,
    pub nested: Vec<TypeDecl>,
}

impl TypeDecl {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            members: Vec::new(),
            nested: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_member(
        mut self,
        name: impl Into<String>,
        kind: MemberKind,
        attributes: Vec<Attribute>,
    ) -> Self {
        self.members.push(MemberDecl {
            name: name.into(),
            kind,
            attributes,
        });
        self
    }

    #[must_use]
    pub fn with_nested(mut self, nested: TypeDecl) -> Self {
        self.nested.push(nested);
        self
    }

    fn visit_attributes<'a>(&'a self, f: &mut impl FnMut(&'a Attribute)) {
        self.attributes.iter().for_each(&mut *f);
        for member in &self.members {
            member.attributes.iter().for_each(&mut *f);
        }
        for nested in &self.nested {
            nested.visit_attributes(f);
        }
    }
}

/// A native symbol that managed code calls into, and the managed member
/// that requires it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPoint {
    pub symbol: String,
    pub member: String,
}

/// A named blob embedded in the module.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub data: Vec<u8>,
}

/// Decoded module file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModuleImage {
    pub header: ModuleHeader,
    /// Names of directly referenced modules.
    pub references: Vec<String>,
    /// Module-level attributes.
    pub attributes: Vec<Attribute>,
    pub types: Vec<TypeDecl>,
    /// Native libraries named by foreign-function declarations.
    pub native_references: Vec<String>,
    pub entry_points: Vec<EntryPoint>,
    pub resources: Vec<Resource>,
    pub code: Vec<u8>,
}

impl ModuleImage {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            header: ModuleHeader {
                magic: MAGIC,
                format_version: FORMAT_VERSION,
                name: name.into(),
                build_id: [0; 16],
            },
            references: Vec::new(),
            attributes: Vec::new(),
            types: Vec::new(),
            native_references: Vec::new(),
            entry_points: Vec::new(),
            resources: Vec::new(),
            code: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    #[must_use]
    pub fn with_build_id(mut self, id: [u8; 16]) -> Self {
        self.header.build_id = id;
        self
    }

    #[must_use]
    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_type(mut self, decl: TypeDecl) -> Self {
        self.types.push(decl);
        self
    }

    #[must_use]
    pub fn with_native_reference(mut self, name: impl Into<String>) -> Self {
        self.native_references.push(name.into());
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, symbol: impl Into<String>, member: impl Into<String>) -> Self {
        self.entry_points.push(EntryPoint {
            symbol: symbol.into(),
            member: member.into(),
        });
        self
    }

    #[must_use]
    pub fn with_resource(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.resources.push(Resource {
            name: name.into(),
            data,
        });
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Every attribute in the module: module level, on types, on members
    /// and on nested types.
    pub fn all_attributes(&self) -> Vec<&Attribute> {
        let mut out: Vec<&Attribute> = self.attributes.iter().collect();
        for decl in &self.types {
            decl.visit_attributes(&mut |attr| out.push(attr));
        }
        out
    }

    /// Modules reached only through type-valued attribute arguments.
    pub fn attribute_references(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for attr in self.all_attributes() {
            for module in attr.referenced_modules() {
                if module != self.name() && !out.iter().any(|m| m == module) {
                    out.push(module.to_string());
                }
            }
        }
        out
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing plain owned data into a Vec cannot fail.
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, ImageError> {
        let image: ModuleImage = bincode::deserialize(bytes).map_err(|e| ImageError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if image.header.magic != MAGIC {
            return Err(ImageError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        if image.header.format_version != FORMAT_VERSION {
            return Err(ImageError::UnsupportedVersion {
                path: path.to_path_buf(),
                version: image.header.format_version,
            });
        }
        Ok(image)
    }

    pub fn read_from(path: &Path) -> Result<Self, ImageError> {
        let bytes = fs::read(path).map_err(|e| ImageError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_bytes(&bytes, path)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ImageError> {
        fs::write(path, self.to_bytes()).map_err(|e| ImageError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Encoding of the image with the per-build identifier cleared.
    ///
    /// Two builds of the same source produce equal normalized bytes.
    pub fn normalized_bytes(bytes: &[u8], path: &Path) -> Result<Vec<u8>, ImageError> {
        let mut image = Self::from_bytes(bytes, path)?;
        image.header.build_id = [0; 16];
        Ok(image.to_bytes())
    }
}

/// Reads module images from disk.
///
/// The seam lets tests and alternative front ends supply images without
/// going through the file system format.
pub trait ModuleReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<ModuleImage, ImageError>;
}

/// Reader for the native bincode image format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageReader;

impl ModuleReader for ImageReader {
    fn read(&self, path: &Path) -> Result<ModuleImage, ImageError> {
        ModuleImage::read_from(path)
    }
}
