//! ECMA-335 signature blobs (II.23.2).
//!
//! Decoding produces a [`SignatureType`] tree. Every malformed input is a
//! `BadImageFormat` error; nothing here panics on bad bytes.

use crate::error::{Result, SymbolTreeError};

use super::EntityHandle;

pub mod element_type {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1b;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

pub mod signature_header {
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;
}

/// Nesting bound for decoding; deeper blobs are rejected as malformed.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTypeCode {
    Void,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    String,
    IntPtr,
    UIntPtr,
    Object,
    TypedReference,
}

impl PrimitiveTypeCode {
    /// Simple name of the corresponding `System` type.
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveTypeCode::Void => "Void",
            PrimitiveTypeCode::Boolean => "Boolean",
            PrimitiveTypeCode::Char => "Char",
            PrimitiveTypeCode::SByte => "SByte",
            PrimitiveTypeCode::Byte => "Byte",
            PrimitiveTypeCode::Int16 => "Int16",
            PrimitiveTypeCode::UInt16 => "UInt16",
            PrimitiveTypeCode::Int32 => "Int32",
            PrimitiveTypeCode::UInt32 => "UInt32",
            PrimitiveTypeCode::Int64 => "Int64",
            PrimitiveTypeCode::UInt64 => "UInt64",
            PrimitiveTypeCode::Single => "Single",
            PrimitiveTypeCode::Double => "Double",
            PrimitiveTypeCode::String => "String",
            PrimitiveTypeCode::IntPtr => "IntPtr",
            PrimitiveTypeCode::UIntPtr => "UIntPtr",
            PrimitiveTypeCode::Object => "Object",
            PrimitiveTypeCode::TypedReference => "TypedReference",
        }
    }

    pub fn from_element_type(code: u8) -> Option<Self> {
        use element_type as et;
        Some(match code {
            et::VOID => PrimitiveTypeCode::Void,
            et::BOOLEAN => PrimitiveTypeCode::Boolean,
            et::CHAR => PrimitiveTypeCode::Char,
            et::I1 => PrimitiveTypeCode::SByte,
            et::U1 => PrimitiveTypeCode::Byte,
            et::I2 => PrimitiveTypeCode::Int16,
            et::U2 => PrimitiveTypeCode::UInt16,
            et::I4 => PrimitiveTypeCode::Int32,
            et::U4 => PrimitiveTypeCode::UInt32,
            et::I8 => PrimitiveTypeCode::Int64,
            et::U8 => PrimitiveTypeCode::UInt64,
            et::R4 => PrimitiveTypeCode::Single,
            et::R8 => PrimitiveTypeCode::Double,
            et::STRING => PrimitiveTypeCode::String,
            et::I => PrimitiveTypeCode::IntPtr,
            et::U => PrimitiveTypeCode::UIntPtr,
            et::OBJECT => PrimitiveTypeCode::Object,
            et::TYPEDBYREF => PrimitiveTypeCode::TypedReference,
            _ => return None,
        })
    }

    pub fn element_type(&self) -> u8 {
        use element_type as et;
        match self {
            PrimitiveTypeCode::Void => et::VOID,
            PrimitiveTypeCode::Boolean => et::BOOLEAN,
            PrimitiveTypeCode::Char => et::CHAR,
            PrimitiveTypeCode::SByte => et::I1,
            PrimitiveTypeCode::Byte => et::U1,
            PrimitiveTypeCode::Int16 => et::I2,
            PrimitiveTypeCode::UInt16 => et::U2,
            PrimitiveTypeCode::Int32 => et::I4,
            PrimitiveTypeCode::UInt32 => et::U4,
            PrimitiveTypeCode::Int64 => et::I8,
            PrimitiveTypeCode::UInt64 => et::U8,
            PrimitiveTypeCode::Single => et::R4,
            PrimitiveTypeCode::Double => et::R8,
            PrimitiveTypeCode::String => et::STRING,
            PrimitiveTypeCode::IntPtr => et::I,
            PrimitiveTypeCode::UIntPtr => et::U,
            PrimitiveTypeCode::Object => et::OBJECT,
            PrimitiveTypeCode::TypedReference => et::TYPEDBYREF,
        }
    }
}

/// One decoded signature element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureType {
    Primitive(PrimitiveTypeCode),
    Named {
        handle: EntityHandle,
        is_value_type: bool,
    },
    SzArray(Box<SignatureType>),
    Array {
        element: Box<SignatureType>,
        rank: u32,
    },
    Pointer(Box<SignatureType>),
    ByRef(Box<SignatureType>),
    GenericInstantiation {
        generic: Box<SignatureType>,
        arguments: Vec<SignatureType>,
    },
    FunctionPointer(Box<MethodSignature>),
    GenericTypeParameter(u32),
    GenericMethodParameter(u32),
    Modified {
        modifier: EntityHandle,
        unmodified: Box<SignatureType>,
        required: bool,
    },
    Pinned(Box<SignatureType>),
}

impl SignatureType {
    pub fn named(handle: EntityHandle) -> Self {
        SignatureType::Named {
            handle,
            is_value_type: false,
        }
    }

    pub fn value_type(handle: EntityHandle) -> Self {
        SignatureType::Named {
            handle,
            is_value_type: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub header: u8,
    pub generic_parameter_count: u32,
    pub return_type: SignatureType,
    pub parameter_types: Vec<SignatureType>,
}

impl MethodSignature {
    /// Static, non-generic method signature.
    pub fn new(return_type: SignatureType, parameter_types: Vec<SignatureType>) -> Self {
        Self {
            header: 0,
            generic_parameter_count: 0,
            return_type,
            parameter_types,
        }
    }

    pub fn with_generic_parameters(mut self, count: u32) -> Self {
        self.generic_parameter_count = count;
        if count > 0 {
            self.header |= signature_header::GENERIC;
        } else {
            self.header &= !signature_header::GENERIC;
        }
        self
    }

    pub fn is_generic(&self) -> bool {
        self.header & signature_header::GENERIC != 0
    }

    pub fn has_this(&self) -> bool {
        self.header & signature_header::HAS_THIS != 0
    }
}

/// Cursor over a signature blob.
pub struct BlobReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.position)
            .ok_or_else(|| SymbolTreeError::bad_image("unexpected end of signature blob"))?;
        self.position += 1;
        Ok(byte)
    }

    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or_else(|| SymbolTreeError::bad_image("unexpected end of signature blob"))
    }

    /// Reads an unsigned compressed integer (II.23.2).
    pub fn read_compressed_u32(&mut self) -> Result<u32> {
        let first = self.read_byte()? as u32;
        if first & 0x80 == 0 {
            return Ok(first);
        }
        if first & 0xc0 == 0x80 {
            let second = self.read_byte()? as u32;
            return Ok(((first & 0x3f) << 8) | second);
        }
        if first & 0xe0 == 0xc0 {
            let b1 = self.read_byte()? as u32;
            let b2 = self.read_byte()? as u32;
            let b3 = self.read_byte()? as u32;
            return Ok(((first & 0x1f) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }
        Err(SymbolTreeError::bad_image(format!(
            "invalid compressed integer lead byte 0x{:02x}",
            first
        )))
    }

    /// Reads a `TypeDefOrRefOrSpecEncoded` coded index.
    pub fn read_type_handle(&mut self) -> Result<EntityHandle> {
        let value = self.read_compressed_u32()?;
        let row = value >> 2;
        if row == 0 {
            return Err(SymbolTreeError::bad_image("nil type handle in signature"));
        }
        match value & 0x3 {
            0 => Ok(EntityHandle::TypeDefinition(row - 1)),
            1 => Ok(EntityHandle::TypeReference(row - 1)),
            2 => Ok(EntityHandle::TypeSpecification(row - 1)),
            tag => Err(SymbolTreeError::bad_image(format!(
                "invalid TypeDefOrRefOrSpec tag {}",
                tag
            ))),
        }
    }

    pub fn read_type(&mut self) -> Result<SignatureType> {
        self.read_type_at(0)
    }

    fn read_type_at(&mut self, depth: usize) -> Result<SignatureType> {
        use element_type as et;

        if depth > MAX_DEPTH {
            return Err(SymbolTreeError::bad_image("signature nested too deeply"));
        }
        let inner = |reader: &mut Self| reader.read_type_at(depth + 1).map(Box::new);

        let code = self.read_byte()?;
        if let Some(primitive) = PrimitiveTypeCode::from_element_type(code) {
            return Ok(SignatureType::Primitive(primitive));
        }

        match code {
            et::PTR => Ok(SignatureType::Pointer(inner(self)?)),
            et::BYREF => Ok(SignatureType::ByRef(inner(self)?)),
            et::VALUETYPE | et::CLASS => Ok(SignatureType::Named {
                handle: self.read_type_handle()?,
                is_value_type: code == et::VALUETYPE,
            }),
            et::VAR => Ok(SignatureType::GenericTypeParameter(self.read_compressed_u32()?)),
            et::MVAR => Ok(SignatureType::GenericMethodParameter(self.read_compressed_u32()?)),
            et::SZARRAY => Ok(SignatureType::SzArray(inner(self)?)),
            et::ARRAY => {
                let element = inner(self)?;
                let rank = self.read_compressed_u32()?;
                // Sizes and lower bounds do not contribute to the type name.
                let sizes = self.read_compressed_u32()?;
                for _ in 0..sizes {
                    self.read_compressed_u32()?;
                }
                let lower_bounds = self.read_compressed_u32()?;
                for _ in 0..lower_bounds {
                    self.read_compressed_u32()?;
                }
                Ok(SignatureType::Array { element, rank })
            }
            et::GENERICINST => {
                let kind = self.read_byte()?;
                if kind != et::CLASS && kind != et::VALUETYPE {
                    return Err(SymbolTreeError::bad_image(format!(
                        "invalid generic instantiation kind 0x{:02x}",
                        kind
                    )));
                }
                let generic = SignatureType::Named {
                    handle: self.read_type_handle()?,
                    is_value_type: kind == et::VALUETYPE,
                };
                let count = self.read_compressed_u32()?;
                if count == 0 {
                    return Err(SymbolTreeError::bad_image(
                        "generic instantiation without arguments",
                    ));
                }
                let mut arguments = Vec::with_capacity((count as usize).min(self.remaining()));
                for _ in 0..count {
                    arguments.push(self.read_type_at(depth + 1)?);
                }
                Ok(SignatureType::GenericInstantiation {
                    generic: Box::new(generic),
                    arguments,
                })
            }
            et::FNPTR => Ok(SignatureType::FunctionPointer(Box::new(
                self.read_method_signature_at(depth + 1)?,
            ))),
            et::CMOD_REQD | et::CMOD_OPT => {
                let modifier = self.read_type_handle()?;
                Ok(SignatureType::Modified {
                    modifier,
                    unmodified: inner(self)?,
                    required: code == et::CMOD_REQD,
                })
            }
            et::PINNED => Ok(SignatureType::Pinned(inner(self)?)),
            other => Err(SymbolTreeError::bad_image(format!(
                "unexpected element type 0x{:02x}",
                other
            ))),
        }
    }

    pub fn read_method_signature(&mut self) -> Result<MethodSignature> {
        self.read_method_signature_at(0)
    }

    fn read_method_signature_at(&mut self, depth: usize) -> Result<MethodSignature> {
        let header = self.read_byte()?;
        let generic_parameter_count = if header & signature_header::GENERIC != 0 {
            self.read_compressed_u32()?
        } else {
            0
        };
        let parameter_count = self.read_compressed_u32()?;
        let return_type = self.read_type_at(depth)?;

        let mut parameter_types =
            Vec::with_capacity((parameter_count as usize).min(self.remaining()));
        for _ in 0..parameter_count {
            if self.peek_byte()? == element_type::SENTINEL {
                self.read_byte()?;
            }
            parameter_types.push(self.read_type_at(depth)?);
        }

        Ok(MethodSignature {
            header,
            generic_parameter_count,
            return_type,
            parameter_types,
        })
    }
}

pub fn decode_type(blob: &[u8]) -> Result<SignatureType> {
    BlobReader::new(blob).read_type()
}

pub fn decode_method_signature(blob: &[u8]) -> Result<MethodSignature> {
    BlobReader::new(blob).read_method_signature()
}

/// Writes signature blobs. Used to produce metadata images.
#[derive(Debug, Default)]
pub struct SignatureEncoder {
    buffer: Vec<u8>,
}

impl SignatureEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_compressed_u32(&mut self, value: u32) -> &mut Self {
        if value < 0x80 {
            self.buffer.push(value as u8);
        } else if value < 0x4000 {
            self.buffer.push(0x80 | (value >> 8) as u8);
            self.buffer.push(value as u8);
        } else {
            self.buffer.push(0xc0 | ((value >> 24) & 0x1f) as u8);
            self.buffer.push((value >> 16) as u8);
            self.buffer.push((value >> 8) as u8);
            self.buffer.push(value as u8);
        }
        self
    }

    pub fn write_type_handle(&mut self, handle: EntityHandle) -> &mut Self {
        let (row, tag) = match handle {
            EntityHandle::TypeDefinition(row) => (row, 0),
            EntityHandle::TypeReference(row) => (row, 1),
            EntityHandle::TypeSpecification(row) => (row, 2),
        };
        self.write_compressed_u32(((row + 1) << 2) | tag)
    }

    pub fn write_type(&mut self, ty: &SignatureType) -> &mut Self {
        use element_type as et;

        match ty {
            SignatureType::Primitive(primitive) => self.buffer.push(primitive.element_type()),
            SignatureType::Named {
                handle,
                is_value_type,
            } => {
                self.buffer
                    .push(if *is_value_type { et::VALUETYPE } else { et::CLASS });
                self.write_type_handle(*handle);
            }
            SignatureType::SzArray(element) => {
                self.buffer.push(et::SZARRAY);
                self.write_type(element);
            }
            SignatureType::Array { element, rank } => {
                self.buffer.push(et::ARRAY);
                self.write_type(element);
                self.write_compressed_u32(*rank);
                self.write_compressed_u32(0);
                self.write_compressed_u32(0);
            }
            SignatureType::Pointer(element) => {
                self.buffer.push(et::PTR);
                self.write_type(element);
            }
            SignatureType::ByRef(element) => {
                self.buffer.push(et::BYREF);
                self.write_type(element);
            }
            SignatureType::GenericInstantiation { generic, arguments } => {
                self.buffer.push(et::GENERICINST);
                self.write_type(generic);
                self.write_compressed_u32(arguments.len() as u32);
                for argument in arguments {
                    self.write_type(argument);
                }
            }
            SignatureType::FunctionPointer(signature) => {
                self.buffer.push(et::FNPTR);
                self.write_method_signature(signature);
            }
            SignatureType::GenericTypeParameter(index) => {
                self.buffer.push(et::VAR);
                self.write_compressed_u32(*index);
            }
            SignatureType::GenericMethodParameter(index) => {
                self.buffer.push(et::MVAR);
                self.write_compressed_u32(*index);
            }
            SignatureType::Modified {
                modifier,
                unmodified,
                required,
            } => {
                self.buffer
                    .push(if *required { et::CMOD_REQD } else { et::CMOD_OPT });
                self.write_type_handle(*modifier);
                self.write_type(unmodified);
            }
            SignatureType::Pinned(element) => {
                self.buffer.push(et::PINNED);
                self.write_type(element);
            }
        }
        self
    }

    pub fn write_method_signature(&mut self, signature: &MethodSignature) -> &mut Self {
        self.buffer.push(signature.header);
        if signature.is_generic() {
            self.write_compressed_u32(signature.generic_parameter_count);
        }
        self.write_compressed_u32(signature.parameter_types.len() as u32);
        self.write_type(&signature.return_type);
        for parameter in &signature.parameter_types {
            self.write_type(parameter);
        }
        self
    }
}

pub fn encode_type(ty: &SignatureType) -> Vec<u8> {
    let mut encoder = SignatureEncoder::new();
    encoder.write_type(ty);
    encoder.into_bytes()
}

pub fn encode_method_signature(signature: &MethodSignature) -> Vec<u8> {
    let mut encoder = SignatureEncoder::new();
    encoder.write_method_signature(signature);
    encoder.into_bytes()
}
