//! The Type Registry: every value a [`crate::Container`] leaf can hold, and
//! the 4-byte little-endian tag each variant occupies on the wire.

use std::sync::Arc;

use crate::container::Container;

/// A complex number with component type `T`, stored real part first as the
/// wire format requires (`T` value, then `T` value).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

pub type Complex32 = Complex<f32>;
pub type Complex64 = Complex<f64>;

/// An opaque blob of bytes, cheaply shareable. Mirrors Karabo's
/// `std::pair<std::shared_ptr<char>, size_t>` `ByteArray`: the length always
/// travels with the handle, never relies on the backing allocation's own
/// capacity.
#[derive(Debug, Clone)]
pub struct ByteArray(pub Arc<Vec<u8>>);

impl ByteArray {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(bytes))
    }

    pub fn from_shared(bytes: Arc<Vec<u8>>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for ByteArray {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice() == other.0.as_slice()
    }
}

/// The 4-byte little-endian tag written before every leaf value.
///
/// Karabo's own numeric tag values are an implementation detail of that
/// codebase and are never observed over this crate's wire boundary (peers
/// are always other instances of this serializer), so the discriminants
/// below are this crate's own stable numbering, not a port of the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TypeTag {
    Bool = 0,
    Char = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    UInt8 = 6,
    UInt16 = 7,
    UInt32 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    ComplexFloat = 12,
    ComplexDouble = 13,
    String = 14,
    None = 15,
    Container = 16,
    ContainerPointer = 17,
    ByteArray = 18,
    Schema = 19,
    VectorBool = 20,
    VectorChar = 21,
    VectorInt8 = 22,
    VectorInt16 = 23,
    VectorInt32 = 24,
    VectorInt64 = 25,
    VectorUInt8 = 26,
    VectorUInt16 = 27,
    VectorUInt32 = 28,
    VectorUInt64 = 29,
    VectorFloat = 30,
    VectorDouble = 31,
    VectorComplexFloat = 32,
    VectorComplexDouble = 33,
    VectorString = 34,
    VectorNone = 35,
    VectorContainer = 36,
    VectorContainerPointer = 37,
}

impl TypeTag {
    pub fn from_u32(tag: u32) -> Option<Self> {
        use TypeTag::*;
        Some(match tag {
            0 => Bool,
            1 => Char,
            2 => Int8,
            3 => Int16,
            4 => Int32,
            5 => Int64,
            6 => UInt8,
            7 => UInt16,
            8 => UInt32,
            9 => UInt64,
            10 => Float,
            11 => Double,
            12 => ComplexFloat,
            13 => ComplexDouble,
            14 => String,
            15 => None,
            16 => Container,
            17 => ContainerPointer,
            18 => ByteArray,
            19 => Schema,
            20 => VectorBool,
            21 => VectorChar,
            22 => VectorInt8,
            23 => VectorInt16,
            24 => VectorInt32,
            25 => VectorInt64,
            26 => VectorUInt8,
            27 => VectorUInt16,
            28 => VectorUInt32,
            29 => VectorUInt64,
            30 => VectorFloat,
            31 => VectorDouble,
            32 => VectorComplexFloat,
            33 => VectorComplexDouble,
            34 => VectorString,
            35 => VectorNone,
            36 => VectorContainer,
            37 => VectorContainerPointer,
            _ => return None,
        })
    }
}

/// A typed leaf value. Large variants are boxed or held behind `Arc`/`Vec` so
/// `size_of::<Value>()` stays small regardless of which variant is active.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(u8),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    ComplexFloat(Complex32),
    ComplexDouble(Complex64),
    String(String),
    None,
    Container(Box<Container>),
    ContainerPointer(Arc<Container>),
    ByteArray(ByteArray),
    Schema(Box<crate::schema::Schema>),
    VectorBool(Vec<bool>),
    VectorChar(Vec<u8>),
    VectorInt8(Vec<i8>),
    VectorInt16(Vec<i16>),
    VectorInt32(Vec<i32>),
    VectorInt64(Vec<i64>),
    VectorUInt8(Vec<u8>),
    VectorUInt16(Vec<u16>),
    VectorUInt32(Vec<u32>),
    VectorUInt64(Vec<u64>),
    VectorFloat(Vec<f32>),
    VectorDouble(Vec<f64>),
    VectorComplexFloat(Vec<Complex32>),
    VectorComplexDouble(Vec<Complex64>),
    VectorString(Vec<String>),
    /// A vector of `none` carries no payload per element, just a count.
    VectorNone(usize),
    VectorContainer(Vec<Container>),
    VectorContainerPointer(Vec<Arc<Container>>),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        use Value::*;
        match self {
            Bool(_) => TypeTag::Bool,
            Char(_) => TypeTag::Char,
            Int8(_) => TypeTag::Int8,
            Int16(_) => TypeTag::Int16,
            Int32(_) => TypeTag::Int32,
            Int64(_) => TypeTag::Int64,
            UInt8(_) => TypeTag::UInt8,
            UInt16(_) => TypeTag::UInt16,
            UInt32(_) => TypeTag::UInt32,
            UInt64(_) => TypeTag::UInt64,
            Float(_) => TypeTag::Float,
            Double(_) => TypeTag::Double,
            ComplexFloat(_) => TypeTag::ComplexFloat,
            ComplexDouble(_) => TypeTag::ComplexDouble,
            String(_) => TypeTag::String,
            Value::None => TypeTag::None,
            Container(_) => TypeTag::Container,
            ContainerPointer(_) => TypeTag::ContainerPointer,
            ByteArray(_) => TypeTag::ByteArray,
            Schema(_) => TypeTag::Schema,
            VectorBool(_) => TypeTag::VectorBool,
            VectorChar(_) => TypeTag::VectorChar,
            VectorInt8(_) => TypeTag::VectorInt8,
            VectorInt16(_) => TypeTag::VectorInt16,
            VectorInt32(_) => TypeTag::VectorInt32,
            VectorInt64(_) => TypeTag::VectorInt64,
            VectorUInt8(_) => TypeTag::VectorUInt8,
            VectorUInt16(_) => TypeTag::VectorUInt16,
            VectorUInt32(_) => TypeTag::VectorUInt32,
            VectorUInt64(_) => TypeTag::VectorUInt64,
            VectorFloat(_) => TypeTag::VectorFloat,
            VectorDouble(_) => TypeTag::VectorDouble,
            VectorComplexFloat(_) => TypeTag::VectorComplexFloat,
            VectorComplexDouble(_) => TypeTag::VectorComplexDouble,
            VectorString(_) => TypeTag::VectorString,
            VectorNone(_) => TypeTag::VectorNone,
            VectorContainer(_) => TypeTag::VectorContainer,
            VectorContainerPointer(_) => TypeTag::VectorContainerPointer,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Container(c) => Some(c),
            Value::ContainerPointer(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_byte_array(&self) -> Option<&ByteArray> {
        match self {
            Value::ByteArray(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from!(Bool, bool);
impl_from!(Int8, i8);
impl_from!(Int16, i16);
impl_from!(Int32, i32);
impl_from!(Int64, i64);
impl_from!(UInt8, u8);
impl_from!(UInt16, u16);
impl_from!(UInt32, u32);
impl_from!(UInt64, u64);
impl_from!(Float, f32);
impl_from!(Double, f64);
impl_from!(String, String);
impl_from!(VectorBool, Vec<bool>);
impl_from!(VectorInt32, Vec<i32>);
impl_from!(VectorDouble, Vec<f64>);
impl_from!(VectorString, Vec<String>);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Value::Container(Box::new(v))
    }
}

impl From<Vec<Container>> for Value {
    fn from(v: Vec<Container>) -> Self {
        Value::VectorContainer(v)
    }
}

impl From<Arc<Container>> for Value {
    fn from(v: Arc<Container>) -> Self {
        Value::ContainerPointer(v)
    }
}

impl From<ByteArray> for Value {
    fn from(v: ByteArray) -> Self {
        Value::ByteArray(v)
    }
}
