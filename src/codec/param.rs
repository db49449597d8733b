//! Parameter types, values and the nested struct container.

use std::fmt;

use super::CodecError;

/// Closed enumeration of wire parameter types.
///
/// Each type is identified on the wire by a 1-byte tag (its "visual").
/// All multi-byte integers are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// Boolean, 1 byte, ASCII `'1'`/`'0'`.
    Boolean,
    /// Unsigned 8-bit number.
    Byte,
    /// Unsigned 16-bit number.
    Integer,
    /// Signed 16-bit two's-complement number.
    SignedInteger,
    /// Unsigned 32-bit number.
    Long,
    /// Signed 32-bit two's-complement number.
    SignedLong,
    /// Single character, 1 byte.
    Char,
    /// String with a 1-byte length prefix.
    String1,
    /// String with a 2-byte length prefix.
    String2,
    /// Nested struct with a 1-byte length prefix.
    Struct1,
    /// Nested struct with a 2-byte length prefix.
    Struct2,
}

impl ParameterType {
    /// The 1-byte wire tag for this type.
    pub fn visual(self) -> u8 {
        match self {
            Self::Boolean => b'B',
            Self::Byte => b'b',
            Self::Integer => b'i',
            Self::SignedInteger => b'I',
            Self::Long => b'l',
            Self::SignedLong => b'L',
            Self::Char => b'c',
            Self::String1 => b's',
            Self::String2 => b'S',
            Self::Struct1 => b't',
            Self::Struct2 => b'T',
        }
    }

    /// Look a type up by its wire tag.
    pub fn from_visual(tag: u8) -> Option<Self> {
        match tag {
            b'B' => Some(Self::Boolean),
            b'b' => Some(Self::Byte),
            b'i' => Some(Self::Integer),
            b'I' => Some(Self::SignedInteger),
            b'l' => Some(Self::Long),
            b'L' => Some(Self::SignedLong),
            b'c' => Some(Self::Char),
            b's' => Some(Self::String1),
            b'S' => Some(Self::String2),
            b't' => Some(Self::Struct1),
            b'T' => Some(Self::Struct2),
            _ => None,
        }
    }
}

/// A parameter value, tagged per wire type family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// Unsigned 8-bit value.
    Byte(u8),
    /// Unsigned 16-bit value.
    UInt16(u16),
    /// Signed 16-bit value.
    Int16(i16),
    /// Unsigned 32-bit value.
    UInt32(u32),
    /// Signed 32-bit value.
    Int32(i32),
    /// Single character value.
    Char(char),
    /// String value.
    String(String),
    /// Nested struct value.
    Struct(Struct),
}

impl Value {
    /// Whether this value is representable under the given wire type.
    fn matches(&self, ty: ParameterType) -> bool {
        matches!(
            (self, ty),
            (Value::Boolean(_), ParameterType::Boolean)
                | (Value::Byte(_), ParameterType::Byte)
                | (Value::UInt16(_), ParameterType::Integer)
                | (Value::Int16(_), ParameterType::SignedInteger)
                | (Value::UInt32(_), ParameterType::Long)
                | (Value::Int32(_), ParameterType::SignedLong)
                | (Value::Char(_), ParameterType::Char)
                | (Value::String(_), ParameterType::String1 | ParameterType::String2)
                | (Value::Struct(_), ParameterType::Struct1 | ParameterType::Struct2)
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Struct(v) => write!(f, "{v}"),
        }
    }
}

/// One named, typed value inside a frame or struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    name: u8,
    ty: ParameterType,
    value: Value,
}

impl Parameter {
    /// Create a parameter with an explicit wire type.
    ///
    /// Fails if the value is not representable under `ty`. Prefer the
    /// typed constructors when the default type choice is acceptable.
    pub fn new(name: u8, ty: ParameterType, value: Value) -> Result<Self, CodecError> {
        if !value.matches(ty) {
            return Err(CodecError::TypeMismatch(ty));
        }
        Ok(Self { name, ty, value })
    }

    /// A boolean parameter.
    pub fn boolean(name: u8, value: bool) -> Self {
        Self { name, ty: ParameterType::Boolean, value: Value::Boolean(value) }
    }

    /// An unsigned 8-bit parameter.
    pub fn byte(name: u8, value: u8) -> Self {
        Self { name, ty: ParameterType::Byte, value: Value::Byte(value) }
    }

    /// An unsigned 16-bit parameter.
    pub fn uint16(name: u8, value: u16) -> Self {
        Self { name, ty: ParameterType::Integer, value: Value::UInt16(value) }
    }

    /// A signed 16-bit parameter.
    pub fn int16(name: u8, value: i16) -> Self {
        Self { name, ty: ParameterType::SignedInteger, value: Value::Int16(value) }
    }

    /// An unsigned 32-bit parameter.
    pub fn uint32(name: u8, value: u32) -> Self {
        Self { name, ty: ParameterType::Long, value: Value::UInt32(value) }
    }

    /// A signed 32-bit parameter.
    pub fn int32(name: u8, value: i32) -> Self {
        Self { name, ty: ParameterType::SignedLong, value: Value::Int32(value) }
    }

    /// A single-character parameter.
    pub fn char(name: u8, value: char) -> Self {
        Self { name, ty: ParameterType::Char, value: Value::Char(value) }
    }

    /// A string parameter.
    ///
    /// Picks the 1-byte length prefix when the payload fits (the prefix
    /// counts the bytes plus the terminator), the 2-byte prefix otherwise.
    pub fn string(name: u8, value: impl Into<String>) -> Self {
        let value = value.into();
        let ty = if value.len() + 1 <= u8::MAX as usize {
            ParameterType::String1
        } else {
            ParameterType::String2
        };
        Self { name, ty, value: Value::String(value) }
    }

    /// A nested struct parameter.
    ///
    /// Picks the 1-byte length prefix when the encoded body fits, the
    /// 2-byte prefix otherwise.
    pub fn nested(name: u8, value: Struct) -> Self {
        let ty = if value.encoded_len() <= u8::MAX as usize {
            ParameterType::Struct1
        } else {
            ParameterType::Struct2
        };
        Self { name, ty, value: Value::Struct(value) }
    }

    /// The single-byte parameter name.
    pub fn name(&self) -> u8 {
        self.name
    }

    /// The wire type.
    pub fn param_type(&self) -> ParameterType {
        self.ty
    }

    /// The value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// The value as an unsigned 16-bit number.
    ///
    /// Coerces across the unsigned numeric families when the value fits.
    pub fn as_u16(&self) -> Option<u16> {
        match self.value {
            Value::Byte(v) => Some(v.into()),
            Value::UInt16(v) => Some(v),
            Value::UInt32(v) => u16::try_from(v).ok(),
            _ => None,
        }
    }

    /// The value as an unsigned 32-bit number.
    ///
    /// Coerces across the unsigned numeric families.
    pub fn as_u32(&self) -> Option<u32> {
        match self.value {
            Value::Byte(v) => Some(v.into()),
            Value::UInt16(v) => Some(v.into()),
            Value::UInt32(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a signed 32-bit number, if it is a signed type.
    pub fn as_i32(&self) -> Option<i32> {
        match self.value {
            Value::Int16(v) => Some(v.into()),
            Value::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a character, if it is one.
    pub fn as_char(&self) -> Option<char> {
        match self.value {
            Value::Char(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a nested struct, if it is one.
    pub fn as_struct(&self) -> Option<&Struct> {
        match &self.value {
            Value::Struct(v) => Some(v),
            _ => None,
        }
    }

    /// Encoded size in bytes: name, type tag and payload.
    pub(crate) fn encoded_len(&self) -> usize {
        let payload = match &self.value {
            Value::Boolean(_) | Value::Byte(_) | Value::Char(_) => 1,
            Value::UInt16(_) | Value::Int16(_) => 2,
            Value::UInt32(_) | Value::Int32(_) => 4,
            Value::String(s) => {
                let prefix = if self.ty == ParameterType::String1 { 1 } else { 2 };
                prefix + s.len() + 1
            }
            Value::Struct(st) => {
                let prefix = if self.ty == ParameterType::Struct1 { 1 } else { 2 };
                prefix + st.encoded_len()
            }
        };
        2 + payload
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}){}", self.name as char, self.ty.visual() as char, self.value)
    }
}

/// An ordered, name-keyed multi-map of parameters.
///
/// Unlike a frame, the same name may repeat inside a struct. Insertion
/// order is preserved and drives the wire layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Struct {
    parameters: Vec<Parameter>,
}

impl Struct {
    /// Create an empty struct.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter. Duplicate names are allowed.
    pub fn add(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    /// The first parameter with the given name, if any.
    pub fn get(&self, name: u8) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// All parameters with the given name, in insertion order.
    pub fn get_all(&self, name: u8) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(move |p| p.name() == name)
    }

    /// Whether any parameter carries the given name.
    pub fn contains(&self, name: u8) -> bool {
        self.get(name).is_some()
    }

    /// All parameters in insertion order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Number of parameters held.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the struct holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Encoded size of the struct body: count byte plus parameters.
    pub(crate) fn encoded_len(&self) -> usize {
        1 + self.parameters.iter().map(Parameter::encoded_len).sum::<usize>()
    }
}

impl fmt::Display for Struct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_visual_roundtrip() {
        for ty in [
            ParameterType::Boolean,
            ParameterType::Byte,
            ParameterType::Integer,
            ParameterType::SignedInteger,
            ParameterType::Long,
            ParameterType::SignedLong,
            ParameterType::Char,
            ParameterType::String1,
            ParameterType::String2,
            ParameterType::Struct1,
            ParameterType::Struct2,
        ] {
            assert_eq!(ParameterType::from_visual(ty.visual()), Some(ty));
        }
        assert_eq!(ParameterType::from_visual(b'x'), None);
        assert_eq!(ParameterType::from_visual(0x00), None);
    }

    #[test]
    fn test_new_checks_type_pairing() {
        assert!(Parameter::new(b'a', ParameterType::Integer, Value::UInt16(7)).is_ok());
        assert!(matches!(
            Parameter::new(b'a', ParameterType::Integer, Value::Boolean(true)),
            Err(CodecError::TypeMismatch(ParameterType::Integer))
        ));
    }

    #[test]
    fn test_string_prefix_selection() {
        // 254 bytes + terminator = 255, still fits the 1-byte prefix.
        let short = Parameter::string(b'a', "x".repeat(254));
        assert_eq!(short.param_type(), ParameterType::String1);

        // 255 bytes + terminator = 256, needs the 2-byte prefix.
        let long = Parameter::string(b'a', "x".repeat(255));
        assert_eq!(long.param_type(), ParameterType::String2);
    }

    #[test]
    fn test_struct_repeated_names() {
        let mut st = Struct::new();
        st.add(Parameter::byte(b'm', 1));
        st.add(Parameter::byte(b'm', 2));
        st.add(Parameter::byte(b'o', 3));

        assert_eq!(st.len(), 3);
        assert_eq!(st.get(b'm').and_then(Parameter::as_u16), Some(1));
        let all: Vec<_> = st.get_all(b'm').collect();
        assert_eq!(all.len(), 2);
        assert!(st.contains(b'o'));
        assert!(!st.contains(b'z'));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Parameter::byte(b'a', 9).as_u32(), Some(9));
        assert_eq!(Parameter::uint32(b'a', 70_000).as_u16(), None);
        assert_eq!(Parameter::uint32(b'a', 9).as_u16(), Some(9));
        assert_eq!(Parameter::int16(b'a', -5).as_i32(), Some(-5));
        assert_eq!(Parameter::int16(b'a', -5).as_u16(), None);
    }

    #[test]
    fn test_display() {
        let p = Parameter::uint16(b'n', 42);
        assert_eq!(p.to_string(), "n(i)42");
        let b = Parameter::boolean(b'f', true);
        assert_eq!(b.to_string(), "f(B)true");
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(Parameter::byte(b'a', 0).encoded_len(), 3);
        assert_eq!(Parameter::uint16(b'a', 0).encoded_len(), 4);
        assert_eq!(Parameter::int32(b'a', 0).encoded_len(), 6);
        // name + tag + 1-byte prefix + "hi" + terminator
        assert_eq!(Parameter::string(b'a', "hi").encoded_len(), 6);

        let mut st = Struct::new();
        st.add(Parameter::byte(b'x', 1));
        // count byte + one 3-byte parameter
        assert_eq!(st.encoded_len(), 4);
        // name + tag + 1-byte prefix + body
        assert_eq!(Parameter::nested(b'a', st).encoded_len(), 7);
    }
}
