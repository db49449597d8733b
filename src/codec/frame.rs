//! Bus addresses and the top-level frame type.

use std::fmt;

use super::{CodecError, Parameter};
use crate::core::constants::{BROADCAST_ADDRESS, MASTER_ADDRESS, PARAM_COMMAND, PARAM_SUBJECT};

/// A variable-length bus address, compared by value.
///
/// Carried on the wire with a 1-byte length prefix, so an address is at
/// most 255 bytes long (enforced at encode time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address(Vec<u8>);

impl Address {
    /// Create an address from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The reserved broadcast address `[0x00, 0x00]`.
    pub fn broadcast() -> Self {
        Self(BROADCAST_ADDRESS.to_vec())
    }

    /// The reserved master address `[0x00, 0x01]`.
    pub fn master() -> Self {
        Self(MASTER_ADDRESS.to_vec())
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the address in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the address is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this is the reserved broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ADDRESS
    }
}

impl From<&[u8]> for Address {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Address {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "N/A");
        }
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// One complete protocol message.
///
/// A frame carries a target and sender address, the mandatory subject and
/// command parameters (single characters named `'s'` and `'c'`), and any
/// number of extra parameters with unique names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    target: Address,
    sender: Address,
    subject: Parameter,
    command: Parameter,
    extras: Vec<Parameter>,
}

impl Frame {
    /// Create a frame for the given target with a subject and command.
    ///
    /// The sender address stays empty until set explicitly or overridden
    /// at encode time.
    pub fn new(target: Address, subject: char, command: char) -> Self {
        Self {
            target,
            sender: Address::default(),
            subject: Parameter::char(PARAM_SUBJECT, subject),
            command: Parameter::char(PARAM_COMMAND, command),
            extras: Vec::new(),
        }
    }

    /// Assemble a frame from decoded parts. Used by the codec.
    pub(crate) fn from_parts(
        target: Address,
        sender: Address,
        subject: Parameter,
        command: Parameter,
        extras: Vec<Parameter>,
    ) -> Self {
        Self { target, sender, subject, command, extras }
    }

    /// The target address.
    pub fn target(&self) -> &Address {
        &self.target
    }

    /// The sender address. Empty until set or filled in by a decode.
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Replace the target address. The address is copied.
    pub fn set_target(&mut self, target: &Address) {
        self.target = target.clone();
    }

    /// Replace the sender address. The address is copied.
    pub fn set_sender(&mut self, sender: &Address) {
        self.sender = sender.clone();
    }

    /// The mandatory subject parameter.
    pub fn subject(&self) -> &Parameter {
        &self.subject
    }

    /// The mandatory command parameter.
    pub fn command(&self) -> &Parameter {
        &self.command
    }

    /// The subject as a character, `'\0'` for a malformed subject value.
    pub fn subject_char(&self) -> char {
        self.subject.as_char().unwrap_or('\0')
    }

    /// The command as a character, `'\0'` for a malformed command value.
    pub fn command_char(&self) -> char {
        self.command.as_char().unwrap_or('\0')
    }

    /// Add an extra parameter.
    ///
    /// Names must be unique at the frame level; `'s'` and `'c'` are
    /// reserved for the subject/command convention. Violations are
    /// programming errors and reported, never silently merged.
    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<(), CodecError> {
        let name = parameter.name();
        if name == PARAM_SUBJECT || name == PARAM_COMMAND {
            return Err(CodecError::ReservedParameterName(name));
        }
        if self.has_parameter(name) {
            return Err(CodecError::DuplicateParameter(name));
        }
        self.extras.push(parameter);
        Ok(())
    }

    /// Whether an extra parameter with the given name is present.
    pub fn has_parameter(&self, name: u8) -> bool {
        self.parameter(name).is_some()
    }

    /// The extra parameter with the given name, if any.
    pub fn parameter(&self, name: u8) -> Option<&Parameter> {
        self.extras.iter().find(|p| p.name() == name)
    }

    /// All extra parameters in insertion order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.extras
    }

    /// Remove the extra parameter with the given name, returning it.
    pub fn remove_parameter(&mut self, name: u8) -> Option<Parameter> {
        let idx = self.extras.iter().position(|p| p.name() == name)?;
        Some(self.extras.remove(idx))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From:{} To:{} Subj:{} Cmd:{} Params:[",
            self.sender, self.target, self.subject, self.command
        )?;
        for (i, p) in self.extras.iter().enumerate() {
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
    fn test_address_equality_and_display() {
        let a = Address::new([0x12, 0xab]);
        let b = Address::from([0x12, 0xab]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "12:ab");
        assert_eq!(Address::default().to_string(), "N/A");
        assert!(Address::broadcast().is_broadcast());
        assert!(!Address::master().is_broadcast());
    }

    #[test]
    fn test_frame_construction() {
        let frame = Frame::new(Address::master(), 'n', 'p');
        assert_eq!(frame.subject_char(), 'n');
        assert_eq!(frame.command_char(), 'p');
        assert!(frame.sender().is_empty());
        assert!(frame.parameters().is_empty());
    }

    #[test]
    fn test_duplicate_extra_rejected() {
        let mut frame = Frame::new(Address::broadcast(), 't', 't');
        frame.add_parameter(Parameter::byte(b'x', 1)).unwrap();
        assert_eq!(
            frame.add_parameter(Parameter::byte(b'x', 2)),
            Err(CodecError::DuplicateParameter(b'x'))
        );
        // The first parameter is untouched.
        assert_eq!(frame.parameter(b'x').and_then(Parameter::as_u16), Some(1));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut frame = Frame::new(Address::broadcast(), 't', 't');
        assert_eq!(
            frame.add_parameter(Parameter::char(b's', 'x')),
            Err(CodecError::ReservedParameterName(b's'))
        );
        assert_eq!(
            frame.add_parameter(Parameter::char(b'c', 'x')),
            Err(CodecError::ReservedParameterName(b'c'))
        );
    }

    #[test]
    fn test_addresses_are_copied() {
        let mut frame = Frame::new(Address::broadcast(), 't', 't');
        let mut addr = Address::new(vec![0x0a, 0x0b]);
        frame.set_sender(&addr);
        addr = Address::new(vec![0xff]);
        let _ = addr;
        assert_eq!(frame.sender().as_bytes(), &[0x0a, 0x0b]);
    }

    #[test]
    fn test_remove_parameter() {
        let mut frame = Frame::new(Address::broadcast(), 't', 't');
        frame.add_parameter(Parameter::byte(b'x', 1)).unwrap();
        assert!(frame.remove_parameter(b'x').is_some());
        assert!(!frame.has_parameter(b'x'));
        assert!(frame.remove_parameter(b'x').is_none());
    }
}
