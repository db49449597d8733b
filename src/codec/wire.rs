//! Wire-level frame encoding and decoding.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! +--------+-------------+-------------+-------+------------------+----------+
//! | Length | Target addr | Sender addr | Count | Parameters       | Checksum |
//! | 2 B    | 1 B len + n | 1 B len + n | 1 B   | subject, command | 1 B      |
//! |        |             |             |       | then extras      |          |
//! +--------+-------------+-------------+-------+------------------+----------+
//! ```
//!
//! The length field counts the whole buffer including itself and the
//! checksum; the checksum is the low 8 bits of the unsigned byte sum of
//! everything before it. Each parameter is a name byte, a type tag and a
//! type-specific payload.

use tracing::{info, warn};

use super::frame::{Address, Frame};
use super::param::{Parameter, ParameterType, Struct, Value};
use super::{CodecError, MAX_STRUCT_DEPTH};
use crate::core::constants::{PARAM_COMMAND, PARAM_SUBJECT};

/// Smallest well-formed frame: empty addresses, subject, command, checksum.
pub const MIN_FRAME_LEN: usize = 12;

/// Low 8 bits of the unsigned byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Outcome of a successful decode pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The buffer decoded to a frame addressed to us (or broadcast).
    Frame(Frame),
    /// The frame is well-formed but addressed to another node.
    ///
    /// A normal filtering outcome on a shared bus, not an error.
    NotForUs {
        /// The address the frame was for.
        target: Address,
    },
}

/// Serialize a frame to its checksummed wire representation.
///
/// When `sender_override` is given it replaces the frame's own sender
/// address on the wire; the frame itself is not modified. Extra
/// parameters are written in insertion order, so encode/decode round
/// trips are bit-exact.
pub fn encode_frame(frame: &Frame, sender_override: Option<&Address>) -> Result<Vec<u8>, CodecError> {
    let sender = sender_override.unwrap_or(frame.sender());

    let mut body = Vec::with_capacity(MIN_FRAME_LEN + 32);
    body.extend_from_slice(&[0, 0]); // length, patched below
    write_address(&mut body, frame.target())?;
    write_address(&mut body, sender)?;

    let count = frame.parameters().len() + 2;
    if count > u8::MAX as usize {
        return Err(CodecError::TooManyParameters(count));
    }
    body.push(count as u8);

    write_parameter(&mut body, frame.subject(), 0)?;
    write_parameter(&mut body, frame.command(), 0)?;
    for parameter in frame.parameters() {
        write_parameter(&mut body, parameter, 0)?;
    }

    let total = body.len() + 1;
    if total > u16::MAX as usize {
        return Err(CodecError::FrameTooLarge(total));
    }
    body[0..2].copy_from_slice(&(total as u16).to_be_bytes());
    body.push(checksum(&body));
    Ok(body)
}

/// Decode a received buffer into a frame.
///
/// Checks, in order: length consistency, the caller's `max_len` guard,
/// the checksum, then the target address. With an `accept` address a
/// frame that is neither for us nor broadcast yields
/// [`DecodeOutcome::NotForUs`] instead of an error.
pub fn decode_frame(
    bytes: &[u8],
    max_len: usize,
    accept: Option<&Address>,
) -> Result<DecodeOutcome, CodecError> {
    let mut reader = ByteReader::new(bytes);

    let declared = reader.read_u16()? as usize;
    if declared != bytes.len() {
        warn!(declared, actual = bytes.len(), "frame length consistency mismatch");
        return Err(CodecError::LengthMismatch { declared, actual: bytes.len() });
    }
    if declared > max_len {
        warn!(len = declared, max = max_len, "frame exceeds maximum accepted length");
        return Err(CodecError::Oversize { len: declared, max: max_len });
    }

    let expected = checksum(&bytes[..bytes.len() - 1]);
    let actual = bytes[bytes.len() - 1];
    if expected != actual {
        warn!(expected, actual, "checksum mismatch, dropping frame");
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    let target = read_address(&mut reader)?;
    if let Some(accept) = accept {
        if &target != accept && !target.is_broadcast() {
            info!(%target, us = %accept, "skipping frame for another node");
            return Ok(DecodeOutcome::NotForUs { target });
        }
    }
    let sender = read_address(&mut reader)?;

    let parameters = read_parameters(&mut reader, 0)?;

    let mut subject = None;
    let mut command = None;
    let mut extras: Vec<Parameter> = Vec::new();
    for parameter in parameters {
        match parameter.name() {
            PARAM_SUBJECT if subject.is_none() => subject = Some(parameter),
            PARAM_COMMAND if command.is_none() => command = Some(parameter),
            name => {
                if extras.iter().any(|p| p.name() == name) {
                    return Err(CodecError::DuplicateParameter(name));
                }
                extras.push(parameter);
            }
        }
    }
    let subject = subject.ok_or(CodecError::MissingSubject)?;
    let command = command.ok_or(CodecError::MissingCommand)?;

    Ok(DecodeOutcome::Frame(Frame::from_parts(target, sender, subject, command, extras)))
}

fn write_address(buf: &mut Vec<u8>, address: &Address) -> Result<(), CodecError> {
    if address.len() > u8::MAX as usize {
        return Err(CodecError::AddressTooLong(address.len()));
    }
    buf.push(address.len() as u8);
    buf.extend_from_slice(address.as_bytes());
    Ok(())
}

fn write_parameter(buf: &mut Vec<u8>, parameter: &Parameter, depth: usize) -> Result<(), CodecError> {
    let ty = parameter.param_type();
    buf.push(parameter.name());
    buf.push(ty.visual());
    match parameter.value() {
        Value::Boolean(v) => buf.push(if *v { b'1' } else { b'0' }),
        Value::Byte(v) => buf.push(*v),
        Value::UInt16(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Int16(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::UInt32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Char(c) => {
            let code = *c as u32;
            if code > u8::MAX as u32 {
                return Err(CodecError::CharOutOfRange(*c));
            }
            buf.push(code as u8);
        }
        Value::String(s) => {
            // The prefix reserves one byte for the terminator.
            let prefixed = s.len() + 1;
            match ty {
                ParameterType::String1 => {
                    if prefixed > u8::MAX as usize {
                        return Err(CodecError::TypeMismatch(ty));
                    }
                    buf.push(prefixed as u8);
                }
                _ => {
                    if prefixed > u16::MAX as usize {
                        return Err(CodecError::FrameTooLarge(prefixed));
                    }
                    buf.extend_from_slice(&(prefixed as u16).to_be_bytes());
                }
            }
            buf.extend_from_slice(s.as_bytes());
            buf.push(0x00);
        }
        Value::Struct(st) => {
            if depth + 1 > MAX_STRUCT_DEPTH {
                return Err(CodecError::DepthExceeded);
            }
            let mut nested = Vec::with_capacity(st.encoded_len());
            write_struct_body(&mut nested, st, depth + 1)?;
            match ty {
                ParameterType::Struct1 => {
                    if nested.len() > u8::MAX as usize {
                        return Err(CodecError::TypeMismatch(ty));
                    }
                    buf.push(nested.len() as u8);
                }
                _ => {
                    if nested.len() > u16::MAX as usize {
                        return Err(CodecError::FrameTooLarge(nested.len()));
                    }
                    buf.extend_from_slice(&(nested.len() as u16).to_be_bytes());
                }
            }
            buf.extend_from_slice(&nested);
        }
    }
    Ok(())
}

fn write_struct_body(buf: &mut Vec<u8>, st: &Struct, depth: usize) -> Result<(), CodecError> {
    if st.len() > u8::MAX as usize {
        return Err(CodecError::TooManyParameters(st.len()));
    }
    buf.push(st.len() as u8);
    for parameter in st.parameters() {
        write_parameter(buf, parameter, depth)?;
    }
    Ok(())
}

fn read_address(reader: &mut ByteReader<'_>) -> Result<Address, CodecError> {
    let len = reader.read_u8()? as usize;
    Ok(Address::new(reader.read_bytes(len)?))
}

fn read_parameters(reader: &mut ByteReader<'_>, depth: usize) -> Result<Vec<Parameter>, CodecError> {
    let count = reader.read_u8()? as usize;
    let mut parameters = Vec::with_capacity(count);
    for _ in 0..count {
        parameters.push(read_parameter(reader, depth)?);
    }
    Ok(parameters)
}

fn read_parameter(reader: &mut ByteReader<'_>, depth: usize) -> Result<Parameter, CodecError> {
    let name = reader.read_u8()?;
    let tag = reader.read_u8()?;
    let ty = ParameterType::from_visual(tag).ok_or(CodecError::UnknownTypeTag(tag))?;

    let value = match ty {
        ParameterType::Boolean => match reader.read_u8()? {
            b'1' => Value::Boolean(true),
            b'0' => Value::Boolean(false),
            other => return Err(CodecError::InvalidBoolean(other)),
        },
        ParameterType::Byte => Value::Byte(reader.read_u8()?),
        ParameterType::Integer => Value::UInt16(reader.read_u16()?),
        ParameterType::SignedInteger => Value::Int16(reader.read_i16()?),
        ParameterType::Long => Value::UInt32(reader.read_u32()?),
        ParameterType::SignedLong => Value::Int32(reader.read_i32()?),
        ParameterType::Char => Value::Char(reader.read_u8()? as char),
        ParameterType::String1 => {
            let len = reader.read_u8()? as usize;
            read_string(reader, len)?
        }
        ParameterType::String2 => {
            let len = reader.read_u16()? as usize;
            read_string(reader, len)?
        }
        ParameterType::Struct1 => {
            let len = reader.read_u8()? as usize;
            read_struct(reader, len, depth)?
        }
        ParameterType::Struct2 => {
            let len = reader.read_u16()? as usize;
            read_struct(reader, len, depth)?
        }
    };

    Parameter::new(name, ty, value)
}

fn read_string(reader: &mut ByteReader<'_>, prefixed_len: usize) -> Result<Value, CodecError> {
    // The prefix counts the payload plus one terminator byte.
    if prefixed_len == 0 {
        return Err(CodecError::InvalidString);
    }
    let payload = reader.read_bytes(prefixed_len - 1)?;
    let _terminator = reader.read_u8()?;
    let s = String::from_utf8(payload.to_vec()).map_err(|_| CodecError::InvalidString)?;
    Ok(Value::String(s))
}

fn read_struct(reader: &mut ByteReader<'_>, declared: usize, depth: usize) -> Result<Value, CodecError> {
    if depth + 1 > MAX_STRUCT_DEPTH {
        return Err(CodecError::DepthExceeded);
    }
    let start = reader.offset();
    let parameters = read_parameters(reader, depth + 1)?;
    let consumed = reader.offset() - start;
    if consumed != declared {
        return Err(CodecError::StructLengthMismatch { declared, actual: consumed });
    }
    let mut st = Struct::new();
    for parameter in parameters {
        st.add(parameter);
    }
    Ok(Value::Struct(st))
}

/// Cursor over a received byte buffer.
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self.bytes.get(self.offset).ok_or(CodecError::UnexpectedEof)?;
        self.offset += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let slice = self.bytes.get(self.offset..end).ok_or(CodecError::UnexpectedEof)?;
        self.offset = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16, CodecError> {
        let b = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
