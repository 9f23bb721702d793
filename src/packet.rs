//! TFTP Protocol (Revision 2)
//! from https://datatracker.ietf.org/doc/html/rfc1350
//!
//! [`Packet`] is a checked view over a raw datagram; [`Repr`] is the
//! high-level form used to parse and emit it. Nothing here does I/O.

use core::str;

use heapless::Vec;

use crate::error::{Error, Result};

/// The max number of bytes sent at a time.
pub const DATA_SIZE: usize = 512;

/// Opcode plus block number (or error code).
pub const META_SIZE: usize = 4;

/// The largest datagram the protocol ever produces.
pub const PACKET_SIZE: usize = META_SIZE + DATA_SIZE;

/// A fixed-capacity buffer holding one outgoing packet.
pub type Datagram = Vec<u8, PACKET_SIZE>;

enum_with_unknown! {
    /// The five TFTP packet types. 2 bytes in length.
    pub enum Type(u16) {
        /// Read request (RRQ)
        Rrq = 0x1,
        /// Write request (WRQ)
        Wrq = 0x2,
        /// Data (DATA)
        Data = 0x3,
        /// Acknowledgement (ACK)
        Ack = 0x4,
        /// Error (ERROR)
        Error = 0x5
    }
}

enum_with_unknown! {
    /// Error codes carried by ERROR packets.
    pub enum ErrorCode(u16) {
        NotDefined = 0,
        FileNotFound = 1,
        AccessViolation = 2,
        DiskFull = 3,
        IllegalOperation = 4,
        UnknownTransferId = 5
    }
}

mod field {
    use core::ops::{Range, RangeFrom};

    pub const TYPE: Range<usize> = 0..2;
    pub const FILENAME: RangeFrom<usize> = 2..;
    pub const BLOCK: Range<usize> = 2..4;
    pub const CODE: Range<usize> = 2..4;
    pub const PAYLOAD: RangeFrom<usize> = 4..;
    pub const MSG: RangeFrom<usize> = 4..;
}

/// A TFTP packet.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Wrap a buffer without validating it. Accessors may panic on a
    /// buffer that [`check_len`](Self::check_len) would reject.
    pub const fn new_unchecked(buffer: T) -> Self {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure every field the packet type requires is present and
    /// terminated.
    pub fn check_len(&self) -> Result<()> {
        let buf = self.buffer.as_ref();
        let len = buf.len();
        if len < field::TYPE.end {
            return Err(Error::Malformed);
        }
        match self.type_() {
            Type::Rrq | Type::Wrq => {
                let (_, rest) = split_cstr(&buf[field::FILENAME]).ok_or(Error::Malformed)?;
                // Anything after the mode (RFC 2347 options) is ignored.
                split_cstr(rest).map(|_| ()).ok_or(Error::Malformed)
            }
            Type::Data if (META_SIZE..=PACKET_SIZE).contains(&len) => Ok(()),
            Type::Ack if len == META_SIZE => Ok(()),
            Type::Error if len > META_SIZE && memchr(&buf[field::MSG], 0).is_some() => Ok(()),
            _ => Err(Error::Malformed),
        }
    }

    /// Return the type of the packet.
    pub fn type_(&self) -> Type {
        read_be_u16(&self.buffer.as_ref()[field::TYPE]).into()
    }

    /// The requested filename of an RRQ or WRQ. Fails if the filename is not
    /// encoded in netascii.
    pub fn filename(&self) -> Result<&str> {
        match self.type_() {
            Type::Rrq | Type::Wrq => {
                let (filename, _) =
                    split_cstr(&self.buffer.as_ref()[field::FILENAME]).ok_or(Error::Malformed)?;
                netascii_from_u8(filename)
            }
            _ => Err(Error::Malformed),
        }
    }

    /// The transfer mode of an RRQ or WRQ.
    pub fn mode(&self) -> Result<&str> {
        match self.type_() {
            Type::Rrq | Type::Wrq => {
                let (_, rest) =
                    split_cstr(&self.buffer.as_ref()[field::FILENAME]).ok_or(Error::Malformed)?;
                let (mode, _) = split_cstr(rest).ok_or(Error::Malformed)?;
                netascii_from_u8(mode)
            }
            _ => Err(Error::Malformed),
        }
    }

    /// Reads the block number of a DATA or ACK packet. Panics if the packet is
    /// missing a block number.
    pub fn block(&self) -> u16 {
        read_be_u16(&self.buffer.as_ref()[field::BLOCK])
    }

    /// The payload of a DATA packet.
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_ref()[field::PAYLOAD]
    }

    pub fn error_code(&self) -> ErrorCode {
        read_be_u16(&self.buffer.as_ref()[field::CODE]).into()
    }

    /// The message of an ERROR packet, without its terminator.
    pub fn error_msg(&self) -> Result<&str> {
        let (msg, _) = split_cstr(&self.buffer.as_ref()[field::MSG]).ok_or(Error::Malformed)?;
        str::from_utf8(msg).map_err(|_| Error::Malformed)
    }
}

impl<T> Packet<T>
where
    T: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Set the type of the packet.
    pub fn set_type(&mut self, type_: Type) {
        self.buffer.as_mut()[field::TYPE].copy_from_slice(&u16::from(type_).to_be_bytes());
    }

    pub fn set_block(&mut self, block: u16) {
        self.buffer.as_mut()[field::BLOCK].copy_from_slice(&block.to_be_bytes());
    }

    pub fn set_code(&mut self, code: ErrorCode) {
        self.buffer.as_mut()[field::CODE].copy_from_slice(&u16::from(code).to_be_bytes());
    }

    /// Write the filename and mode of a request, each followed by a nul.
    pub fn set_request(&mut self, filename: &str, mode: &str) {
        let buf = &mut self.buffer.as_mut()[field::FILENAME];
        let mode_at = put_cstr(buf, filename);
        put_cstr(&mut buf[mode_at..], mode);
    }

    pub fn set_msg(&mut self, msg: &str) {
        put_cstr(&mut self.buffer.as_mut()[field::MSG], msg);
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// A high-level representation of a TFTP packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Repr<'a> {
    Rrq { filename: &'a str, mode: &'a str },
    Wrq { filename: &'a str, mode: &'a str },
    // data field of data may only be 512 bytes in length.
    Data { block: u16, data: &'a [u8] },
    Ack { block: u16 },
    Error { code: ErrorCode, msg: &'a str },
}

impl<'a> Repr<'a> {
    pub fn parse<T>(packet: &'a Packet<T>) -> Result<Self>
    where
        T: AsRef<[u8]>,
    {
        packet.check_len()?;
        match packet.type_() {
            Type::Rrq => Ok(Repr::Rrq {
                filename: packet.filename()?,
                mode: packet.mode()?,
            }),
            Type::Wrq => Ok(Repr::Wrq {
                filename: packet.filename()?,
                mode: packet.mode()?,
            }),
            Type::Data => Ok(Repr::Data {
                block: packet.block(),
                data: packet.data(),
            }),
            Type::Ack => Ok(Repr::Ack {
                block: packet.block(),
            }),
            Type::Error => Ok(Repr::Error {
                code: packet.error_code(),
                msg: packet.error_msg()?,
            }),
            Type::Unknown(_) => Err(Error::Malformed),
        }
    }

    pub fn type_(&self) -> Type {
        match self {
            Repr::Rrq { .. } => Type::Rrq,
            Repr::Wrq { .. } => Type::Wrq,
            Repr::Data { .. } => Type::Data,
            Repr::Ack { .. } => Type::Ack,
            Repr::Error { .. } => Type::Error,
        }
    }

    /// The exact number of bytes [`emit`](Self::emit) writes.
    pub fn buffer_len(&self) -> usize {
        match self {
            Repr::Rrq { filename, mode } | Repr::Wrq { filename, mode } => {
                field::FILENAME.start + filename.len() + 1 + mode.len() + 1
            }
            Repr::Data { data, .. } => META_SIZE + data.len(),
            Repr::Ack { .. } => META_SIZE,
            Repr::Error { msg, .. } => META_SIZE + msg.len() + 1,
        }
    }

    /// Emit into a buffer of at least [`buffer_len`](Self::buffer_len) bytes.
    pub fn emit<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_type(self.type_());
        match *self {
            Repr::Rrq { filename, mode } | Repr::Wrq { filename, mode } => {
                packet.set_request(filename, mode);
            }
            Repr::Data { block, data } => {
                packet.set_block(block);
                packet.data_mut()[..data.len()].copy_from_slice(data);
            }
            Repr::Ack { block } => {
                packet.set_block(block);
            }
            Repr::Error { code, msg } => {
                packet.set_code(code);
                packet.set_msg(msg);
            }
        }
    }

    /// Emit into a freshly allocated datagram.
    pub fn to_datagram(&self) -> Result<Datagram> {
        let mut buf = Datagram::new();
        buf.resize(self.buffer_len(), 0)
            .map_err(|_| Error::Exhausted)?;
        self.emit(&mut Packet::new_unchecked(&mut buf[..]));
        Ok(buf)
    }
}

fn read_be_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Split `buf` at its first nul, returning the bytes before it and the bytes
/// after it.
fn split_cstr(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    memchr(buf, 0).map(|end| (&buf[..end], &buf[end + 1..]))
}

/// Copy `s` and a trailing nul into `buf`, returning the bytes written.
fn put_cstr(buf: &mut [u8], s: &str) -> usize {
    let len = s.len();
    buf[..len].copy_from_slice(s.as_bytes());
    buf[len] = 0;
    len + 1
}

/// Converts a slice of bytes into a netascii string slice.
///
/// netascii, as defined in RFC 764, is a 8 bit extension of the printable
/// ascii characters and eight other control characters. A carriage return
/// must be followed by a line feed or a nul. A single trailing nul is
/// accepted and stripped.
pub fn netascii_from_u8(v: &[u8]) -> Result<&str> {
    let mut r = false;
    for (i, &b) in v.iter().enumerate() {
        match b {
            b'\0' if !r && i == v.len() - 1 => break,
            b'\0' | b'\n' if r => r = false,
            b'\r' if !r => r = true,
            b' '..=b'~' | b'\x07'..=b'\x0c' if !r => continue,
            _ => return Err(Error::Malformed),
        }
    }
    if r {
        return Err(Error::Malformed);
    }
    let v = v.strip_suffix(&[0]).unwrap_or(v);
    str::from_utf8(v).map_err(|_| Error::Malformed)
}

fn memchr<T>(buf: &[T], needle: T) -> Option<usize>
where
    T: core::cmp::PartialEq + core::marker::Copy,
{
    buf.iter().position(|&b| b == needle)
}
