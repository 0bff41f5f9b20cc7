// The DHCP/BOOTP wire format, as defined in RFC 2131 (message layout) and
// RFC 2132 (options). All multi-byte integer fields on the wire are
// network (big-endian) order.

use byteorder::{BigEndian, ByteOrder};
use num_derive::FromPrimitive;
use std::convert::TryFrom;
use std::fmt;
use std::net::Ipv4Addr;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const OP_IDX: usize = 0;
const XID_IDX: usize = 4;
const SECS_IDX: usize = 8;
const FLAGS_IDX: usize = 10;
const CIADDR_IDX: usize = 12;
const YIADDR_IDX: usize = 16;
const SIADDR_IDX: usize = 20;
const GIADDR_IDX: usize = 24;
const CHADDR_IDX: usize = 28;
const SNAME_IDX: usize = 44;
const FILE_IDX: usize = 108;
pub const HEADER_LEN: usize = 236;

const CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Fixed total size of every reply this server sends: the 236-byte header
/// plus a 26-byte options block (cookie + three 4-byte TLVs + END).
pub const REPLY_LEN: usize = HEADER_LEN + 4 + 3 + 6 + 6 + 6 + 1;

/// A DHCP protocol op-code, the first byte of every message.
///
/// `BOOTREQUEST` only appears in messages from a client; `BOOTREPLY` only
/// in messages from a server.
#[derive(FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    BOOTREQUEST = 1,
    BOOTREPLY = 2,
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        <Self as num_traits::FromPrimitive>::from_u8(n).ok_or(n)
    }
}

/// A DHCP message type, carried as the value of option 53.
#[derive(FromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        <Self as num_traits::FromPrimitive>::from_u8(n).ok_or(n)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A DHCP option code, as assigned by RFC 2132. Only the subset this server
/// inspects or emits is represented here; unrecognized codes are still
/// carried through `OptionCode::Other` so parsing never fails outright.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptionCode {
    Pad,
    SubnetMask,
    HostName,
    RequestedIpAddr,
    IpAddrLeaseTime,
    DhcpMessageType,
    ServerId,
    ClientIdentifier,
    End,
    Other(u8),
}

const CODE_PAD: u8 = 0;
const CODE_SUBNET_MASK: u8 = 1;
const CODE_HOST_NAME: u8 = 12;
const CODE_REQUESTED_IP_ADDR: u8 = 50;
const CODE_IP_ADDR_LEASE_TIME: u8 = 51;
const CODE_DHCP_MESSAGE_TYPE: u8 = 53;
const CODE_SERVER_ID: u8 = 54;
const CODE_CLIENT_IDENTIFIER: u8 = 61;
const CODE_END: u8 = 255;

impl From<u8> for OptionCode {
    fn from(n: u8) -> Self {
        match n {
            CODE_PAD => OptionCode::Pad,
            CODE_SUBNET_MASK => OptionCode::SubnetMask,
            CODE_HOST_NAME => OptionCode::HostName,
            CODE_REQUESTED_IP_ADDR => OptionCode::RequestedIpAddr,
            CODE_IP_ADDR_LEASE_TIME => OptionCode::IpAddrLeaseTime,
            CODE_DHCP_MESSAGE_TYPE => OptionCode::DhcpMessageType,
            CODE_SERVER_ID => OptionCode::ServerId,
            CODE_CLIENT_IDENTIFIER => OptionCode::ClientIdentifier,
            CODE_END => OptionCode::End,
            other => OptionCode::Other(other),
        }
    }
}

impl From<OptionCode> for u8 {
    fn from(c: OptionCode) -> u8 {
        match c {
            OptionCode::Pad => CODE_PAD,
            OptionCode::SubnetMask => CODE_SUBNET_MASK,
            OptionCode::HostName => CODE_HOST_NAME,
            OptionCode::RequestedIpAddr => CODE_REQUESTED_IP_ADDR,
            OptionCode::IpAddrLeaseTime => CODE_IP_ADDR_LEASE_TIME,
            OptionCode::DhcpMessageType => CODE_DHCP_MESSAGE_TYPE,
            OptionCode::ServerId => CODE_SERVER_ID,
            OptionCode::ClientIdentifier => CODE_CLIENT_IDENTIFIER,
            OptionCode::End => CODE_END,
            OptionCode::Other(n) => n,
        }
    }
}

/// A single parsed DHCP option: a tag plus its raw value bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigOption {
    pub code: OptionCode,
    pub value: Vec<u8>,
}

/// A DHCP protocol message as defined in RFC 2131.
///
/// Fields follow the RFC's naming. `htype`/`hlen`/`hops` are not exposed
/// since this server treats them as constants (ethernet, 6, 0).
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub op: OpCode,
    pub xid: u32,
    pub secs: u16,
    pub bdcast_flag: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    /// The full 16-byte hardware address field, zero-padded past `hlen`.
    pub chaddr: [u8; CHADDR_LEN],
    pub sname: String,
    pub file: String,
    pub options: Vec<ConfigOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTypeError {
    MissingOption,
    MissingValue,
    UnknownType(u8),
}

impl fmt::Display for MessageTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOption => write!(f, "required message type option is missing"),
            Self::MissingValue => write!(f, "required message type value is missing"),
            Self::UnknownType(typ) => write!(f, "unknown message type {}", typ),
        }
    }
}

impl Message {
    pub fn new() -> Self {
        Message {
            op: OpCode::BOOTREQUEST,
            xid: 0,
            secs: 0,
            bdcast_flag: false,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; CHADDR_LEN],
            sname: String::new(),
            file: String::new(),
            options: Vec::new(),
        }
    }

    /// Decodes a received datagram into a `Message`. Returns `None` on any
    /// malformed input: too short, wrong `op`, missing/garbled magic
    /// cookie, or a truncated option TLV. A `None` here means "drop the
    /// datagram silently", per RFC 2131's guidance to ignore unparseable
    /// input rather than reply with an error.
    ///
    /// Only ever decodes `BOOTREQUEST`s: this is what the server's read
    /// loop feeds incoming datagrams through, and spec.md §4.1 requires
    /// rejecting anything else. To decode a server-sent `BOOTREPLY` (for
    /// tests that round-trip an encoded reply through the wire format),
    /// use `from_reply_buffer` instead.
    pub fn from_buffer(buf: &[u8]) -> Option<Self> {
        Self::decode(buf, OpCode::BOOTREQUEST)
    }

    /// Decodes a `BOOTREPLY` datagram — the mirror image of `from_buffer`
    /// for messages this server itself produced. Production code never
    /// calls this: the server never receives its own replies.
    pub fn from_reply_buffer(buf: &[u8]) -> Option<Self> {
        Self::decode(buf, OpCode::BOOTREPLY)
    }

    fn decode(buf: &[u8], expected_op: OpCode) -> Option<Self> {
        if buf.len() < HEADER_LEN + MAGIC_COOKIE.len() {
            return None;
        }
        let op = OpCode::try_from(buf[OP_IDX]).ok()?;
        if op != expected_op {
            return None;
        }
        let (header, rest) = buf.split_at(HEADER_LEN);
        let (cookie, options) = rest.split_at(MAGIC_COOKIE.len());
        if cookie != MAGIC_COOKIE {
            return None;
        }

        let mut msg = Message::new();
        msg.op = op;
        msg.xid = BigEndian::read_u32(&header[XID_IDX..SECS_IDX]);
        msg.secs = BigEndian::read_u16(&header[SECS_IDX..FLAGS_IDX]);
        msg.bdcast_flag = header[FLAGS_IDX] & 0x80 != 0;
        msg.ciaddr = ipv4_at(header, CIADDR_IDX)?;
        msg.yiaddr = ipv4_at(header, YIADDR_IDX)?;
        msg.siaddr = ipv4_at(header, SIADDR_IDX)?;
        msg.giaddr = ipv4_at(header, GIADDR_IDX)?;
        msg.chaddr.copy_from_slice(&header[CHADDR_IDX..CHADDR_IDX + CHADDR_LEN]);
        msg.sname = buf_to_msg_string(&header[SNAME_IDX..FILE_IDX])?;
        msg.file = buf_to_msg_string(&header[FILE_IDX..HEADER_LEN])?;

        let mut cursor = OptionCursor::new(options);
        loop {
            match cursor.next() {
                Ok(Some(opt)) => msg.options.push(opt),
                Ok(None) => break,
                Err(()) => return None,
            }
        }

        Some(msg)
    }

    /// Returns a reference to this message's option with the given `code`,
    /// or `None` if it is absent. A linear scan is appropriate: DHCP
    /// messages typically carry well under twenty options.
    pub fn get_config_option(&self, code: OptionCode) -> Option<&ConfigOption> {
        self.options.iter().find(|opt| opt.code == code)
    }

    /// Returns this message's DHCP message type (option 53), or the
    /// specific reason it could not be determined.
    pub fn get_dhcp_type(&self) -> Result<MessageType, MessageTypeError> {
        let opt = self
            .get_config_option(OptionCode::DhcpMessageType)
            .ok_or(MessageTypeError::MissingOption)?;
        let value = *opt.value.first().ok_or(MessageTypeError::MissingValue)?;
        MessageType::try_from(value).map_err(MessageTypeError::UnknownType)
    }

    /// The client identifier per spec §3: option 61's bytes if present,
    /// otherwise the full `chaddr` field.
    pub fn client_id(&self) -> Vec<u8> {
        match self.get_config_option(OptionCode::ClientIdentifier) {
            Some(opt) => opt.value.clone(),
            None => self.chaddr.to_vec(),
        }
    }

    /// Serializes the fixed header. Used by both the generic encoder
    /// (tests, decode round-trips) and the reply-specific encoder below.
    fn serialize_header(&self, buf: &mut Vec<u8>) {
        buf.push(self.op.into());
        buf.push(1); // htype: ethernet
        buf.push(6); // hlen: 6-byte hardware address
        buf.push(0); // hops
        let mut xid_bytes = [0u8; 4];
        BigEndian::write_u32(&mut xid_bytes, self.xid);
        buf.extend_from_slice(&xid_bytes);
        let mut secs_bytes = [0u8; 2];
        BigEndian::write_u16(&mut secs_bytes, self.secs);
        buf.extend_from_slice(&secs_bytes);
        buf.push(if self.bdcast_flag { 0x80 } else { 0 });
        buf.push(0);
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        trunc_string_to_n_and_push(&self.sname, SNAME_LEN, buf);
        trunc_string_to_n_and_push(&self.file, FILE_LEN, buf);
    }

    /// Encodes this message generically: header, magic cookie, every
    /// option in `self.options` in order, then END. Used for requests in
    /// tests and for round-trip checks; server replies use
    /// `encode_reply` instead, which pins the exact option layout and
    /// total length spec.md §4.1 requires.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REPLY_LEN);
        self.serialize_header(&mut buf);
        buf.extend_from_slice(&MAGIC_COOKIE);
        for opt in &self.options {
            serialize_option(opt, &mut buf);
        }
        buf.push(CODE_END);
        buf
    }

    /// Encodes a server reply with the exact, fixed-size options layout
    /// required by spec.md §4.1: cookie, message-type, lease-time,
    /// subnet-mask, server-identifier, END. Always `REPLY_LEN` bytes.
    ///
    /// When `zero_lease_and_mask` is set (used for NAK, per RFC 2131
    /// §4.3.2), the lease-time and subnet-mask TLV slots are zeroed
    /// instead of populated; their tag bytes become PAD (0) and the
    /// slots carry no meaning, but the total length is unchanged so every
    /// reply is exactly `REPLY_LEN` bytes.
    pub fn encode_reply(
        &self,
        msg_type: MessageType,
        lease_seconds: u32,
        mask: Ipv4Addr,
        server_id: Ipv4Addr,
        zero_lease_and_mask: bool,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REPLY_LEN);
        self.serialize_header(&mut buf);
        buf.extend_from_slice(&MAGIC_COOKIE);

        buf.push(CODE_DHCP_MESSAGE_TYPE);
        buf.push(1);
        buf.push(msg_type.into());

        if zero_lease_and_mask {
            buf.extend_from_slice(&[0u8; 6]);
            buf.extend_from_slice(&[0u8; 6]);
        } else {
            buf.push(CODE_IP_ADDR_LEASE_TIME);
            buf.push(4);
            let mut lease_bytes = [0u8; 4];
            BigEndian::write_u32(&mut lease_bytes, lease_seconds);
            buf.extend_from_slice(&lease_bytes);

            buf.push(CODE_SUBNET_MASK);
            buf.push(4);
            buf.extend_from_slice(&mask.octets());
        }

        buf.push(CODE_SERVER_ID);
        buf.push(4);
        buf.extend_from_slice(&server_id.octets());

        buf.push(CODE_END);
        debug_assert_eq!(buf.len(), REPLY_LEN);
        buf
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new()
    }
}

fn serialize_option(opt: &ConfigOption, buf: &mut Vec<u8>) {
    buf.push(opt.code.into());
    let len = opt.value.len() as u8;
    if len > 0 {
        buf.push(len);
    }
    buf.extend_from_slice(&opt.value);
}

fn ipv4_at(buf: &[u8], start: usize) -> Option<Ipv4Addr> {
    if buf.len() < start + 4 {
        return None;
    }
    Some(Ipv4Addr::new(buf[start], buf[start + 1], buf[start + 2], buf[start + 3]))
}

fn buf_to_msg_string(buf: &[u8]) -> Option<String> {
    std::str::from_utf8(buf).ok().map(|s| s.trim_end_matches('\x00').to_string())
}

fn trunc_string_to_n_and_push(s: &str, n: usize, buffer: &mut Vec<u8>) {
    if s.len() > n {
        buffer.extend_from_slice(&s.as_bytes()[..n]);
        return;
    }
    buffer.extend_from_slice(s.as_bytes());
    buffer.resize(buffer.len() + (n - s.len()), 0);
}

/// A cursor over a TLV options block, as described in spec.md §4.1:
/// `PAD (0)` is a bare no-op byte, `END (255)` terminates, and every other
/// tag is followed by a length byte and that many value bytes.
struct OptionCursor<'a> {
    buf: &'a [u8],
}

impl<'a> OptionCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns `Ok(Some(opt))` for the next option, `Ok(None)` at END or
    /// end of buffer, or `Err(())` on a malformed TLV (a tag with no room
    /// for its length byte, or a length that runs past the end of the
    /// buffer) — the caller treats `Err` as "drop the whole datagram".
    fn next(&mut self) -> Result<Option<ConfigOption>, ()> {
        loop {
            let (&raw_code, rest) = match self.buf.split_first() {
                Some(v) => v,
                None => return Ok(None),
            };
            self.buf = rest;
            match OptionCode::from(raw_code) {
                OptionCode::End => return Ok(None),
                OptionCode::Pad => continue,
                code => {
                    let (&len, rest) = self.buf.split_first().ok_or(())?;
                    self.buf = rest;
                    let len = len as usize;
                    if self.buf.len() < len {
                        return Err(());
                    }
                    let (value, rest) = self.buf.split_at(len);
                    self.buf = rest;
                    return Ok(Some(ConfigOption { code, value: value.to_vec() }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_msg() -> Message {
        let mut msg = Message::new();
        msg.xid = 42;
        msg.secs = 1024;
        msg.yiaddr = Ipv4Addr::new(192, 168, 1, 1);
        msg.sname = String::from("relay.example.com");
        msg.file = String::from("boot.img");
        msg
    }

    #[test]
    fn serialize_returns_correct_bytes() {
        let mut msg = new_test_msg();
        msg.options.push(ConfigOption {
            code: OptionCode::SubnetMask,
            value: vec![255, 255, 255, 0],
        });

        let bytes = msg.serialize();

        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[7], 42);
        assert_eq!(bytes[16], 192);
        assert_eq!(bytes[19], 1);
        assert_eq!(bytes[44], b'r');
        assert_eq!(bytes[HEADER_LEN..HEADER_LEN + 4], MAGIC_COOKIE);
        assert_eq!(*bytes.last().unwrap(), 255);
    }

    #[test]
    fn serialize_then_deserialize_round_trips() {
        let mut msg = new_test_msg();
        msg.options.push(ConfigOption {
            code: OptionCode::SubnetMask,
            value: vec![255, 255, 255, 0],
        });
        msg.options
            .push(ConfigOption { code: OptionCode::ServerId, value: vec![10, 0, 0, 1] });

        assert_eq!(Message::from_buffer(&msg.serialize()), Some(msg));
    }

    #[test]
    fn from_buffer_rejects_too_short() {
        assert_eq!(Message::from_buffer(&[0u8; 10]), None);
    }

    #[test]
    fn from_buffer_rejects_wrong_op() {
        let mut buf = vec![2u8]; // BOOTREPLY, not BOOTREQUEST
        buf.resize(HEADER_LEN, 0);
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.push(CODE_END);
        assert_eq!(Message::from_buffer(&buf), None);
    }

    #[test]
    fn from_reply_buffer_accepts_bootreply_and_rejects_bootrequest() {
        let mut msg = new_test_msg();
        msg.op = OpCode::BOOTREPLY;
        let bytes = msg.serialize();
        assert_eq!(Message::from_reply_buffer(&bytes), Some(msg));

        let mut request = new_test_msg();
        request.op = OpCode::BOOTREQUEST;
        assert_eq!(Message::from_reply_buffer(&request.serialize()), None);
    }

    #[test]
    fn from_buffer_rejects_bad_cookie() {
        let mut buf = vec![1u8];
        buf.resize(HEADER_LEN, 0);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.push(CODE_END);
        assert_eq!(Message::from_buffer(&buf), None);
    }

    #[test]
    fn from_buffer_drops_on_truncated_option() {
        let mut buf = vec![1u8];
        buf.resize(HEADER_LEN, 0);
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.push(CODE_SUBNET_MASK);
        buf.push(4); // claims 4 value bytes but buffer ends here
        assert_eq!(Message::from_buffer(&buf), None);
    }

    #[test]
    fn encode_reply_is_always_reply_len() {
        let msg = Message::new();
        let offer = msg.encode_reply(
            MessageType::Offer,
            3600,
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 10),
            false,
        );
        assert_eq!(offer.len(), REPLY_LEN);

        let nak = msg.encode_reply(
            MessageType::Nak,
            3600,
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 10),
            true,
        );
        assert_eq!(nak.len(), REPLY_LEN);
    }

    #[test]
    fn encode_reply_zeroes_lease_and_mask_on_nak() {
        let msg = Message::new();
        let nak = msg.encode_reply(
            MessageType::Nak,
            3600,
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 10),
            true,
        );
        let cookie_end = HEADER_LEN + MAGIC_COOKIE.len();
        // message-type TLV (3 bytes) is present and meaningful.
        assert_eq!(nak[cookie_end], CODE_DHCP_MESSAGE_TYPE);
        // the next 12 bytes (lease-time and subnet-mask TLV slots) are zero.
        let zeroed = &nak[cookie_end + 3..cookie_end + 3 + 12];
        assert!(zeroed.iter().all(|&b| b == 0));
        // server-identifier TLV and END still follow, meaningfully.
        assert_eq!(nak[cookie_end + 3 + 12], CODE_SERVER_ID);
        assert_eq!(*nak.last().unwrap(), CODE_END);
    }

    #[test]
    fn get_dhcp_type_reports_missing_option() {
        let msg = Message::new();
        assert_eq!(msg.get_dhcp_type(), Err(MessageTypeError::MissingOption));
    }

    #[test]
    fn get_dhcp_type_reports_unknown_value() {
        let mut msg = Message::new();
        msg.options
            .push(ConfigOption { code: OptionCode::DhcpMessageType, value: vec![224] });
        assert_eq!(msg.get_dhcp_type(), Err(MessageTypeError::UnknownType(224)));
    }

    #[test]
    fn client_id_prefers_option_61() {
        let mut msg = Message::new();
        msg.chaddr = [0xAA; 16];
        msg.options.push(ConfigOption {
            code: OptionCode::ClientIdentifier,
            value: vec![1, 2, 3],
        });
        assert_eq!(msg.client_id(), vec![1, 2, 3]);
    }

    #[test]
    fn client_id_falls_back_to_chaddr() {
        let mut msg = Message::new();
        msg.chaddr = [0xAA; 16];
        assert_eq!(msg.client_id(), vec![0xAAu8; 16]);
    }
}
