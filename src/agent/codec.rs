//! BER codec and SNMP v1/v2c message framing: tag/length/value primitives,
//! OID sub-identifier coding, and the message model the agent dispatches on.

use thiserror::Error;

// universal tags
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
// application tags
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
// v2c varbind exceptions
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;
// PDU tags
const TAG_GET_REQUEST: u8 = 0xA0;
const TAG_GET_NEXT_REQUEST: u8 = 0xA1;
const TAG_GET_RESPONSE: u8 = 0xA2;
const TAG_SET_REQUEST: u8 = 0xA3;
const TAG_GET_BULK_REQUEST: u8 = 0xA5;

// error-status codes
pub const ERR_NO_ERROR: i64 = 0;
pub const ERR_NO_SUCH_NAME: i64 = 2;
pub const ERR_BAD_VALUE: i64 = 3;
pub const ERR_GEN_ERR: i64 = 5;
pub const ERR_WRONG_TYPE: i64 = 7;
pub const ERR_NO_CREATION: i64 = 11;
pub const ERR_NOT_WRITABLE: i64 = 17;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram truncated at offset {0}")]
    Truncated(usize),
    #[error("expected tag {expected:#04x} at offset {offset}, got {got:#04x}")]
    UnexpectedTag { expected: u8, got: u8, offset: usize },
    #[error("unsupported SNMP version {0}")]
    BadVersion(i64),
    #[error("unsupported PDU type {0:#04x}")]
    BadPduType(u8),
    #[error("malformed {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    fn wire(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Get,
    GetNext,
    Response,
    Set,
    GetBulk,
}

impl PduKind {
    fn tag(self) -> u8 {
        match self {
            PduKind::Get => TAG_GET_REQUEST,
            PduKind::GetNext => TAG_GET_NEXT_REQUEST,
            PduKind::Response => TAG_GET_RESPONSE,
            PduKind::Set => TAG_SET_REQUEST,
            PduKind::GetBulk => TAG_GET_BULK_REQUEST,
        }
    }
}

/// A decoded varbind value, or one of the v2c in-place exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    Oid(Vec<u32>),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl WireValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::Integer(_) => "INTEGER",
            WireValue::OctetString(_) => "OCTET STRING",
            WireValue::Null => "NULL",
            WireValue::Oid(_) => "OBJECT IDENTIFIER",
            WireValue::IpAddress(_) => "IpAddress",
            WireValue::Counter32(_) => "Counter32",
            WireValue::Gauge32(_) => "Gauge32",
            WireValue::TimeTicks(_) => "TimeTicks",
            WireValue::NoSuchObject => "noSuchObject",
            WireValue::NoSuchInstance => "noSuchInstance",
            WireValue::EndOfMibView => "endOfMibView",
        }
    }
}

pub type VarBind = (Vec<u32>, WireValue);

/// One PDU. For GetBulk the error-status/error-index slots carry
/// non-repeaters and max-repetitions, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub kind: PduKind,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpMessage {
    pub version: SnmpVersion,
    pub community: String,
    pub pdu: Pdu,
}

// ---- decoding ----

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    /// BER length: short form below 128, otherwise a length-of-length octet.
    fn length(&mut self) -> Result<usize, CodecError> {
        let first = self.byte()?;
        if first < 128 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(CodecError::Malformed("length octets"));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    fn expect_tag(&mut self, expected: u8) -> Result<usize, CodecError> {
        let offset = self.pos;
        let got = self.byte()?;
        if got != expected {
            return Err(CodecError::UnexpectedTag {
                expected,
                got,
                offset,
            });
        }
        self.length()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn integer(&mut self) -> Result<i64, CodecError> {
        let len = self.expect_tag(TAG_INTEGER)?;
        decode_integer(self.take(len)?)
    }

    fn octet_string(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.expect_tag(TAG_OCTET_STRING)?;
        self.take(len)
    }
}

/// Two's-complement signed integer.
fn decode_integer(content: &[u8]) -> Result<i64, CodecError> {
    if content.is_empty() || content.len() > 8 {
        return Err(CodecError::Malformed("integer"));
    }
    let mut value = if content[0] & 0x80 != 0 { -1i64 } else { 0 };
    for b in content {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> Result<u32, CodecError> {
    if content.is_empty() || content.len() > 5 {
        return Err(CodecError::Malformed("unsigned integer"));
    }
    let mut value = 0u64;
    for b in content {
        value = (value << 8) | *b as u64;
    }
    u32::try_from(value).map_err(|_| CodecError::Malformed("unsigned integer"))
}

/// Sub-identifiers from base-128 continuation octets; the first value packs
/// the leading pair.
pub fn decode_oid(content: &[u8]) -> Result<Vec<u32>, CodecError> {
    let mut subids = Vec::new();
    let mut at = 0;
    let mut first = true;
    while at < content.len() {
        let mut value: u64 = 0;
        loop {
            let b = *content.get(at).ok_or(CodecError::Malformed("OID"))?;
            at += 1;
            value = (value << 7) | (b & 0x7F) as u64;
            if value > u32::MAX as u64 {
                return Err(CodecError::Malformed("OID"));
            }
            if b & 0x80 == 0 {
                break;
            }
        }
        if first {
            first = false;
            if value < 40 {
                subids.push(0);
                subids.push(value as u32);
            } else if value < 80 {
                subids.push(1);
                subids.push(value as u32 - 40);
            } else {
                subids.push(2);
                subids.push(value as u32 - 80);
            }
        } else {
            subids.push(value as u32);
        }
    }
    if subids.is_empty() {
        return Err(CodecError::Malformed("OID"));
    }
    Ok(subids)
}

fn decode_value(tag: u8, content: &[u8]) -> Result<WireValue, CodecError> {
    match tag {
        TAG_INTEGER => Ok(WireValue::Integer(decode_integer(content)?)),
        TAG_OCTET_STRING => Ok(WireValue::OctetString(content.to_vec())),
        TAG_NULL => Ok(WireValue::Null),
        TAG_OID => Ok(WireValue::Oid(decode_oid(content)?)),
        TAG_IP_ADDRESS => {
            if content.len() != 4 {
                return Err(CodecError::Malformed("IpAddress"));
            }
            Ok(WireValue::IpAddress([
                content[0], content[1], content[2], content[3],
            ]))
        }
        TAG_COUNTER32 => Ok(WireValue::Counter32(decode_unsigned(content)?)),
        TAG_GAUGE32 => Ok(WireValue::Gauge32(decode_unsigned(content)?)),
        TAG_TIMETICKS => Ok(WireValue::TimeTicks(decode_unsigned(content)?)),
        TAG_NO_SUCH_OBJECT => Ok(WireValue::NoSuchObject),
        TAG_NO_SUCH_INSTANCE => Ok(WireValue::NoSuchInstance),
        TAG_END_OF_MIB_VIEW => Ok(WireValue::EndOfMibView),
        _ => Err(CodecError::Malformed("varbind value")),
    }
}

/// Parse one datagram into a message. Truncated or foreign traffic fails
/// cleanly.
pub fn parse_message(datagram: &[u8]) -> Result<SnmpMessage, CodecError> {
    let mut reader = Reader::new(datagram);
    reader.expect_tag(TAG_SEQUENCE)?;

    let version = match reader.integer()? {
        0 => SnmpVersion::V1,
        1 => SnmpVersion::V2c,
        other => return Err(CodecError::BadVersion(other)),
    };
    let community = String::from_utf8_lossy(reader.octet_string()?).into_owned();

    let pdu_tag = reader.byte()?;
    let kind = match pdu_tag {
        TAG_GET_REQUEST => PduKind::Get,
        TAG_GET_NEXT_REQUEST => PduKind::GetNext,
        TAG_GET_RESPONSE => PduKind::Response,
        TAG_SET_REQUEST => PduKind::Set,
        TAG_GET_BULK_REQUEST => PduKind::GetBulk,
        other => return Err(CodecError::BadPduType(other)),
    };
    reader.length()?;

    let request_id = reader.integer()?;
    let error_status = reader.integer()?;
    let error_index = reader.integer()?;

    let list_len = reader.expect_tag(TAG_SEQUENCE)?;
    let list_end = reader.pos + list_len;
    let mut varbinds = Vec::new();
    while reader.pos < list_end {
        reader.expect_tag(TAG_SEQUENCE)?;
        let oid_len = reader.expect_tag(TAG_OID)?;
        let oid = decode_oid(reader.take(oid_len)?)?;
        let value_tag = reader.byte()?;
        let value_len = reader.length()?;
        let value = decode_value(value_tag, reader.take(value_len)?)?;
        varbinds.push((oid, value));
    }

    Ok(SnmpMessage {
        version,
        community,
        pdu: Pdu {
            kind,
            request_id,
            error_status,
            error_index,
            varbinds,
        },
    })
}

// ---- encoding ----

/// BER length octets: short form below 128, long form otherwise.
fn encode_length(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else if len < 256 {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, (len & 0xFF) as u8]
    }
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
}

/// Minimal two's-complement representation.
fn encode_integer(value: i64) -> Vec<u8> {
    let mut octets = value.to_be_bytes().to_vec();
    while octets.len() > 1 {
        let drop = (octets[0] == 0x00 && octets[1] & 0x80 == 0)
            || (octets[0] == 0xFF && octets[1] & 0x80 != 0);
        if !drop {
            break;
        }
        octets.remove(0);
    }
    octets
}

/// Minimal unsigned representation with a leading zero octet when the high
/// bit is set.
fn encode_unsigned(value: u32) -> Vec<u8> {
    let mut octets = value.to_be_bytes().to_vec();
    while octets.len() > 1 && octets[0] == 0 && octets[1] & 0x80 == 0 {
        octets.remove(0);
    }
    if octets[0] & 0x80 != 0 {
        octets.insert(0, 0);
    }
    octets
}

fn encode_subid(out: &mut Vec<u8>, value: u32) {
    let mut stack = Vec::new();
    let mut v = value;
    loop {
        stack.push((v & 0x7F) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    while let Some(b) = stack.pop() {
        if stack.is_empty() {
            out.push(b);
        } else {
            out.push(b | 0x80);
        }
    }
}

/// OID content octets: leading pair packed as first*40 + second, the rest in
/// base-128 continuation form.
pub fn encode_oid(subids: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    match subids {
        [] => {}
        [only] => encode_subid(&mut out, only * 40),
        [first, second, rest @ ..] => {
            encode_subid(&mut out, first * 40 + second);
            for subid in rest {
                encode_subid(&mut out, *subid);
            }
        }
    }
    out
}

fn encode_value(out: &mut Vec<u8>, value: &WireValue) {
    match value {
        WireValue::Integer(n) => write_tlv(out, TAG_INTEGER, &encode_integer(*n)),
        WireValue::OctetString(octets) => write_tlv(out, TAG_OCTET_STRING, octets),
        WireValue::Null => write_tlv(out, TAG_NULL, &[]),
        WireValue::Oid(subids) => write_tlv(out, TAG_OID, &encode_oid(subids)),
        WireValue::IpAddress(quad) => write_tlv(out, TAG_IP_ADDRESS, quad),
        WireValue::Counter32(n) => write_tlv(out, TAG_COUNTER32, &encode_unsigned(*n)),
        WireValue::Gauge32(n) => write_tlv(out, TAG_GAUGE32, &encode_unsigned(*n)),
        WireValue::TimeTicks(n) => write_tlv(out, TAG_TIMETICKS, &encode_unsigned(*n)),
        WireValue::NoSuchObject => write_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
        WireValue::NoSuchInstance => write_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
        WireValue::EndOfMibView => write_tlv(out, TAG_END_OF_MIB_VIEW, &[]),
    }
}

/// Serialize a message, typically a Response PDU.
pub fn encode_message(message: &SnmpMessage) -> Vec<u8> {
    let mut varbind_list = Vec::new();
    for (oid, value) in &message.pdu.varbinds {
        let mut varbind = Vec::new();
        write_tlv(&mut varbind, TAG_OID, &encode_oid(oid));
        encode_value(&mut varbind, value);
        write_tlv(&mut varbind_list, TAG_SEQUENCE, &varbind);
    }

    let mut pdu = Vec::new();
    write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(message.pdu.request_id));
    write_tlv(
        &mut pdu,
        TAG_INTEGER,
        &encode_integer(message.pdu.error_status),
    );
    write_tlv(
        &mut pdu,
        TAG_INTEGER,
        &encode_integer(message.pdu.error_index),
    );
    write_tlv(&mut pdu, TAG_SEQUENCE, &varbind_list);

    let mut body = Vec::new();
    write_tlv(&mut body, TAG_INTEGER, &encode_integer(message.version.wire()));
    write_tlv(&mut body, TAG_OCTET_STRING, message.community.as_bytes());
    write_tlv(&mut body, message.pdu.kind.tag(), &pdu);

    let mut out = Vec::new();
    write_tlv(&mut out, TAG_SEQUENCE, &body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_length() {
        assert_eq!(encode_length(10), vec![10]);
        assert_eq!(encode_length(127), vec![127]);
        assert_eq!(encode_length(128), vec![0x81, 128]);
        assert_eq!(encode_length(256), vec![0x82, 1, 0]);
    }

    #[test]
    fn test_decode_length() {
        let mut r = Reader::new(&[10]);
        assert_eq!(r.length().unwrap(), 10);
        let mut r = Reader::new(&[0x81, 128]);
        assert_eq!(r.length().unwrap(), 128);
        let mut r = Reader::new(&[0x82, 1, 0]);
        assert_eq!(r.length().unwrap(), 256);
    }

    #[test]
    fn test_encode_oid_leading_pair() {
        // 1.3 packs to 43 (1*40 + 3)
        let encoded = encode_oid(&[1, 3, 6, 1, 2, 1, 1, 1, 0]);
        assert_eq!(encoded[0], 43);
        assert_eq!(&encoded[1..], &[6, 1, 2, 1, 1, 1, 0]);
    }

    #[test]
    fn test_oid_round_trip_with_large_subids() {
        let oid = vec![1, 3, 6, 1, 4, 1, 9999, 1, 300000];
        let encoded = encode_oid(&oid);
        assert_eq!(decode_oid(&encoded).unwrap(), oid);
    }

    #[test]
    fn test_integer_round_trip() {
        for n in [0i64, 1, 127, 128, 255, 256, -1, -128, -129, 65535, -65536] {
            let encoded = encode_integer(n);
            assert_eq!(decode_integer(&encoded).unwrap(), n, "value {}", n);
        }
        // minimal forms
        assert_eq!(encode_integer(0), vec![0]);
        assert_eq!(encode_integer(127), vec![127]);
        assert_eq!(encode_integer(128), vec![0, 128]);
        assert_eq!(encode_integer(-1), vec![0xFF]);
    }

    #[test]
    fn test_unsigned_round_trip() {
        for n in [0u32, 1, 127, 128, 255, 4_000_000_000] {
            let encoded = encode_unsigned(n);
            assert_eq!(decode_unsigned(&encoded).unwrap(), n, "value {}", n);
        }
    }

    #[test]
    fn test_message_round_trip() {
        let message = SnmpMessage {
            version: SnmpVersion::V2c,
            community: "public".to_string(),
            pdu: Pdu {
                kind: PduKind::Get,
                request_id: 4242,
                error_status: 0,
                error_index: 0,
                varbinds: vec![
                    (vec![1, 3, 6, 1, 2, 1, 1, 5, 0], WireValue::Null),
                    (
                        vec![1, 3, 6, 1, 4, 1, 9999, 1],
                        WireValue::OctetString(b"router-1".to_vec()),
                    ),
                    (vec![1, 3, 6, 1, 2, 1, 1, 3, 0], WireValue::TimeTicks(1000)),
                    (vec![1, 3, 6, 1, 4, 1, 9999, 2], WireValue::Counter32(7)),
                    (
                        vec![1, 3, 6, 1, 4, 1, 9999, 3],
                        WireValue::IpAddress([10, 0, 0, 1]),
                    ),
                ],
            },
        };
        let wire = encode_message(&message);
        assert_eq!(parse_message(&wire).unwrap(), message);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_message(&[]).is_err());
        assert!(parse_message(&[0x30, 0x02, 0xFF, 0xFF]).is_err());
        assert!(parse_message(b"not snmp at all").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let mut message = SnmpMessage {
            version: SnmpVersion::V1,
            community: "public".to_string(),
            pdu: Pdu {
                kind: PduKind::Get,
                request_id: 1,
                error_status: 0,
                error_index: 0,
                varbinds: vec![],
            },
        };
        let mut wire = encode_message(&message);
        // bump the version octet to 3
        let version_at = wire
            .iter()
            .position(|b| *b == TAG_INTEGER)
            .expect("version integer present")
            + 2;
        wire[version_at] = 3;
        assert_eq!(parse_message(&wire), Err(CodecError::BadVersion(3)));

        message.version = SnmpVersion::V2c;
        assert!(parse_message(&encode_message(&message)).is_ok());
    }

    #[test]
    fn test_truncated_datagram_fails_cleanly() {
        let message = SnmpMessage {
            version: SnmpVersion::V2c,
            community: "public".to_string(),
            pdu: Pdu {
                kind: PduKind::GetBulk,
                request_id: 9,
                error_status: 0,
                error_index: 10,
                varbinds: vec![(vec![1, 3, 6, 1], WireValue::Null)],
            },
        };
        let wire = encode_message(&message);
        for cut in 1..wire.len() {
            assert!(parse_message(&wire[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_v2c_exception_values() {
        let message = SnmpMessage {
            version: SnmpVersion::V2c,
            community: "public".to_string(),
            pdu: Pdu {
                kind: PduKind::Response,
                request_id: 5,
                error_status: 0,
                error_index: 0,
                varbinds: vec![
                    (vec![1, 3, 6, 1, 9], WireValue::NoSuchObject),
                    (vec![1, 3, 6, 1, 10], WireValue::EndOfMibView),
                ],
            },
        };
        let back = parse_message(&encode_message(&message)).unwrap();
        assert_eq!(back.pdu.varbinds[0].1, WireValue::NoSuchObject);
        assert_eq!(back.pdu.varbinds[1].1, WireValue::EndOfMibView);
    }
}
