//! Builders for synthetic SNMP request datagrams used in tests.

use crate::agent::codec::{self, Pdu, PduKind, SnmpMessage, SnmpVersion, WireValue};
use crate::value;

fn subids(oid: &str) -> Vec<u32> {
    value::parse_oid(oid).expect("test OID should parse")
}

fn build(version: SnmpVersion, community: &str, pdu: Pdu) -> Vec<u8> {
    codec::encode_message(&SnmpMessage {
        version,
        community: community.to_string(),
        pdu,
    })
}

pub mod request {
    use super::*;

    pub fn get(
        version: SnmpVersion,
        community: &str,
        request_id: i64,
        oids: &[&str],
    ) -> Vec<u8> {
        build(
            version,
            community,
            Pdu {
                kind: PduKind::Get,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: oids.iter().map(|o| (subids(o), WireValue::Null)).collect(),
            },
        )
    }

    pub fn getnext(
        version: SnmpVersion,
        community: &str,
        request_id: i64,
        oids: &[&str],
    ) -> Vec<u8> {
        build(
            version,
            community,
            Pdu {
                kind: PduKind::GetNext,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: oids.iter().map(|o| (subids(o), WireValue::Null)).collect(),
            },
        )
    }

    pub fn getbulk(
        community: &str,
        request_id: i64,
        non_repeaters: i64,
        max_repetitions: i64,
        oids: &[&str],
    ) -> Vec<u8> {
        build(
            SnmpVersion::V2c,
            community,
            bulk_pdu(request_id, non_repeaters, max_repetitions, oids),
        )
    }

    /// A GETBULK wrapped in a v1 message, which the agent must drop.
    pub fn getbulk_v1(
        community: &str,
        request_id: i64,
        non_repeaters: i64,
        max_repetitions: i64,
        oids: &[&str],
    ) -> Vec<u8> {
        build(
            SnmpVersion::V1,
            community,
            bulk_pdu(request_id, non_repeaters, max_repetitions, oids),
        )
    }

    fn bulk_pdu(
        request_id: i64,
        non_repeaters: i64,
        max_repetitions: i64,
        oids: &[&str],
    ) -> Pdu {
        Pdu {
            kind: PduKind::GetBulk,
            request_id,
            error_status: non_repeaters,
            error_index: max_repetitions,
            varbinds: oids.iter().map(|o| (subids(o), WireValue::Null)).collect(),
        }
    }

    pub fn set(
        version: SnmpVersion,
        community: &str,
        request_id: i64,
        binds: &[(&str, WireValue)],
    ) -> Vec<u8> {
        build(
            version,
            community,
            Pdu {
                kind: PduKind::Set,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: binds.iter().map(|(o, v)| (subids(o), v.clone())).collect(),
            },
        )
    }
}

/// Decode a response datagram and hand back its PDU.
pub fn response_of(datagram: &[u8]) -> Pdu {
    let message = codec::parse_message(datagram).expect("response should parse");
    assert_eq!(message.pdu.kind, PduKind::Response);
    message.pdu
}
