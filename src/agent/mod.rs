//! SNMP agent runtime: an ordered registry of managed objects resolved
//! against the shared store, PDU dispatch, and the UDP serve loop. Runs
//! concurrently with the interpreter until the stop signal is raised.

pub mod codec;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;

use crate::error::AgentError;
use crate::logger::Logger;
use crate::store::ObjectStore;
use crate::value::{self, BytesLayout, BytesValue, Value, ValueType};
use codec::{Pdu, PduKind, SnmpMessage, SnmpVersion, VarBind, WireValue};

const READ_DEADLINE: Duration = Duration::from_secs(5);
const RECV_BUFFER_SIZE: usize = 1024;
const MAX_BULK_REPETITIONS: i64 = 64;

/// One registered OID: where its value lives, how it encodes, and whether
/// managers may write it.
pub struct ManagedObject {
    pub identifier: String,
    pub value_type: ValueType,
    pub writable: bool,
    pub layout: Option<BytesLayout>,
    /// Write-back channel delivering SET values to a pending `read`.
    pub writeback: Option<mpsc::Sender<Value>>,
}

pub struct SnmpAgent {
    store: Arc<ObjectStore>,
    /// OID order gives GETNEXT/GETBULK traversal.
    objects: BTreeMap<Vec<u32>, ManagedObject>,
    ro_community: String,
    rw_community: String,
    writeback_timeout: Duration,
    logger: Logger,
}

impl SnmpAgent {
    pub fn new(
        store: Arc<ObjectStore>,
        ro_community: String,
        rw_community: String,
        logger: Logger,
    ) -> SnmpAgent {
        SnmpAgent {
            store,
            objects: BTreeMap::new(),
            ro_community,
            rw_community,
            writeback_timeout: Duration::from_secs(5),
            logger,
        }
    }

    #[cfg(test)]
    fn with_writeback_timeout(mut self, timeout: Duration) -> SnmpAgent {
        self.writeback_timeout = timeout;
        self
    }

    /// Register one managed object under its canonical dotted OID.
    pub fn register(&mut self, oid: &str, object: ManagedObject) -> Result<(), String> {
        let subids = value::parse_oid(oid)?;
        if self.objects.contains_key(&subids) {
            return Err(format!("OID {} already registered", oid));
        }
        self.objects.insert(subids, object);
        Ok(())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Handle one request datagram. Returns the response datagram, or None
    /// when the input is dropped (malformed, bad community, or not a
    /// request we serve).
    pub async fn process_datagram(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        let message = match codec::parse_message(datagram) {
            Ok(message) => message,
            Err(err) => {
                self.logger.log(format!("dropping malformed datagram: {}", err));
                return None;
            }
        };

        let authorized = match message.pdu.kind {
            PduKind::Response => {
                self.logger.log("dropping unsolicited response PDU".to_string());
                return None;
            }
            PduKind::Set => message.community == self.rw_community,
            _ => {
                message.community == self.ro_community
                    || message.community == self.rw_community
            }
        };
        if !authorized {
            self.logger.log(format!(
                "dropping request with bad community \"{}\"",
                message.community
            ));
            return None;
        }
        if message.pdu.kind == PduKind::GetBulk && message.version != SnmpVersion::V2c {
            self.logger
                .log("dropping GETBULK under SNMPv1".to_string());
            return None;
        }

        let pdu = match message.pdu.kind {
            PduKind::Get => self.handle_get(message.version, &message.pdu).await,
            PduKind::GetNext => self.handle_getnext(message.version, &message.pdu).await,
            PduKind::GetBulk => self.handle_getbulk(&message.pdu).await,
            PduKind::Set => self.handle_set(message.version, &message.pdu).await,
            PduKind::Response => unreachable!(),
        };

        Some(codec::encode_message(&SnmpMessage {
            version: message.version,
            community: message.community,
            pdu,
        }))
    }

    // ---- read path ----

    async fn read_object(&self, subids: &[u32]) -> Result<WireValue, AgentError> {
        let oid_text = canonical_text(subids);
        let object = self
            .objects
            .get(subids)
            .ok_or_else(|| AgentError::NoSuchObject(oid_text.clone()))?;
        let value = self
            .store
            .get_by_oid(&oid_text)
            .await
            .ok_or_else(|| AgentError::IllegalValue(oid_text.clone()))?;
        to_wire(&value).ok_or(AgentError::IllegalValue(format!(
            "{} ({})",
            oid_text, object.identifier
        )))
    }

    async fn handle_get(&self, version: SnmpVersion, request: &Pdu) -> Pdu {
        let mut varbinds = Vec::with_capacity(request.varbinds.len());
        for (i, (oid, _)) in request.varbinds.iter().enumerate() {
            match self.read_object(oid).await {
                Ok(value) => varbinds.push((oid.clone(), value)),
                Err(AgentError::NoSuchObject(_)) if version == SnmpVersion::V2c => {
                    varbinds.push((oid.clone(), WireValue::NoSuchObject));
                }
                Err(err) => {
                    self.logger.log(format!("GET failed: {}", err));
                    let status = match (version, &err) {
                        (SnmpVersion::V1, _) => codec::ERR_NO_SUCH_NAME,
                        (_, AgentError::NoSuchObject(_)) => codec::ERR_NO_SUCH_NAME,
                        _ => codec::ERR_GEN_ERR,
                    };
                    return error_response(request, status, i as i64 + 1);
                }
            }
        }
        response(request, varbinds)
    }

    /// Smallest registered OID strictly greater than the argument.
    fn next_oid(&self, oid: &[u32]) -> Option<Vec<u32>> {
        use std::ops::Bound;
        self.objects
            .range::<[u32], _>((Bound::Excluded(oid), Bound::Unbounded))
            .next()
            .map(|(subids, _)| subids.clone())
    }

    async fn handle_getnext(&self, version: SnmpVersion, request: &Pdu) -> Pdu {
        let mut varbinds = Vec::with_capacity(request.varbinds.len());
        for (i, (oid, _)) in request.varbinds.iter().enumerate() {
            match self.next_oid(oid) {
                Some(next) => match self.read_object(&next).await {
                    Ok(value) => varbinds.push((next, value)),
                    Err(err) => {
                        self.logger.log(format!("GETNEXT failed: {}", err));
                        let status = match version {
                            SnmpVersion::V1 => codec::ERR_NO_SUCH_NAME,
                            SnmpVersion::V2c => codec::ERR_GEN_ERR,
                        };
                        return error_response(request, status, i as i64 + 1);
                    }
                },
                None if version == SnmpVersion::V2c => {
                    varbinds.push((oid.clone(), WireValue::EndOfMibView));
                }
                None => {
                    return error_response(request, codec::ERR_NO_SUCH_NAME, i as i64 + 1);
                }
            }
        }
        response(request, varbinds)
    }

    async fn handle_getbulk(&self, request: &Pdu) -> Pdu {
        let non_repeaters = request.error_status.max(0) as usize;
        let repetitions = request.error_index.clamp(0, MAX_BULK_REPETITIONS);

        let mut varbinds = Vec::new();
        for (i, (oid, _)) in request.varbinds.iter().enumerate() {
            if i < non_repeaters {
                match self.next_oid(oid) {
                    Some(next) => match self.read_object(&next).await {
                        Ok(value) => varbinds.push((next, value)),
                        Err(_) => varbinds.push((next, WireValue::EndOfMibView)),
                    },
                    None => varbinds.push((oid.clone(), WireValue::EndOfMibView)),
                }
                continue;
            }
            let mut cursor = oid.clone();
            for _ in 0..repetitions {
                match self.next_oid(&cursor) {
                    Some(next) => {
                        match self.read_object(&next).await {
                            Ok(value) => varbinds.push((next.clone(), value)),
                            Err(_) => varbinds.push((next.clone(), WireValue::EndOfMibView)),
                        }
                        cursor = next;
                    }
                    None => {
                        varbinds.push((cursor.clone(), WireValue::EndOfMibView));
                        break;
                    }
                }
            }
        }
        response(request, varbinds)
    }

    // ---- write path ----

    async fn handle_set(&self, version: SnmpVersion, request: &Pdu) -> Pdu {
        // validate every varbind before applying any
        let mut updates = Vec::with_capacity(request.varbinds.len());
        for (i, (oid, wire_value)) in request.varbinds.iter().enumerate() {
            match self.validate_set(oid, wire_value) {
                Ok(update) => updates.push(update),
                Err(err) => {
                    self.logger.log(format!("SET refused: {}", err));
                    let status = set_error_status(version, &err);
                    return error_response(request, status, i as i64 + 1);
                }
            }
        }

        for (object, oid_text, new_value) in updates {
            self.store
                .publish(&object.identifier, &oid_text, new_value.clone())
                .await;
            self.logger.log(format!(
                "SET {} = {} via {}",
                object.identifier, new_value, oid_text
            ));
            if let Some(sender) = &object.writeback {
                match timeout(self.writeback_timeout, sender.send(new_value)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => self.logger.log(format!(
                        "write-back channel for \"{}\" closed; value kept in store only",
                        object.identifier
                    )),
                    Err(_) => self.logger.log(format!(
                        "no pending read on \"{}\"; dropping write-back delivery",
                        object.identifier
                    )),
                }
            }
        }
        response(request, request.varbinds.clone())
    }

    fn validate_set(
        &self,
        oid: &[u32],
        wire_value: &WireValue,
    ) -> Result<(&ManagedObject, String, Value), AgentError> {
        let oid_text = canonical_text(oid);
        let object = self
            .objects
            .get(oid)
            .ok_or_else(|| AgentError::NoSuchObject(oid_text.clone()))?;
        if !object.writable {
            return Err(AgentError::NotWritable(oid_text));
        }
        let new_value = from_wire(wire_value, object).ok_or_else(|| AgentError::WrongType {
            oid: oid_text.clone(),
            expected: object.value_type.to_string(),
        })?;
        Ok((object, oid_text, new_value))
    }

    // ---- UDP loop ----

    /// Serve until the stop signal is raised. One datagram per iteration
    /// with a fresh receive buffer and a 5-second read deadline; non-timeout
    /// socket errors end the task.
    pub async fn serve(self: Arc<Self>, socket: UdpSocket, stop: Arc<RwLock<bool>>) {
        match socket.local_addr() {
            Ok(addr) => self.logger.log(format!("agent listening on {}", addr)),
            Err(_) => self.logger.log("agent listening".to_string()),
        }
        loop {
            let mut buf = [0u8; RECV_BUFFER_SIZE];
            match timeout(READ_DEADLINE, socket.recv_from(&mut buf)).await {
                Err(_) => {
                    if *stop.read().await {
                        self.logger.log("agent shutting down".to_string());
                        return;
                    }
                }
                Ok(Err(err)) => {
                    self.logger
                        .log(format!("agent receive failed, stopping: {}", err));
                    return;
                }
                Ok(Ok((len, peer))) => {
                    if let Some(datagram) = self.process_datagram(&buf[..len]).await {
                        if let Err(err) = socket.send_to(&datagram, peer).await {
                            self.logger
                                .log(format!("agent send to {} failed, stopping: {}", peer, err));
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn response(request: &Pdu, varbinds: Vec<VarBind>) -> Pdu {
    Pdu {
        kind: PduKind::Response,
        request_id: request.request_id,
        error_status: codec::ERR_NO_ERROR,
        error_index: 0,
        varbinds,
    }
}

/// v1-style error: echo the request varbinds with status and index set.
fn error_response(request: &Pdu, error_status: i64, error_index: i64) -> Pdu {
    Pdu {
        kind: PduKind::Response,
        request_id: request.request_id,
        error_status,
        error_index,
        varbinds: request.varbinds.clone(),
    }
}

fn set_error_status(version: SnmpVersion, err: &AgentError) -> i64 {
    match (version, err) {
        (SnmpVersion::V1, AgentError::WrongType { .. }) => codec::ERR_BAD_VALUE,
        (SnmpVersion::V1, _) => codec::ERR_NO_SUCH_NAME,
        (SnmpVersion::V2c, AgentError::NoSuchObject(_)) => codec::ERR_NO_CREATION,
        (SnmpVersion::V2c, AgentError::NotWritable(_)) => codec::ERR_NOT_WRITABLE,
        (SnmpVersion::V2c, AgentError::WrongType { .. }) => codec::ERR_WRONG_TYPE,
        (SnmpVersion::V2c, _) => codec::ERR_GEN_ERR,
    }
}

fn canonical_text(subids: &[u32]) -> String {
    format!(".{}", value::format_oid(subids))
}

/// Value-to-wire conversion by tag. None marks an illegal value.
fn to_wire(value: &Value) -> Option<WireValue> {
    match value {
        Value::Integer(n) => Some(WireValue::Integer(*n)),
        Value::Counter(n) => Some(WireValue::Counter32(*n as u32)),
        Value::TimeTicks(n) => Some(WireValue::TimeTicks(*n as u32)),
        Value::Gauge(n) => Some(WireValue::Gauge32(*n as u32)),
        Value::Str(s) => Some(WireValue::OctetString(s.as_bytes().to_vec())),
        Value::Boolean(_) => None,
        Value::Bitset(set) => Some(WireValue::OctetString(value::pack_bitset(set))),
        Value::Oid(text) => value::parse_oid(text).ok().map(WireValue::Oid),
        Value::Ipv4Address(quad) => Some(WireValue::IpAddress(*quad)),
        Value::Bytes(record) => Some(WireValue::OctetString(record.pack())),
        Value::None => None,
    }
}

/// Wire-to-value conversion for SET, strict about the declared type.
fn from_wire(wire: &WireValue, object: &ManagedObject) -> Option<Value> {
    match (object.value_type, wire) {
        (ValueType::Integer, WireValue::Integer(n)) => Some(Value::Integer(*n)),
        (ValueType::TimeTicks, WireValue::TimeTicks(n)) => Some(Value::TimeTicks(*n as i64)),
        (ValueType::Gauge, WireValue::Gauge32(n)) => Some(Value::Gauge(*n as i64)),
        (ValueType::Str, WireValue::OctetString(octets)) => Some(Value::Str(
            String::from_utf8_lossy(octets).into_owned(),
        )),
        (ValueType::Bitset, WireValue::OctetString(octets)) => {
            Some(Value::Bitset(value::unpack_bitset(octets)))
        }
        (ValueType::Oid, WireValue::Oid(subids)) => Some(Value::Oid(canonical_text(subids))),
        (ValueType::Ipv4Address, WireValue::IpAddress(quad)) => {
            Some(Value::Ipv4Address(*quad))
        }
        (ValueType::Bytes, WireValue::OctetString(octets)) => {
            let layout = object.layout.clone()?;
            BytesValue::unpack(layout, octets).ok().map(Value::Bytes)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{request, response_of};
    use std::collections::BTreeSet;

    struct Fixture {
        agent: SnmpAgent,
        store: Arc<ObjectStore>,
        speed_rx: mpsc::Receiver<Value>,
    }

    /// An agent with a small mixed-type MIB, the shapes the simulator
    /// registers from a var block.
    async fn fixture() -> Fixture {
        let store = Arc::new(ObjectStore::new());
        store
            .publish("name", ".1.3.6.1.2.1.1.5.0", Value::Str("router-1".into()))
            .await;
        store
            .publish("uptime", ".1.3.6.1.2.1.1.3.0", Value::TimeTicks(4200))
            .await;
        store
            .publish(
                "flags",
                ".1.3.6.1.4.1.9999.1",
                Value::Bitset([0u32, 7, 8].into_iter().collect::<BTreeSet<u32>>()),
            )
            .await;
        store
            .publish("speed", ".1.3.6.1.4.1.9999.5", Value::Integer(100))
            .await;
        store
            .publish("hits", ".1.3.6.1.4.1.9999.6", Value::Counter(9))
            .await;

        let mut agent = SnmpAgent::new(
            store.clone(),
            "public".to_string(),
            "private".to_string(),
            Logger::disabled(),
        )
        .with_writeback_timeout(Duration::from_millis(100));

        let (speed_tx, speed_rx) = mpsc::channel(1);
        agent
            .register(
                ".1.3.6.1.2.1.1.5.0",
                ManagedObject {
                    identifier: "name".into(),
                    value_type: ValueType::Str,
                    writable: false,
                    layout: None,
                    writeback: None,
                },
            )
            .unwrap();
        agent
            .register(
                ".1.3.6.1.2.1.1.3.0",
                ManagedObject {
                    identifier: "uptime".into(),
                    value_type: ValueType::TimeTicks,
                    writable: false,
                    layout: None,
                    writeback: None,
                },
            )
            .unwrap();
        agent
            .register(
                ".1.3.6.1.4.1.9999.1",
                ManagedObject {
                    identifier: "flags".into(),
                    value_type: ValueType::Bitset,
                    writable: false,
                    layout: None,
                    writeback: None,
                },
            )
            .unwrap();
        agent
            .register(
                ".1.3.6.1.4.1.9999.5",
                ManagedObject {
                    identifier: "speed".into(),
                    value_type: ValueType::Integer,
                    writable: true,
                    layout: None,
                    writeback: Some(speed_tx),
                },
            )
            .unwrap();
        agent
            .register(
                ".1.3.6.1.4.1.9999.6",
                ManagedObject {
                    identifier: "hits".into(),
                    value_type: ValueType::Counter,
                    writable: false,
                    layout: None,
                    writeback: None,
                },
            )
            .unwrap();

        Fixture {
            agent,
            store,
            speed_rx,
        }
    }

    #[tokio::test]
    async fn test_get_string_object() {
        let f = fixture().await;
        let datagram = request::get(SnmpVersion::V2c, "public", 7, &[".1.3.6.1.2.1.1.5.0"]);
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.request_id, 7);
        assert_eq!(pdu.error_status, codec::ERR_NO_ERROR);
        assert_eq!(
            pdu.varbinds[0].1,
            WireValue::OctetString(b"router-1".to_vec())
        );
    }

    #[tokio::test]
    async fn test_get_many_types_in_one_pdu() {
        let f = fixture().await;
        let datagram = request::get(
            SnmpVersion::V2c,
            "public",
            8,
            &[
                ".1.3.6.1.2.1.1.3.0",
                ".1.3.6.1.4.1.9999.5",
                ".1.3.6.1.4.1.9999.6",
            ],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.varbinds[0].1, WireValue::TimeTicks(4200));
        assert_eq!(pdu.varbinds[1].1, WireValue::Integer(100));
        assert_eq!(pdu.varbinds[2].1, WireValue::Counter32(9));
    }

    #[tokio::test]
    async fn test_get_bitset_packs_octets() {
        let f = fixture().await;
        let datagram = request::get(SnmpVersion::V2c, "public", 9, &[".1.3.6.1.4.1.9999.1"]);
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        // positions {0, 7, 8} pack to 0x81 0x80
        assert_eq!(
            pdu.varbinds[0].1,
            WireValue::OctetString(vec![0x81, 0x80])
        );
        match &pdu.varbinds[0].1 {
            WireValue::OctetString(octets) => {
                let set = value::unpack_bitset(octets);
                assert_eq!(
                    set,
                    [0u32, 7, 8].into_iter().collect::<BTreeSet<u32>>()
                );
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_get_unknown_oid_v1_and_v2c() {
        let f = fixture().await;

        let datagram = request::get(SnmpVersion::V1, "public", 10, &[".1.3.6.1.9.9"]);
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_NO_SUCH_NAME);
        assert_eq!(pdu.error_index, 1);

        let datagram = request::get(SnmpVersion::V2c, "public", 11, &[".1.3.6.1.9.9"]);
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_NO_ERROR);
        assert_eq!(pdu.varbinds[0].1, WireValue::NoSuchObject);
    }

    #[tokio::test]
    async fn test_getnext_walks_in_oid_order() {
        let f = fixture().await;
        let mut cursor = ".1.3.6.1".to_string();
        let mut walked = Vec::new();
        loop {
            let datagram = request::getnext(SnmpVersion::V2c, "public", 12, &[&cursor]);
            let reply = f.agent.process_datagram(&datagram).await.unwrap();
            let pdu = response_of(&reply);
            let (oid, wire_value) = &pdu.varbinds[0];
            if *wire_value == WireValue::EndOfMibView {
                break;
            }
            cursor = canonical_text(oid);
            walked.push(cursor.clone());
        }
        assert_eq!(
            walked,
            vec![
                ".1.3.6.1.2.1.1.3.0",
                ".1.3.6.1.2.1.1.5.0",
                ".1.3.6.1.4.1.9999.1",
                ".1.3.6.1.4.1.9999.5",
                ".1.3.6.1.4.1.9999.6",
            ]
        );
    }

    #[tokio::test]
    async fn test_getnext_past_end_v1() {
        let f = fixture().await;
        let datagram = request::getnext(SnmpVersion::V1, "public", 13, &[".1.3.6.1.4.1.9999.6"]);
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_NO_SUCH_NAME);
    }

    #[tokio::test]
    async fn test_getbulk_repeats_and_pads() {
        let f = fixture().await;
        let datagram = request::getbulk(
            "public",
            14,
            0,
            10,
            &[".1.3.6.1.4.1.9999.1"],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        // two objects follow, then the view ends
        assert_eq!(pdu.varbinds.len(), 3);
        assert_eq!(pdu.varbinds[0].0, vec![1, 3, 6, 1, 4, 1, 9999, 5]);
        assert_eq!(pdu.varbinds[1].0, vec![1, 3, 6, 1, 4, 1, 9999, 6]);
        assert_eq!(pdu.varbinds[2].1, WireValue::EndOfMibView);
    }

    #[tokio::test]
    async fn test_getbulk_non_repeaters() {
        let f = fixture().await;
        let datagram = request::getbulk(
            "public",
            15,
            1,
            2,
            &[".1.3.6.1", ".1.3.6.1.2.1.1.3.0"],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        // one single next for the first varbind, two repetitions for the
        // second
        assert_eq!(pdu.varbinds.len(), 3);
        assert_eq!(pdu.varbinds[0].0, vec![1, 3, 6, 1, 2, 1, 1, 3, 0]);
        assert_eq!(pdu.varbinds[1].0, vec![1, 3, 6, 1, 2, 1, 1, 5, 0]);
        assert_eq!(pdu.varbinds[2].0, vec![1, 3, 6, 1, 4, 1, 9999, 1]);
    }

    #[tokio::test]
    async fn test_getbulk_dropped_under_v1() {
        let f = fixture().await;
        let datagram = request::getbulk_v1("public", 16, 0, 5, &[".1.3.6.1"]);
        assert!(f.agent.process_datagram(&datagram).await.is_none());
    }

    #[tokio::test]
    async fn test_set_updates_store_and_write_back() {
        let mut f = fixture().await;
        let datagram = request::set(
            SnmpVersion::V2c,
            "private",
            17,
            &[(".1.3.6.1.4.1.9999.5", WireValue::Integer(250))],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_NO_ERROR);

        assert_eq!(
            *f.store.get_by_oid(".1.3.6.1.4.1.9999.5").await.unwrap(),
            Value::Integer(250)
        );
        assert_eq!(
            *f.store.get_by_id("speed").await.unwrap(),
            Value::Integer(250)
        );
        assert_eq!(f.speed_rx.recv().await, Some(Value::Integer(250)));
    }

    #[tokio::test]
    async fn test_set_with_ro_community_dropped() {
        let f = fixture().await;
        let datagram = request::set(
            SnmpVersion::V2c,
            "public",
            18,
            &[(".1.3.6.1.4.1.9999.5", WireValue::Integer(250))],
        );
        assert!(f.agent.process_datagram(&datagram).await.is_none());
        assert_eq!(
            *f.store.get_by_id("speed").await.unwrap(),
            Value::Integer(100)
        );
    }

    #[tokio::test]
    async fn test_set_read_only_object() {
        let f = fixture().await;
        let datagram = request::set(
            SnmpVersion::V2c,
            "private",
            19,
            &[(".1.3.6.1.2.1.1.5.0", WireValue::OctetString(b"x".to_vec()))],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_NOT_WRITABLE);
        assert_eq!(
            *f.store.get_by_id("name").await.unwrap(),
            Value::Str("router-1".into())
        );
    }

    #[tokio::test]
    async fn test_set_wrong_type_leaves_store_unchanged() {
        let f = fixture().await;
        let datagram = request::set(
            SnmpVersion::V2c,
            "private",
            20,
            &[(
                ".1.3.6.1.4.1.9999.5",
                WireValue::OctetString(b"fast".to_vec()),
            )],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_WRONG_TYPE);
        assert_eq!(pdu.error_index, 1);
        assert_eq!(
            *f.store.get_by_id("speed").await.unwrap(),
            Value::Integer(100)
        );
    }

    #[tokio::test]
    async fn test_set_unknown_oid() {
        let f = fixture().await;
        let datagram = request::set(
            SnmpVersion::V2c,
            "private",
            21,
            &[(".1.3.6.1.9.9", WireValue::Integer(1))],
        );
        let reply = f.agent.process_datagram(&datagram).await.unwrap();
        let pdu = response_of(&reply);
        assert_eq!(pdu.error_status, codec::ERR_NO_CREATION);
    }

    #[tokio::test]
    async fn test_set_without_pending_read_drops_delivery() {
        let f = fixture().await;
        // two SETs back to back; nothing reads the channel, so the second
        // delivery hits the full channel and is dropped after the timeout
        for (id, n) in [(22, 1i64), (23, 2)] {
            let datagram = request::set(
                SnmpVersion::V2c,
                "private",
                id,
                &[(".1.3.6.1.4.1.9999.5", WireValue::Integer(n))],
            );
            let reply = f.agent.process_datagram(&datagram).await.unwrap();
            assert_eq!(response_of(&reply).error_status, codec::ERR_NO_ERROR);
        }
        // the store always reflects the latest SET
        assert_eq!(
            *f.store.get_by_id("speed").await.unwrap(),
            Value::Integer(2)
        );
    }

    #[tokio::test]
    async fn test_malformed_datagram_dropped() {
        let f = fixture().await;
        assert!(f.agent.process_datagram(b"garbage").await.is_none());
        assert!(f.agent.process_datagram(&[]).await.is_none());
    }

    #[tokio::test]
    async fn test_bad_community_dropped() {
        let f = fixture().await;
        let datagram = request::get(SnmpVersion::V2c, "wrong", 24, &[".1.3.6.1.2.1.1.5.0"]);
        assert!(f.agent.process_datagram(&datagram).await.is_none());
        // rw community may read
        let datagram = request::get(SnmpVersion::V2c, "private", 25, &[".1.3.6.1.2.1.1.5.0"]);
        assert!(f.agent.process_datagram(&datagram).await.is_some());
    }

    #[tokio::test]
    async fn test_serve_answers_over_udp_and_stops() {
        let f = fixture().await;
        let agent = Arc::new(f.agent);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(RwLock::new(false));
        let handle = tokio::spawn(agent.serve(socket, stop.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let datagram = request::get(SnmpVersion::V2c, "public", 26, &[".1.3.6.1.2.1.1.5.0"]);
        client.send_to(&datagram, addr).await.unwrap();
        let mut buf = [0u8; 1024];
        let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let pdu = response_of(&buf[..len]);
        assert_eq!(
            pdu.varbinds[0].1,
            WireValue::OctetString(b"router-1".to_vec())
        );

        *stop.write().await = true;
        // the loop notices the stop flag at its next read deadline
        timeout(Duration::from_secs(7), handle).await.unwrap().unwrap();
    }
}
