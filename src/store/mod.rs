//! Shared object store: the single synchronization point between the
//! running script and the SNMP agent. Two indexes over the same values,
//! guarded by one readers/writer lock; every update publishes a fresh value
//! so a reader never observes a torn one.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::RuntimeError;
use crate::logger::Logger;
use crate::parser::{self, InitMode, Variables};
use crate::value::Value;

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, Arc<Value>>,
    by_oid: HashMap<String, Arc<Value>>,
}

pub struct ObjectStore {
    inner: RwLock<Indexes>,
}

impl ObjectStore {
    pub fn new() -> ObjectStore {
        ObjectStore {
            inner: RwLock::new(Indexes::default()),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Arc<Value>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    pub async fn get_by_oid(&self, oid: &str) -> Option<Arc<Value>> {
        self.inner.read().await.by_oid.get(oid).cloned()
    }

    /// Publish under the identifier and, when `oid` is non-empty, under the
    /// OID as well. Both indexes point at the same instance.
    pub async fn publish(&self, id: &str, oid: &str, value: Value) {
        let value = Arc::new(value);
        let mut indexes = self.inner.write().await;
        indexes.by_id.insert(id.to_string(), value.clone());
        if !oid.is_empty() {
            indexes.by_oid.insert(oid.to_string(), value);
        }
    }

    // Blocking variants for the interpreter thread.

    pub fn blocking_get_by_id(&self, id: &str) -> Option<Arc<Value>> {
        self.inner.blocking_read().by_id.get(id).cloned()
    }

    pub fn blocking_get_by_oid(&self, oid: &str) -> Option<Arc<Value>> {
        self.inner.blocking_read().by_oid.get(oid).cloned()
    }

    pub fn blocking_publish(&self, id: &str, oid: &str, value: Value) {
        let value = Arc::new(value);
        let mut indexes = self.inner.blocking_write();
        indexes.by_id.insert(id.to_string(), value.clone());
        if !oid.is_empty() {
            indexes.by_oid.insert(oid.to_string(), value);
        }
    }

    /// Field-level update of a bytes record. The read-modify-republish runs
    /// entirely under the exclusive lock so readers see the old or the new
    /// record, never an intermediate.
    pub fn blocking_update_bytes_field(
        &self,
        id: &str,
        oid: &str,
        field: &str,
        value: i64,
    ) -> Result<(), RuntimeError> {
        let mut indexes = self.inner.blocking_write();
        let current = indexes
            .by_id
            .get(id)
            .ok_or_else(|| RuntimeError::UndefinedVariable(id.to_string()))?;
        let mut record = match &**current {
            Value::Bytes(record) => record.clone(),
            _ => {
                return Err(RuntimeError::NoSuchField {
                    identifier: id.to_string(),
                    field: field.to_string(),
                });
            }
        };
        record.set_field(field, value).map_err(|err| match err {
            RuntimeError::NoSuchField { field, .. } => RuntimeError::NoSuchField {
                identifier: id.to_string(),
                field,
            },
            other => other,
        })?;
        let updated = Arc::new(Value::Bytes(record));
        indexes.by_id.insert(id.to_string(), updated.clone());
        if !oid.is_empty() {
            indexes.by_oid.insert(oid.to_string(), updated);
        }
        Ok(())
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        ObjectStore::new()
    }
}

/// Construct every declared variable's initial value, in declaration order
/// so prompting is deterministic. External variables take their value from a
/// matching `-v KEY=VALUE` entry (falling back to zero, with a log line, if
/// the text does not parse) or from an interactive prompt that re-asks until
/// the text parses under the declared type.
pub fn initial_values(
    store: &ObjectStore,
    variables: &Variables,
    external_inits: &HashMap<String, String>,
    logger: &Logger,
) -> io::Result<()> {
    let stdin = io::stdin();
    for id in variables.ids_by_line() {
        let typ = &variables.types[&id];
        let value = match typ.init_mode {
            InitMode::Zero => typ.zero_value(&variables.prefix),
            InitMode::External => match external_inits.get(&id) {
                Some(text) => match parser::parse_init_value(text, typ, variables) {
                    Ok(value) => value,
                    Err(err) => {
                        logger.log(format!(
                            "bad initial value \"{}\" for {}: {}; using zero value",
                            text, id, err
                        ));
                        typ.zero_value(&variables.prefix)
                    }
                },
                None => prompt_value(&id, typ, variables, &mut stdin.lock())?,
            },
        };
        store.blocking_publish(&id, &typ.oid, value);
    }
    Ok(())
}

/// Ask on standard input until the supplied text parses under the declared
/// type.
fn prompt_value(
    id: &str,
    typ: &parser::VarType,
    variables: &Variables,
    input: &mut impl BufRead,
) -> io::Result<Value> {
    loop {
        print!("{} ({})? ", id, typ.value_type);
        io::stdout().flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            // end of input: fall back to the zero value
            println!();
            return Ok(typ.zero_value(&variables.prefix));
        }
        match parser::parse_init_value(&line, typ, variables) {
            Ok(value) => return Ok(value),
            Err(err) => println!("{}", err),
        }
    }
}
