mod agent;
mod error;
mod interp;
mod lexer;
mod logger;
mod parser;
mod store;
mod value;

#[cfg(test)]
mod test_utils;

use std::collections::HashMap;
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::task;

use agent::{ManagedObject, SnmpAgent};
use interp::Interpreter;
use logger::Logger;
use parser::{Program, SnmpMode};
use store::ObjectStore;
use value::Value;

/// Programmable SNMP v1/v2c agent simulator: runs a device script and
/// serves its managed objects over UDP while the script executes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port to serve SNMP on
    #[arg(short, long, default_value = "161")]
    port: u16,

    /// Read-only community string
    #[arg(short = 'c', long, default_value = "public")]
    community: String,

    /// Read-write community string
    #[arg(short = 'C', long = "rw-community", default_value = "private")]
    rw_community: String,

    /// Initial value for an external variable (KEY=VALUE, repeatable)
    #[arg(short = 'v', long = "init", value_name = "KEY=VALUE")]
    init: Vec<String>,

    /// Script file describing the simulated device
    filename: String,
}

/// Split repeated `-v KEY=VALUE` entries into a map, skipping malformed
/// ones with a warning.
fn split_inits(entries: &[String], logger: &Logger) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                map.insert(key.trim().to_string(), value.to_string());
            }
            _ => {
                eprintln!("ignoring malformed -v entry \"{}\"", entry);
                logger.log(format!("ignoring malformed -v entry \"{}\"", entry));
            }
        }
    }
    map
}

/// Register one managed object per declared OID and create the write-back
/// channel for each ReadWrite variable: sender to the agent, receiver to the
/// interpreter.
fn wire(
    program: &Program,
    store: Arc<ObjectStore>,
    ro_community: String,
    rw_community: String,
    logger: Logger,
) -> Result<(SnmpAgent, HashMap<String, mpsc::Receiver<Value>>), String> {
    let mut agent = SnmpAgent::new(store, ro_community, rw_community, logger);
    let mut readers = HashMap::new();
    for (id, typ) in &program.variables.types {
        if typ.oid.is_empty() {
            continue;
        }
        let writable = typ.snmp_mode == SnmpMode::ReadWrite;
        let writeback = if writable {
            let (tx, rx) = mpsc::channel(1);
            readers.insert(id.clone(), rx);
            Some(tx)
        } else {
            None
        };
        agent.register(
            &typ.oid,
            ManagedObject {
                identifier: id.clone(),
                value_type: typ.value_type,
                writable,
                layout: typ.layout.clone(),
                writeback,
            },
        )?;
    }
    Ok((agent, readers))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.filename) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("unable to read file {}: {}", args.filename, err);
            process::exit(1);
        }
    };

    let log_path = format!("{}.log", args.filename);
    let logger = match Logger::to_file(Path::new(&log_path)) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("unable to open log file {}: {}", log_path, err);
            process::exit(1);
        }
    };
    logger.log(format!("starting simulation of {}", args.filename));

    // parse on a blocking task; the lexer feeds it from its own thread
    let parsed = task::spawn_blocking(move || {
        parser::Parser::new(lexer::Lexer::spawn(source)).parse_program()
    })
    .await
    .expect("parser task panicked");
    let program = match parsed {
        Ok(program) => program,
        Err(err) => {
            eprintln!("parsing error: {}", err);
            logger.log(format!("parsing error: {}", err));
            process::exit(1);
        }
    };

    let inits = split_inits(&args.init, &logger);

    // initial values may prompt on stdin; keep that off the runtime threads
    let store = Arc::new(ObjectStore::new());
    {
        let store = store.clone();
        let variables = program.variables.clone();
        let logger = logger.clone();
        let init_result = task::spawn_blocking(move || {
            store::initial_values(&store, &variables, &inits, &logger)
        })
        .await
        .expect("init task panicked");
        if let Err(err) = init_result {
            eprintln!("unable to initialise variables: {}", err);
            process::exit(1);
        }
    }

    let (agent, readers) = match wire(
        &program,
        store.clone(),
        args.community.clone(),
        args.rw_community.clone(),
        logger.clone(),
    ) {
        Ok(wired) => wired,
        Err(err) => {
            eprintln!("unable to register managed objects: {}", err);
            process::exit(1);
        }
    };

    let socket = match UdpSocket::bind(("0.0.0.0", args.port)).await {
        Ok(socket) => socket,
        Err(err) => {
            eprintln!("unable to bind UDP port {}: {}", args.port, err);
            logger.log(format!("unable to bind UDP port {}: {}", args.port, err));
            process::exit(1);
        }
    };
    logger.log(format!(
        "serving {} managed object(s) on UDP port {}",
        agent.object_count(),
        args.port
    ));

    let stop = Arc::new(RwLock::new(false));
    {
        let logger = logger.clone();
        ctrlc::set_handler(move || {
            println!("\nreceived interrupt, shutting down");
            logger.log("received interrupt, shutting down".to_string());
            process::exit(0);
        })
        .expect("error setting interrupt handler");
    }

    let agent_task = tokio::spawn(Arc::new(agent).serve(socket, stop.clone()));

    // run the script; the agent serves concurrently until it finishes
    let mut interpreter = Interpreter::new(
        program.variables.clone(),
        store.clone(),
        readers,
        logger.clone(),
    );
    let interp_result = task::spawn_blocking(move || interpreter.run(&program))
        .await
        .expect("interpreter task panicked");

    // signal the agent; it returns at its next read-timeout boundary
    *stop.write().await = true;
    let _ = agent_task.await;

    match interp_result {
        Ok(()) => logger.log("simulation finished".to_string()),
        Err(err) => {
            eprintln!("interpreting error: {}", err);
            logger.log(format!("runtime error: {}", err));
            process::exit(1);
        }
    }
}
