// Simple dig-style command line for the mDNS engine.
// mdnsctl browse <service-type> [--iface NAME] [--iface-index N]
// mdnsctl register <instance> <service-type> <port> [--iface NAME] [--iface-index N]

use std::env;
use std::fmt;
use std::net::IpAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use mdns_engine::collab::{OsRandom, SystemClock};
use mdns_engine::discovery::MdnsSearchOptions;
use mdns_engine::socket::{InterfaceSocket, MDNS_PORT};
use mdns_engine::transport::Transport;
use mdns_engine::{Name, WorkerEvent};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug)]
struct ArgParseError {
    details: String,
}

impl fmt::Display for ArgParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl std::error::Error for ArgParseError {}

enum Command {
    Browse { service_type: String },
    Register { instance: String, service_type: String, port: u16 },
}

struct Args {
    command: Command,
    iface: String,
    iface_index: u32,
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = env::args().skip(1).collect();

    let mut iface = "eth0".to_string();
    let mut iface_index: u32 = 0;
    let mut positional = Vec::new();
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--iface" => {
                iface = argv
                    .get(i + 1)
                    .ok_or_else(|| ArgParseError { details: "--iface needs a value".into() })?
                    .clone();
                i += 2;
            }
            "--iface-index" => {
                iface_index = argv
                    .get(i + 1)
                    .ok_or_else(|| ArgParseError { details: "--iface-index needs a value".into() })?
                    .parse()?;
                i += 2;
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    let command = match positional.as_slice() {
        [cmd, service_type] if cmd == "browse" => Command::Browse { service_type: service_type.clone() },
        [cmd, instance, service_type, port] if cmd == "register" => Command::Register {
            instance: instance.clone(),
            service_type: service_type.clone(),
            port: port.parse()?,
        },
        _ => {
            return Err(Box::new(ArgParseError {
                details: "usage: mdnsctl browse <type> | mdnsctl register <instance> <type> <port>".into(),
            }))
        }
    };

    Ok(Args { command, iface, iface_index })
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("mdnsctl: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;

    let mut socket = InterfaceSocket::new(&args.iface, args.iface_index, MDNS_PORT)?;
    socket.join_group(true, true)?;
    let transport: Arc<dyn Transport> = Arc::new(socket);

    let host_name = Name::from(&format!("mdnsctl-{:08x}.local", process::id()));
    let (handle, events) = mdns_engine::spawn(transport, Arc::new(SystemClock), Arc::new(OsRandom), host_name);

    handle.update_addresses(local_addresses())?;

    match args.command {
        Command::Browse { service_type } => {
            handle.register_discovery(Name::from(&service_type), MdnsSearchOptions::default(), false)?;
            println!("browsing {}... (ctrl-c to stop)", service_type);
        }
        Command::Register { instance, service_type, port } => {
            let name = Name::from(&instance).joined(&Name::from(&service_type));
            let id = handle.add_service(name, Name::from(&service_type), vec![], port, vec![])?;
            println!("registering service {} (id {})...", instance, id);
        }
    }

    loop {
        match events.recv_timeout(Duration::from_secs(3600)) {
            Ok(WorkerEvent::Discovery(service_type, event)) => {
                println!("{} [{}] {:?}", now(), service_type, event)
            }
            Ok(WorkerEvent::RegisterServiceSucceeded(id)) => println!("{} registered (id {})", now(), id),
            Ok(WorkerEvent::ServiceConflict(id)) => println!("{} conflict on service {}", now(), id),
            Ok(WorkerEvent::Destroyed(id)) => {
                println!("{} destroyed service {}", now(), id);
                break;
            }
            Err(_) => break,
        }
    }

    Ok(())
}

/// dig-style timestamp (`;; WHEN: Sat Jun 12 12:14:21 2021`) for each
/// printed event line.
fn now() -> String {
    chrono::Local::now().format("%a %b %-d %H:%M:%S %Y").to_string()
}

/// A standalone demo has no OS link-properties feed to draw from; callers
/// embedding the engine for real wire this up to `InterfaceLifecycle`
/// instead (see `mdns_engine::collab`). This placeholder advertises no
/// addresses, which is enough to see probing/announcing/discovery traffic
/// without requiring a specific local configuration.
fn local_addresses() -> Vec<IpAddr> {
    Vec::new()
}
