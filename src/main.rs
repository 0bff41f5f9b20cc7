// The transport edge: binds the DHCP server socket, runs the blocking
// receive loop, and wires the handler, observer, and shutdown
// collaborator together. Grounded on the shape of the Fuchsia dhcp
// crate's `main.rs` read loop, reworked to a blocking `std::net::UdpSocket`
// per spec.md §4.5/§5 (a single blocking suspension point, no async
// runtime).

use dhcplite::config::{self, CliArgs};
use dhcplite::observer::LoggingObserver;
use dhcplite::protocol::{Message, MessageType, CLIENT_PORT, SERVER_PORT};
use dhcplite::server::{Destination, Server, ServerAction};
use dhcplite::shutdown::ShutdownHandle;
use log::{error, info};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

/// A buffer size comfortably in excess of the largest DHCP message this
/// server will ever decode or produce.
const BUF_SZ: usize = 1024;

/// How long a single `recv_from` blocks before the loop re-checks the
/// shutdown flag. Short enough that Ctrl-C feels instant, long enough
/// that polling costs nothing measurable.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
enum DhcpServerError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to construct server: {0}")]
    Startup(#[from] dhcplite::pool::MalformedConfig),
    #[error("failed to bind socket: {0}")]
    Bind(std::io::Error),
    #[error("failed to install shutdown handler: {0}")]
    Shutdown(#[from] dhcplite::shutdown::ShutdownError),
    #[error("socket receive failed: {0}")]
    Receive(std::io::Error),
}

fn main() -> ExitCode {
    env_logger::init();
    let cli: CliArgs = argh::from_env();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliArgs) -> Result<(), DhcpServerError> {
    let config = config::load(&cli)?;
    let server_addr = config.server_addr;
    let mut server = Server::new(config, LoggingObserver)?;

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, SERVER_PORT)).map_err(DhcpServerError::Bind)?;
    socket.set_broadcast(true).map_err(DhcpServerError::Bind)?;
    socket.set_read_timeout(Some(POLL_INTERVAL)).map_err(DhcpServerError::Bind)?;

    let shutdown = ShutdownHandle::install()?;
    info!("dhcplited listening on {}:{}", server_addr, SERVER_PORT);

    let mut buf = vec![0u8; BUF_SZ];
    while !shutdown.requested() {
        let (len, _src) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if is_retryable(&e) => continue,
            Err(e) => return Err(DhcpServerError::Receive(e)),
        };

        let request = match Message::from_buffer(&buf[..len]) {
            Some(m) => m,
            None => continue,
        };

        match server.dispatch(request) {
            ServerAction::Reply(reply, dest) => {
                let bytes = server.encode_reply_bytes(&reply);
                let to = destination_addr(dest);
                if let Err(e) = socket.send_to(&bytes, to) {
                    error!("failed to send reply to {}: {}", to, e);
                }
                if let Some(yiaddr) = offered_address(&reply) {
                    server.confirm_sent(yiaddr);
                }
            }
            ServerAction::Ignore => {}
        }
    }

    info!("dhcplited shutting down");
    Ok(())
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

/// The address just offered, if this reply is an OFFER — used to advance
/// the allocator's cursor, per spec.md §3/§4.3, only once an OFFER has
/// actually left the wire. ACK and NAK never advance the cursor: the
/// address they carry was already committed when it was first offered.
fn offered_address(reply: &Message) -> Option<Ipv4Addr> {
    if reply.get_dhcp_type() != Ok(MessageType::Offer) {
        return None;
    }
    if reply.yiaddr.is_unspecified() {
        None
    } else {
        Some(reply.yiaddr)
    }
}

fn destination_addr(dest: Destination) -> SocketAddr {
    match dest {
        Destination::Relay(addr) => SocketAddr::new(addr.into(), SERVER_PORT),
        Destination::Broadcast => SocketAddr::new(Ipv4Addr::BROADCAST.into(), CLIENT_PORT),
        Destination::Unicast(addr) => SocketAddr::new(addr.into(), CLIENT_PORT),
    }
}
