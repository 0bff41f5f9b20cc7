// The DHCP message-type state machine: dispatches a decoded request to
// the appropriate handler, consults the binding store and allocator, and
// decides where the reply goes. Grounded on the shape of the Fuchsia dhcp
// crate's `Server::dispatch`/`handle_*` family, reworked per spec.md §4.4
// (no lease timers, no persistent stash, bindings are never reclaimed).

use crate::config::ServerConfig;
use crate::observer::Observer;
use crate::pool::{ip_to_value, value_to_ip, Allocator, Binding, BindingStore, MalformedConfig, SubnetPool};
use crate::protocol::{ConfigOption, Message, MessageType, MessageTypeError, OpCode, OptionCode};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Where a reply should be sent, per RFC 2131 §4.1. The port is implied
/// by the variant: `Relay` uses the server port, everything else the
/// client port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Relay(Ipv4Addr),
    Broadcast,
    Unicast(Ipv4Addr),
}

/// The result of handing a decoded message to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    /// A reply must be sent to `Destination`.
    Reply(Message, Destination),
    /// Nothing is sent: a no-op message (DECLINE/RELEASE/INFORM), a
    /// malformed request, or an unexpected client message type.
    Ignore,
}

/// Reasons a request was not actionable. Never fatal: every variant is
/// handled by dropping the datagram and notifying the observer, per
/// spec.md §7's per-datagram error layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("unexpected client message type: {0}")]
    UnexpectedClientMessageType(MessageType),
    #[error("could not determine dhcp message type: {0}")]
    MalformedRequest(MessageTypeError),
    #[error("self-sent broadcast dropped (host name matches server)")]
    SelfSentBroadcast,
    #[error("request selecting this server had non-zero ciaddr")]
    SelectingWithNonzeroCiaddr,
    #[error("request neither init-reboot nor renewing/rebinding")]
    UnrecognizedRequestState,
    #[error("address pool exhausted")]
    PoolExhausted,
}

/// A server instance: the DHCP handler, the address pool it draws from,
/// and the binding store it maintains. Single-threaded with respect to
/// itself, per spec.md §5 — `dispatch` takes `&mut self` and nothing
/// about this type is `Sync`.
pub struct Server<O: Observer> {
    config: ServerConfig,
    subnet: SubnetPool,
    store: BindingStore,
    allocator: Allocator,
    observer: O,
}

impl<O: Observer> Server<O> {
    pub fn new(config: ServerConfig, observer: O) -> Result<Self, MalformedConfig> {
        let subnet = SubnetPool::new(
            config.server_addr,
            config.mask,
            config.min_addr,
            config.max_addr,
        )?;
        let store = BindingStore::with_server_reservation(subnet.server_value);
        let allocator = Allocator::new(&subnet);
        log::info!(
            "{} - Subnet:{} - Range:[{}-{}]",
            config.server_addr,
            config.mask,
            value_to_ip(subnet.min_value),
            value_to_ip(subnet.max_value),
        );
        Ok(Server { config, subnet, store, allocator, observer })
    }

    pub fn binding_count(&self) -> usize {
        self.store.len()
    }

    /// Dispatches a decoded request. Never panics and never blocks; all
    /// failure is surfaced through `ServerAction::Ignore` plus an
    /// `Observer::on_warning` call.
    pub fn dispatch(&mut self, req: Message) -> ServerAction {
        if self.is_self_sent(&req) {
            self.warn(ServerError::SelfSentBroadcast);
            return ServerAction::Ignore;
        }

        let msg_type = match req.get_dhcp_type() {
            Ok(t) => t,
            Err(e) => {
                self.warn(ServerError::MalformedRequest(e));
                return ServerAction::Ignore;
            }
        };

        match msg_type {
            MessageType::Discover => self.handle_discover(req),
            MessageType::Request => self.handle_request(req),
            MessageType::Decline | MessageType::Release | MessageType::Inform => {
                ServerAction::Ignore
            }
            MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                self.warn(ServerError::UnexpectedClientMessageType(msg_type));
                ServerAction::Ignore
            }
        }
    }

    /// Call once a `ServerAction::Reply` produced by `dispatch` has
    /// actually been written to the wire, so the allocator's cursor only
    /// advances past addresses that were really offered.
    pub fn confirm_sent(&mut self, addr: Ipv4Addr) {
        self.allocator.commit(ip_to_value(addr));
    }

    /// Encodes a reply `Message` produced by `dispatch` into wire bytes,
    /// filling in the lease time, subnet mask, and server identifier this
    /// server is configured with. The transport edge calls this rather
    /// than `Message::encode_reply` directly so those config values never
    /// need to leave this type.
    pub fn encode_reply_bytes(&self, reply: &Message) -> Vec<u8> {
        let msg_type = reply.get_dhcp_type().unwrap_or(MessageType::Nak);
        let is_nak = msg_type == MessageType::Nak;
        reply.encode_reply(
            msg_type,
            self.config.lease_seconds,
            self.config.mask,
            self.config.server_addr,
            is_nak,
        )
    }

    fn warn(&self, e: ServerError) {
        self.observer.on_warning(&e.to_string());
    }

    /// Debug-level dump of every current binding, recovered from the
    /// original implementation's habit of printing the whole lease table
    /// to the console whenever it changed. Logged, not persisted: the
    /// binding store itself remains in-memory only.
    fn log_binding_table(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        for binding in self.store.bindings() {
            log::debug!("bound: {} -> {:02x?}", value_to_ip(binding.addr_value), binding.client_id);
        }
    }

    /// RFC 2131 §4.1's destination rules: relay, else NAK broadcasts,
    /// else unicast to `ciaddr`, else broadcast if the client asked for
    /// it, else unicast to the freshly assigned `yiaddr`, else broadcast.
    fn destination(&self, req: &Message, reply: &mut Message, is_nak: bool) -> Destination {
        if !req.giaddr.is_unspecified() {
            reply.bdcast_flag = true;
            return Destination::Relay(req.giaddr);
        }
        if is_nak {
            return Destination::Broadcast;
        }
        if !req.ciaddr.is_unspecified() {
            return Destination::Unicast(req.ciaddr);
        }
        if req.bdcast_flag {
            return Destination::Broadcast;
        }
        if !reply.yiaddr.is_unspecified() {
            return Destination::Unicast(reply.yiaddr);
        }
        Destination::Broadcast
    }

    /// Drops the entire datagram when option 12 (host name) matches this
    /// server's own configured name, case-insensitively, capped at 255
    /// bytes of option data to guarantee a comparison terminator. This
    /// stops the server answering its own link-local broadcasts.
    fn is_self_sent(&self, req: &Message) -> bool {
        match client_host_name(req) {
            Some(name) => name.eq_ignore_ascii_case(&self.config.server_name),
            None => false,
        }
    }

    fn handle_discover(&mut self, req: Message) -> ServerAction {
        let client_id = req.client_id();
        let existing = self.store.find_by_client_id(&client_id).map(|b| b.addr_value);

        let offered = match self.allocator.propose(&self.subnet, &self.store, existing) {
            Some(addr) => addr,
            None => {
                self.warn(ServerError::PoolExhausted);
                return ServerAction::Ignore;
            }
        };

        if existing.is_none() {
            self.store.insert(Binding { addr_value: offered, client_id: client_id.clone() });
            self.log_binding_table();
        }
        // The allocator's cursor is committed by the transport edge's
        // `confirm_sent`, once this OFFER has actually left the wire
        // (spec.md §3/§4.3: "updated only when an OFFER is actually
        // sent") — not here, and not for ACK/NAK.

        let offered_ip = value_to_ip(offered);
        let mut reply = req.clone();
        reply.yiaddr = offered_ip;
        let dest = self.destination(&req, &mut reply, false);

        self.observer.on_offer(client_host_name(&req).as_deref().unwrap_or(""), offered_ip);
        ServerAction::Reply(self.build_reply(reply, MessageType::Offer), dest)
    }

    /// Dispatches a REQUEST by its option 54 (Server Identifier).
    ///
    /// spec.md §4.4's prose describes the verify/extend path as "option
    /// 54 absent OR not ours" — which would fall through here when a
    /// REQUEST names a *different* server, matching the original
    /// (`DHCPLite.cpp`'s equivalent check only tests for `giaddr`/zero
    /// `ciaddr` combinations, not for our own identifier, so it falls
    /// through to verify/extend for a foreign server id too). spec.md §8
    /// scenario 5 contradicts that prose and expects no reply at all when
    /// option 54 names a different server. This implementation follows
    /// the worked fixture over the prose: a REQUEST naming a different
    /// server's identifier is always ignored, never treated as
    /// verify/extend, since a request explicitly selecting another DHCP
    /// server is that server's business, not ours, regardless of ciaddr.
    fn handle_request(&mut self, req: Message) -> ServerAction {
        match get_server_id(&req) {
            Some(sid) if sid == self.config.server_addr => self.handle_request_selecting(req),
            Some(_not_ours) => ServerAction::Ignore,
            None => self.handle_request_verify_extend(req),
        }
    }

    /// Client is responding to our own OFFER. `ciaddr` must be zero.
    fn handle_request_selecting(&mut self, req: Message) -> ServerAction {
        if !req.ciaddr.is_unspecified() {
            self.warn(ServerError::SelectingWithNonzeroCiaddr);
            return ServerAction::Ignore;
        }
        let client_id = req.client_id();
        let bound = self.store.find_by_client_id(&client_id).map(|b| b.addr_value);
        self.finish_request(req, bound)
    }

    /// init-reboot (option 50 present) or renewing/rebinding (option 50
    /// absent, `ciaddr` nonzero). Anything else is malformed.
    fn handle_request_verify_extend(&mut self, req: Message) -> ServerAction {
        let requested = get_requested_ip(&req);
        let ciaddr = req.ciaddr;

        let is_init_reboot = requested.is_some();
        let is_renewing = requested.is_none() && !ciaddr.is_unspecified();
        if !is_init_reboot && !is_renewing {
            self.warn(ServerError::UnrecognizedRequestState);
            return ServerAction::Ignore;
        }

        let client_id = req.client_id();
        let binding = self.store.find_by_client_id(&client_id);
        let matches = binding
            .map(|b| {
                Some(b.addr_value) == requested.map(ip_to_value) || b.addr_value == ip_to_value(ciaddr)
            })
            .unwrap_or(false);
        let bound = if matches { binding.map(|b| b.addr_value) } else { None };
        self.finish_request(req, bound)
    }

    fn finish_request(&mut self, req: Message, bound: Option<u32>) -> ServerAction {
        let mut reply = req.clone();
        match bound {
            Some(addr) => {
                let ip = value_to_ip(addr);
                reply.ciaddr = ip;
                reply.yiaddr = ip;
                let dest = self.destination(&req, &mut reply, false);
                self.observer.on_ack(client_host_name(&req).as_deref().unwrap_or(""), ip);
                ServerAction::Reply(self.build_reply(reply, MessageType::Ack), dest)
            }
            None => {
                reply.ciaddr = Ipv4Addr::UNSPECIFIED;
                reply.yiaddr = Ipv4Addr::UNSPECIFIED;
                let dest = self.destination(&req, &mut reply, true);
                let previous = self
                    .store
                    .find_by_client_id(&req.client_id())
                    .map(|b| value_to_ip(b.addr_value));
                self.observer.on_nak(client_host_name(&req).as_deref().unwrap_or(""), previous);
                ServerAction::Reply(self.build_reply(reply, MessageType::Nak), dest)
            }
        }
    }

    /// Stamps the shared reply header fields (op, server host name and
    /// address) and the DHCP message-type option on top of whatever
    /// header fields the caller already set (xid, yiaddr, ciaddr, giaddr,
    /// chaddr, bdcast_flag). The wire encoding of the fixed reply-options
    /// layout (lease time, mask, server id) happens in the transport
    /// edge's call to `Message::encode_reply`, which needs the
    /// `ServerConfig` values this type already owns — `Message` itself
    /// never stores a pre-serialized buffer.
    fn build_reply(&self, mut reply: Message, msg_type: MessageType) -> Message {
        reply.op = OpCode::BOOTREPLY;
        reply.sname = self.config.server_name.clone();
        reply.siaddr = self.config.server_addr;
        reply.options = vec![ConfigOption {
            code: OptionCode::DhcpMessageType,
            value: vec![msg_type.into()],
        }];
        reply
    }
}

/// The client's self-reported host name, from option 12 — per spec.md §6
/// and the original (`DHCPLite.cpp`'s `pcsClientHostName`), this is what
/// identifies a client to the observer, not `sname` (the message
/// header's *server* host name field, empty on essentially every
/// client request). Capped at 255 bytes of option data, matching
/// `is_self_sent`'s cap, so a 256-byte option never depends on an
/// absent terminator.
fn client_host_name(req: &Message) -> Option<String> {
    let opt = req.get_config_option(OptionCode::HostName)?;
    let capped = &opt.value[..opt.value.len().min(255)];
    std::str::from_utf8(capped).ok().map(str::to_string)
}

fn get_server_id(req: &Message) -> Option<Ipv4Addr> {
    req.get_config_option(OptionCode::ServerId).and_then(ipv4_from_option)
}

fn get_requested_ip(req: &Message) -> Option<Ipv4Addr> {
    req.get_config_option(OptionCode::RequestedIpAddr).and_then(ipv4_from_option)
}

fn ipv4_from_option(opt: &ConfigOption) -> Option<Ipv4Addr> {
    if opt.value.len() != 4 {
        return None;
    }
    Some(Ipv4Addr::new(opt.value[0], opt.value[1], opt.value[2], opt.value[3]))
}
