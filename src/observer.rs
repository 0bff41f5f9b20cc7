// The collaborator that decouples the handler from any particular
// notification sink. Grounded on the Fuchsia dhcp crate's direct
// `fx_log_info!`/`fx_log_err!` call sites in its read loop, generalized
// into an injectable trait per spec.md §9's split of fatal errors from
// warnings into two channels.

use log::{info, warn};
use std::net::Ipv4Addr;

/// Notified of every reply the server decides to send, and of every
/// non-fatal problem encountered along the way. Implementors must not
/// block or panic: these calls happen on the hot path of the read loop.
pub trait Observer {
    fn on_offer(&self, host: &str, addr: Ipv4Addr);
    fn on_ack(&self, host: &str, addr: Ipv4Addr);
    fn on_nak(&self, host: &str, previous: Option<Ipv4Addr>);
    fn on_warning(&self, msg: &str);
}

/// The default observer: logs each event via the `log` facade at a level
/// matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn on_offer(&self, host: &str, addr: Ipv4Addr) {
        info!("offering {} to {}", addr, host);
    }

    fn on_ack(&self, host: &str, addr: Ipv4Addr) {
        info!("acking {} to {}", addr, host);
    }

    fn on_nak(&self, host: &str, previous: Option<Ipv4Addr>) {
        match previous {
            Some(addr) => warn!("naking {} (previously {})", host, addr),
            None => warn!("naking {} (no known binding)", host),
        }
    }

    fn on_warning(&self, msg: &str) {
        warn!("{}", msg);
    }
}

/// A silent observer for tests, where notification content is irrelevant.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_offer(&self, _host: &str, _addr: Ipv4Addr) {}
    fn on_ack(&self, _host: &str, _addr: Ipv4Addr) {}
    fn on_nak(&self, _host: &str, _previous: Option<Ipv4Addr>) {}
    fn on_warning(&self, _msg: &str) {}
}
