// The address-binding store and the allocator that scans it. Grounded on
// the shape of the Fuchsia dhcp crate's `AddressPool` (available/allocated
// sets with a deterministic next-address policy) but reworked around a
// single ordered list of bindings plus an explicit wrap-around cursor, per
// spec.md §4.2-4.3.

use std::net::Ipv4Addr;

/// Converts a wire-order (big-endian) IPv4 address into the numeric form
/// used for pool arithmetic. A byte reversal, and therefore its own
/// inverse: `value_to_ip(ip_to_value(x)) == x`.
pub fn ip_to_value(addr: Ipv4Addr) -> u32 {
    let o = addr.octets();
    u32::from_be_bytes(o)
}

/// The inverse of `ip_to_value`.
pub fn value_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value.to_be_bytes())
}

/// The immutable bounds of the address range this server may hand out,
/// derived from `server_addr`/`mask` at startup per spec.md §3.
#[derive(Clone, Copy, Debug)]
pub struct SubnetPool {
    pub server_value: u32,
    pub min_value: u32,
    pub max_value: u32,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedConfig {
    #[error("subnet pool is empty: min address exceeds max address")]
    EmptyRange,
}

impl SubnetPool {
    /// Computes pool bounds from a server address and mask: the offerable
    /// range is network-base + 2 through network-base + (~mask & ~1),
    /// skipping the network address, the `.1` router convention, and the
    /// directed broadcast address. Explicit `min`/`max` override the
    /// derived bounds when given.
    pub fn new(
        server_addr: Ipv4Addr,
        mask: Ipv4Addr,
        min_addr: Option<Ipv4Addr>,
        max_addr: Option<Ipv4Addr>,
    ) -> Result<Self, MalformedConfig> {
        let server_value = ip_to_value(server_addr);
        let mask_value = ip_to_value(mask);
        let net_base = server_value & mask_value;

        let min_value = min_addr.map(ip_to_value).unwrap_or(net_base | 2);
        let max_value = max_addr.map(ip_to_value).unwrap_or((net_base | !mask_value) & !1);

        if min_value > max_value {
            return Err(MalformedConfig::EmptyRange);
        }
        Ok(SubnetPool { server_value, min_value, max_value })
    }

    fn size(&self) -> u64 {
        u64::from(self.max_value) - u64::from(self.min_value) + 1
    }

    fn wrapping_next(&self, value: u32) -> u32 {
        if value >= self.max_value {
            self.min_value
        } else {
            value + 1
        }
    }
}

/// A single client-to-address binding, per spec.md §3. The server's own
/// reservation is the one binding with an empty `client_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub addr_value: u32,
    pub client_id: Vec<u8>,
}

/// The set of all addresses this server currently considers in use,
/// including its own reservation. Appended to on DISCOVER; never pruned,
/// per the non-goal on lease expiry/DECLINE/RELEASE reclamation.
#[derive(Debug, Default)]
pub struct BindingStore {
    bindings: Vec<Binding>,
}

impl BindingStore {
    pub fn new() -> Self {
        BindingStore { bindings: Vec::new() }
    }

    /// Creates the store with the server's own self-binding already
    /// present, so the allocator never offers `server_value`.
    pub fn with_server_reservation(server_value: u32) -> Self {
        let mut store = Self::new();
        store.bindings.push(Binding { addr_value: server_value, client_id: Vec::new() });
        store
    }

    /// First binding whose `client_id` matches exactly, by length and
    /// content. An empty `client_id` never matches: that would otherwise
    /// let any request "find" the server's own reservation.
    pub fn find_by_client_id(&self, client_id: &[u8]) -> Option<&Binding> {
        if client_id.is_empty() {
            return None;
        }
        self.bindings.iter().find(|b| b.client_id == client_id)
    }

    /// First binding holding the given address value.
    pub fn find_by_addr_value(&self, addr_value: u32) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.addr_value == addr_value)
    }

    /// Appends a new binding. The caller (the allocator) is responsible
    /// for ensuring `addr_value` does not collide with an existing one.
    pub fn insert(&mut self, binding: Binding) {
        debug_assert!(self.find_by_addr_value(binding.addr_value).is_none());
        self.bindings.push(binding);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

/// Chooses which address to offer a client, per spec.md §4.3: re-offer an
/// existing binding idempotently, otherwise scan forward from the last
/// offered address (wrapping at the pool's edges) for the first free
/// slot, bounded by one full pass over the pool so exhaustion is always
/// detected rather than looping forever.
#[derive(Debug)]
pub struct Allocator {
    last_offered_value: u32,
}

impl Allocator {
    /// A fresh allocator's cursor starts at the pool's top address, so
    /// the very first proposal begins scanning from `min_value`.
    pub fn new(pool: &SubnetPool) -> Self {
        Allocator { last_offered_value: pool.max_value }
    }

    /// Proposes an address to offer. `existing` is the address value of
    /// a binding already held by this client, if any — re-offered
    /// unconditionally so repeated DISCOVERs are idempotent. Does not
    /// mutate the cursor; call `commit` once the reply is actually sent.
    pub fn propose(
        &self,
        pool: &SubnetPool,
        store: &BindingStore,
        existing: Option<u32>,
    ) -> Option<u32> {
        if let Some(addr) = existing {
            return Some(addr);
        }

        let mut candidate = self.wrap(pool, self.last_offered_value.wrapping_add(1));
        for _ in 0..pool.size() {
            if store.find_by_addr_value(candidate).is_none() {
                return Some(candidate);
            }
            candidate = pool.wrapping_next(candidate);
        }
        None
    }

    fn wrap(&self, pool: &SubnetPool, value: u32) -> u32 {
        if value > pool.max_value || value < pool.min_value {
            pool.min_value
        } else {
            value
        }
    }

    /// Records that `addr_value` was actually offered, advancing the
    /// cursor so the next proposal continues past it.
    pub fn commit(&mut self, addr_value: u32) {
        self.last_offered_value = addr_value;
    }
}
