//! Identity types for the dataflow graph.
//!
//! Names are resolved once at build time into these handles. All IDs are
//! newtypes over `u32` that double as indices into their storage vectors.

use std::fmt;

/// Index into the registry's component arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl ComponentId {
    pub const INVALID: ComponentId = ComponentId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ComponentId(INVALID)")
        } else {
            write!(f, "ComponentId({})", self.0)
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Compact port identifier. High 20 bits = component index, low 12 bits = port index.
/// Supports up to ~1M components with 4096 ports each.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl PortId {
    const PORT_BITS: u32 = 12;
    const PORT_MASK: u32 = (1 << Self::PORT_BITS) - 1;
    pub const MAX_PORTS: usize = 1 << Self::PORT_BITS;

    pub fn new(component: ComponentId, port_index: u16) -> Self {
        debug_assert!((port_index as usize) < Self::MAX_PORTS);
        Self((component.0 << Self::PORT_BITS) | (port_index as u32 & Self::PORT_MASK))
    }

    #[inline]
    pub fn component(self) -> ComponentId {
        ComponentId(self.0 >> Self::PORT_BITS)
    }

    #[inline]
    pub fn port_index(self) -> u16 {
        (self.0 & Self::PORT_MASK) as u16
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PortId(component={}, port={})",
            self.component().0,
            self.port_index()
        )
    }
}

/// Index into the connection graph's edge storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by `Orchestrator::subscribe`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionId(pub u32);

/// Handle returned by `Orchestrator::open_replay`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ReplayId(pub u32);

impl ReplayId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
