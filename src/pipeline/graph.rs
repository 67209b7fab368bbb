//! The typed connection graph.
//!
//! Connections are validated when they are made: both ports must exist with
//! the right direction, payload types must match exactly and a port pair is
//! wired at most once. Any failed `connect` leaves the graph untouched.
//! After activation the graph is sealed until teardown.

use crate::error::{DataflowError, Result};
use crate::pipeline::component::Component;
use crate::pipeline::endpoint::{InputPort, OutputPort};
use crate::pipeline::id::{ComponentId, ConnectionId, PortId};
use crate::pipeline::policy::ConnectionPolicy;
use crate::pipeline::port::{PortAddress, PortDirection};
use crate::pipeline::transport::{Link, LinkEnds, LinkStats};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A live edge between an output port and an input port.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: PortId,
    pub to: PortId,
    pub from_addr: PortAddress,
    pub to_addr: PortAddress,
    pub policy: ConnectionPolicy,
    link: Arc<Link>,
    output: OutputPort,
    input: InputPort,
}

impl Connection {
    pub fn source(&self) -> ComponentId {
        self.from.component()
    }

    pub fn destination(&self) -> ComponentId {
        self.to.component()
    }

    pub fn stats(&self) -> LinkStats {
        self.link.stats()
    }

    pub fn is_blocking(&self) -> bool {
        self.policy.is_blocking()
    }
}

/// Edge storage plus the pair index used for duplicate detection.
pub struct ConnectionGraph {
    connections: Vec<Option<Connection>>,
    by_pair: HashMap<(PortId, PortId), ConnectionId>,
    sealed: bool,
    generation: u64,
    default_block_timeout: Duration,
}

impl ConnectionGraph {
    pub fn new(default_block_timeout: Duration) -> Self {
        Self {
            connections: Vec::new(),
            by_pair: HashMap::new(),
            sealed: false,
            generation: 0,
            default_block_timeout,
        }
    }

    /// Wire `from.from_port` (an output) to `to.to_port` (an input).
    ///
    /// Re-issuing an existing pair with the same policy returns the existing
    /// connection; a different policy fails with `DuplicateConnection`.
    pub fn connect(
        &mut self,
        from: &Component,
        from_port: &str,
        to: &Component,
        to_port: &str,
        policy: ConnectionPolicy,
    ) -> Result<ConnectionId> {
        if self.sealed {
            return Err(DataflowError::GraphSealed);
        }

        let output = from
            .ports()
            .output(from_port)
            .ok_or_else(|| DataflowError::PortNotFound {
                component: from.name().to_string(),
                port: from_port.to_string(),
                direction: PortDirection::Output,
            })?;
        let input = to
            .ports()
            .input(to_port)
            .ok_or_else(|| DataflowError::PortNotFound {
                component: to.name().to_string(),
                port: to_port.to_string(),
                direction: PortDirection::Input,
            })?;

        let from_addr = PortAddress::new(from.name(), from_port);
        let to_addr = PortAddress::new(to.name(), to_port);

        let from_type = &output.descriptor().type_name;
        let to_type = &input.descriptor().type_name;
        if from_type != to_type {
            return Err(DataflowError::TypeMismatch {
                from: from_addr.to_string(),
                to: to_addr.to_string(),
                from_type: from_type.clone(),
                to_type: to_type.clone(),
            });
        }

        if let Some(&existing) = self.by_pair.get(&(output.id(), input.id())) {
            let same = self.connections[existing.index()]
                .as_ref()
                .is_some_and(|c| c.policy == policy);
            if same {
                return Ok(existing);
            }
            return Err(DataflowError::DuplicateConnection {
                from: from_addr.to_string(),
                to: to_addr.to_string(),
            });
        }

        let label = format!("{from_addr} -> {to_addr}");
        policy
            .validate()
            .map_err(|reason| DataflowError::InvalidConfiguration {
                component: label.clone(),
                reason,
            })?;

        let id = ConnectionId(self.connections.len() as u32);
        let link = Arc::new(Link::new(
            id,
            label.clone(),
            policy,
            policy.block_timeout(self.default_block_timeout),
            LinkEnds {
                source_name: from.name().to_string(),
                source_state: output.owner_state().clone(),
                source_slot: output.latest_slot(),
                dest_state: input.owner_state().clone(),
                dest_waker: input.waker().clone(),
            },
        ));
        output.attach(link.clone());
        input.attach(link.clone());

        tracing::debug!("Connected {} ({:?})", label, policy);
        self.by_pair.insert((output.id(), input.id()), id);
        self.connections.push(Some(Connection {
            id,
            from: output.id(),
            to: input.id(),
            from_addr,
            to_addr,
            policy,
            link,
            output: output.clone(),
            input: input.clone(),
        }));
        self.generation += 1;
        Ok(id)
    }

    /// Remove a connection. Unknown or already removed ids are ignored.
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        if self.sealed {
            return Err(DataflowError::GraphSealed);
        }
        self.remove(id);
        Ok(())
    }

    fn remove(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        conn.link.close();
        conn.output.detach(&conn.link);
        conn.input.detach(&conn.link);
        self.by_pair.remove(&(conn.from, conn.to));
        self.generation += 1;
        tracing::debug!("Disconnected {}", conn.link.label());
    }

    /// Tear down every connection and reopen the graph.
    pub fn clear(&mut self) {
        for index in 0..self.connections.len() {
            self.remove(ConnectionId(index as u32));
        }
        self.connections.clear();
        self.sealed = false;
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.index()).and_then(Option::as_ref)
    }

    pub fn find(&self, from: PortId, to: PortId) -> Option<ConnectionId> {
        self.by_pair.get(&(from, to)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::component::{ComponentKind, Control, StateCell};
    use crate::pipeline::endpoint::PortSet;
    use crate::pipeline::policy::OverflowPolicy;
    use crate::pipeline::port::PortDescriptor;
    use crate::pipeline::sample::Sample;
    use crate::pipeline::transport::Waker;
    use serde_json::json;

    const RBS: &str = "/base/samples/RigidBodyState";

    fn component(id: u32, name: &str, ports: &[PortDescriptor]) -> Component {
        let state = StateCell::new();
        let (waker, _rx) = Waker::pair();
        let set = PortSet::new(ComponentId(id), name, ports, state.clone(), waker).unwrap();
        Component::new(ComponentId(id), name, ComponentKind::LiveProcess, set, Vec::new(), state, Control::Local)
    }

    fn pair() -> (Component, Component) {
        (
            component(0, "orientation_estimator", &[
                PortDescriptor::output("attitude_b_g", RBS),
                PortDescriptor::output("heading", "/double"),
            ]),
            component(1, "uw_particle_localization", &[
                PortDescriptor::input("orientation_samples", RBS),
            ]),
        )
    }

    fn graph() -> ConnectionGraph {
        ConnectionGraph::new(Duration::from_millis(50))
    }

    #[test]
    fn test_connect_and_deliver() {
        let (a, b) = pair();
        let mut g = graph();
        let id = g
            .connect(&a, "attitude_b_g", &b, "orientation_samples", ConnectionPolicy::buffer(10))
            .unwrap();
        assert_eq!(g.len(), 1);
        assert_eq!(g.get(id).unwrap().destination(), b.id());

        a.ports()
            .output("attitude_b_g")
            .unwrap()
            .write(Sample::new(Duration::ZERO, json!({"yaw": 0.1})))
            .unwrap();
        let got = b.ports().input("orientation_samples").unwrap().read().unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn test_errors_leave_graph_unchanged() {
        let (a, b) = pair();
        let mut g = graph();

        let err = g
            .connect(&a, "heading", &b, "orientation_samples", ConnectionPolicy::data())
            .unwrap_err();
        assert!(matches!(err, DataflowError::TypeMismatch { .. }));

        let err = g
            .connect(&a, "missing", &b, "orientation_samples", ConnectionPolicy::data())
            .unwrap_err();
        assert!(matches!(err, DataflowError::PortNotFound { direction: PortDirection::Output, .. }));

        // An input used as a source is reported as a missing output.
        let err = g
            .connect(&b, "orientation_samples", &a, "attitude_b_g", ConnectionPolicy::data())
            .unwrap_err();
        assert!(matches!(err, DataflowError::PortNotFound { .. }));

        assert!(g.is_empty());
        assert!(!b.ports().input("orientation_samples").unwrap().is_connected());
    }

    #[test]
    fn test_duplicate_connection() {
        let (a, b) = pair();
        let mut g = graph();
        let first = g
            .connect(&a, "attitude_b_g", &b, "orientation_samples", ConnectionPolicy::data())
            .unwrap();
        let again = g
            .connect(&a, "attitude_b_g", &b, "orientation_samples", ConnectionPolicy::data())
            .unwrap();
        assert_eq!(first, again);

        let err = g
            .connect(
                &a,
                "attitude_b_g",
                &b,
                "orientation_samples",
                ConnectionPolicy::buffer(3).with_overflow(OverflowPolicy::DropNewest),
            )
            .unwrap_err();
        assert!(matches!(err, DataflowError::DuplicateConnection { .. }));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (a, b) = pair();
        let mut g = graph();
        let id = g
            .connect(&a, "attitude_b_g", &b, "orientation_samples", ConnectionPolicy::data())
            .unwrap();
        g.disconnect(id).unwrap();
        g.disconnect(id).unwrap();
        assert!(g.is_empty());
        assert!(!b.ports().input("orientation_samples").unwrap().is_connected());
    }

    #[test]
    fn test_sealed_graph_rejects_changes() {
        let (a, b) = pair();
        let mut g = graph();
        g.seal();
        let err = g
            .connect(&a, "attitude_b_g", &b, "orientation_samples", ConnectionPolicy::data())
            .unwrap_err();
        assert!(matches!(err, DataflowError::GraphSealed));
        g.clear();
        assert!(!g.is_sealed());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let (a, b) = pair();
        let mut g = graph();
        let err = g
            .connect(&a, "attitude_b_g", &b, "orientation_samples", ConnectionPolicy::buffer(0))
            .unwrap_err();
        assert!(matches!(err, DataflowError::InvalidConfiguration { .. }));
        assert!(g.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_connect_succeeds_iff_types_match(
            from_type in proptest::sample::select(vec![RBS, "/base/samples/SonarBeam", "/double"]),
            to_type in proptest::sample::select(vec![RBS, "/base/samples/SonarBeam", "/double"]),
        ) {
            let a = component(0, "producer", &[PortDescriptor::output("out", from_type)]);
            let b = component(1, "consumer", &[PortDescriptor::input("in", to_type)]);
            let mut g = graph();
            let result = g.connect(&a, "out", &b, "in", ConnectionPolicy::data());
            if from_type == to_type {
                proptest::prop_assert!(result.is_ok());
                proptest::prop_assert_eq!(g.len(), 1);
            } else {
                let is_mismatch = matches!(result, Err(DataflowError::TypeMismatch { .. }));
                proptest::prop_assert!(is_mismatch);
                proptest::prop_assert!(g.is_empty());
            }
        }
    }
}
