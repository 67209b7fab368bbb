//! Runtime port handles.
//!
//! `OutputPort` and `InputPort` are cheap `Arc` handles shared between the
//! owning component's thread and the connection graph. The graph attaches
//! and detaches `Link`s; the component only writes and reads.

use crate::error::{DataflowError, Result};
use crate::pipeline::component::{ComponentState, StateCell};
use crate::pipeline::id::{ComponentId, PortId};
use crate::pipeline::port::{PortDescriptor, PortDirection};
use crate::pipeline::sample::Sample;
use crate::pipeline::transport::{LatestSlot, Link, Waker};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

struct PortCore {
    id: PortId,
    owner: String,
    descriptor: PortDescriptor,
    owner_state: StateCell,
    links: RwLock<Vec<Arc<Link>>>,
}

impl PortCore {
    fn links(&self) -> Vec<Arc<Link>> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attach(&self, link: Arc<Link>) {
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(link);
    }

    fn detach(&self, link: &Arc<Link>) {
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, link));
    }

    fn link_count(&self) -> usize {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Producer side of a port.
#[derive(Clone)]
pub struct OutputPort {
    core: Arc<PortCore>,
    latest: Arc<LatestSlot>,
}

impl OutputPort {
    pub fn id(&self) -> PortId {
        self.core.id
    }

    pub fn owner(&self) -> &str {
        &self.core.owner
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        &self.core.descriptor
    }

    pub fn name(&self) -> &str {
        &self.core.descriptor.name
    }

    pub(crate) fn latest_slot(&self) -> Arc<LatestSlot> {
        self.latest.clone()
    }

    pub(crate) fn owner_state(&self) -> &StateCell {
        &self.core.owner_state
    }

    /// Most recent sample written on this port.
    pub fn latest(&self) -> Option<Sample> {
        self.latest.latest().map(|(_, sample)| sample)
    }

    pub fn connection_count(&self) -> usize {
        self.core.link_count()
    }

    /// Publish a sample to every connection. A write from a stopped or
    /// failed component is discarded. All connections receive the sample
    /// even when one of them reports an error; the first error is returned.
    pub fn write(&self, sample: Sample) -> Result<()> {
        if self.core.owner_state.get().is_inert() {
            return Ok(());
        }
        self.latest.publish(sample.clone());

        let mut first_err = None;
        for link in self.core.links().iter().filter(|l| l.is_push()) {
            if let Err(e) = link.push(&sample) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn attach(&self, link: Arc<Link>) {
        self.core.attach(link);
    }

    pub(crate) fn detach(&self, link: &Arc<Link>) {
        self.core.detach(link);
    }
}

impl std::fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutputPort({}.{})", self.core.owner, self.core.descriptor.name)
    }
}

/// Consumer side of a port.
#[derive(Clone)]
pub struct InputPort {
    core: Arc<PortCore>,
    waker: Waker,
}

impl InputPort {
    pub fn id(&self) -> PortId {
        self.core.id
    }

    pub fn owner(&self) -> &str {
        &self.core.owner
    }

    pub fn descriptor(&self) -> &PortDescriptor {
        &self.core.descriptor
    }

    pub fn name(&self) -> &str {
        &self.core.descriptor.name
    }

    pub(crate) fn owner_state(&self) -> &StateCell {
        &self.core.owner_state
    }

    pub(crate) fn waker(&self) -> &Waker {
        &self.waker
    }

    pub fn is_connected(&self) -> bool {
        self.core.link_count() > 0
    }

    /// Next available sample across this input's connections, checked in
    /// connection order. Returns `UpstreamFailed` only once every
    /// connection is empty and one of the producers has failed.
    pub fn read(&self) -> Result<Option<Sample>> {
        if self.core.owner_state.get() == ComponentState::Stopped {
            return Ok(None);
        }
        let links = self.core.links();
        for link in &links {
            if let Some(sample) = link.take() {
                return Ok(Some(sample));
            }
        }
        if let Some(failed) = links.iter().find(|l| l.source_failed()) {
            return Err(DataflowError::UpstreamFailed {
                component: self.core.owner.clone(),
                port: self.core.descriptor.name.clone(),
                upstream: failed.source_name().to_string(),
            });
        }
        Ok(None)
    }

    /// Take everything currently buffered.
    pub fn drain(&self) -> Result<Vec<Sample>> {
        let mut out = Vec::new();
        while let Some(sample) = self.read()? {
            out.push(sample);
        }
        Ok(out)
    }

    /// True while a push connection still holds queued samples.
    pub fn has_queued(&self) -> bool {
        self.core.links().iter().any(|l| l.queued() > 0)
    }

    pub(crate) fn attach(&self, link: Arc<Link>) {
        self.core.attach(link);
    }

    pub(crate) fn detach(&self, link: &Arc<Link>) {
        self.core.detach(link);
    }
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InputPort({}.{})", self.core.owner, self.core.descriptor.name)
    }
}

/// Either end of a port, as looked up by name.
#[derive(Clone, Debug)]
pub enum PortHandle {
    Input(InputPort),
    Output(OutputPort),
}

impl PortHandle {
    pub fn descriptor(&self) -> &PortDescriptor {
        match self {
            PortHandle::Input(p) => p.descriptor(),
            PortHandle::Output(p) => p.descriptor(),
        }
    }

    pub fn id(&self) -> PortId {
        match self {
            PortHandle::Input(p) => p.id(),
            PortHandle::Output(p) => p.id(),
        }
    }
}

/// All ports of one component, indexed by name.
#[derive(Clone, Debug, Default)]
pub struct PortSet {
    ports: Vec<PortHandle>,
    by_name: HashMap<String, usize>,
}

impl PortSet {
    /// Build handles for `descriptors`. Port names must be unique within a
    /// component.
    pub fn new(
        owner_id: ComponentId,
        owner: &str,
        descriptors: &[PortDescriptor],
        owner_state: StateCell,
        waker: Waker,
    ) -> Result<Self> {
        if descriptors.len() > PortId::MAX_PORTS {
            return Err(DataflowError::InvalidConfiguration {
                component: owner.to_string(),
                reason: format!("too many ports ({})", descriptors.len()),
            });
        }

        let mut set = PortSet::default();
        for (index, descriptor) in descriptors.iter().enumerate() {
            if set.by_name.contains_key(&descriptor.name) {
                return Err(DataflowError::InvalidConfiguration {
                    component: owner.to_string(),
                    reason: format!("duplicate port name '{}'", descriptor.name),
                });
            }
            let core = Arc::new(PortCore {
                id: PortId::new(owner_id, index as u16),
                owner: owner.to_string(),
                descriptor: descriptor.clone(),
                owner_state: owner_state.clone(),
                links: RwLock::new(Vec::new()),
            });
            let handle = match descriptor.direction {
                PortDirection::Input => PortHandle::Input(InputPort {
                    core,
                    waker: waker.clone(),
                }),
                PortDirection::Output => PortHandle::Output(OutputPort {
                    core,
                    latest: Arc::new(LatestSlot::new()),
                }),
            };
            set.by_name.insert(descriptor.name.clone(), set.ports.len());
            set.ports.push(handle);
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&PortHandle> {
        self.by_name.get(name).map(|&i| &self.ports[i])
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        match self.get(name)? {
            PortHandle::Input(p) => Some(p),
            PortHandle::Output(_) => None,
        }
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        match self.get(name)? {
            PortHandle::Output(p) => Some(p),
            PortHandle::Input(_) => None,
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &InputPort> {
        self.ports.iter().filter_map(|p| match p {
            PortHandle::Input(p) => Some(p),
            PortHandle::Output(_) => None,
        })
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OutputPort> {
        self.ports.iter().filter_map(|p| match p {
            PortHandle::Output(p) => Some(p),
            PortHandle::Input(_) => None,
        })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PortDescriptor> {
        self.ports.iter().map(PortHandle::descriptor)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
