//! Relay — built-in pass-through task.
//!
//! Forwards every `decimation`-th sample from `in` to `out`, keeping the
//! original timestamp. Used for run configurations that need a named hop
//! between two components, and as a simple live component in tests.

use crate::pipeline::param::{ParamDescriptor, ParamKind, ParamValue, Parameters};
use crate::pipeline::port::{PortDescriptor, TypeName};
use crate::runtime::process::{Activity, ComponentProcess, TaskContext};

pub const RELAY_INPUT: &str = "in";
pub const RELAY_OUTPUT: &str = "out";

pub struct RelayNode {
    type_name: TypeName,
    decimation: u64,
    seen: u64,
}

impl RelayNode {
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            decimation: 1,
            seen: 0,
        }
    }
}

impl ComponentProcess for RelayNode {
    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::input(RELAY_INPUT, self.type_name.clone()).required(),
            PortDescriptor::output(RELAY_OUTPUT, self.type_name.clone()),
        ]
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        vec![ParamDescriptor::with_default(
            "decimation",
            ParamKind::Int,
            ParamValue::Int(1),
        )]
    }

    fn activity(&self) -> Activity {
        Activity::PortDriven
    }

    fn configure(&mut self, params: &Parameters, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        let decimation = params.int("decimation").unwrap_or(1);
        anyhow::ensure!(decimation >= 1, "decimation must be at least 1, got {decimation}");
        self.decimation = decimation as u64;
        Ok(())
    }

    fn start(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        self.seen = 0;
        Ok(())
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        while let Some(sample) = ctx.read(RELAY_INPUT)? {
            self.seen += 1;
            if (self.seen - 1) % self.decimation == 0 {
                ctx.forward(RELAY_OUTPUT, sample)?;
            }
        }
        Ok(())
    }
}
