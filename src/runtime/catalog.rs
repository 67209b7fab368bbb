//! Deployments: named bundles of task factories that can be launched.

use crate::runtime::process::{ComponentProcess, ProcessFactory};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One task of a deployment.
#[derive(Clone)]
pub struct TaskTemplate {
    pub name: String,
    pub factory: ProcessFactory,
}

impl fmt::Debug for TaskTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTemplate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Deployment name → tasks it brings up.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    deployments: BTreeMap<String, Vec<TaskTemplate>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to `deployment`, creating the deployment if needed.
    pub fn register<F, P>(&mut self, deployment: &str, task: &str, factory: F) -> &mut Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: ComponentProcess + 'static,
    {
        let factory: ProcessFactory = Arc::new(move || Box::new(factory()) as Box<dyn ComponentProcess>);
        self.register_factory(deployment, task, factory)
    }

    pub fn register_factory(
        &mut self,
        deployment: &str,
        task: &str,
        factory: ProcessFactory,
    ) -> &mut Self {
        self.deployments
            .entry(deployment.to_string())
            .or_default()
            .push(TaskTemplate {
                name: task.to_string(),
                factory,
            });
        self
    }

    pub fn deployment(&self, name: &str) -> Option<&[TaskTemplate]> {
        self.deployments.get(name).map(Vec::as_slice)
    }

    pub fn deployments(&self) -> impl Iterator<Item = &str> {
        self.deployments.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deployments.contains_key(name)
    }
}
