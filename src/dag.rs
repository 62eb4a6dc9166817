//! A task runs once all of its upstream tasks succeeded. A teardown task
//! runs whenever every one of its setups succeeded.

use async_trait::async_trait;
use eyre::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;
use thiserror::Error;

#[async_trait]
pub trait Task<C>: Send + Sync {
    async fn run(&self, ctx: &mut C) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("task `{0}` is already defined")]
    DuplicateTask(String),
    #[error("task id {0} does not belong to this graph")]
    UnknownTask(usize),
    #[error("task `{0}` cannot depend on itself")]
    SelfDependency(String),
    #[error("dependency cycle through tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum TaskState {
    Success,
    Failed(String),
    /// Not run because an upstream task did not succeed.
    UpstreamFailed,
    /// Teardown not run because its setup never succeeded.
    Skipped,
}

#[derive(Serialize, Debug, Clone)]
pub struct TaskReport {
    pub id: String,
    pub state: TaskState,
    pub elapsed_ms: u128,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct GraphRun {
    pub tasks: Vec<TaskReport>,
}

impl GraphRun {
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Success)
    }

    pub fn state_of(&self, id: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.id == id).map(|t| &t.state)
    }

    /// First failure, in execution order.
    pub fn first_failure(&self) -> Option<(&str, &str)> {
        self.tasks.iter().find_map(|t| match &t.state {
            TaskState::Failed(err) => Some((t.id.as_str(), err.as_str())),
            _ => None,
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    pub id: String,
    pub upstream: Vec<String>,
    pub teardown_of: Vec<String>,
}

struct Node<C> {
    id: String,
    task: Box<dyn Task<C>>,
    upstream: BTreeSet<usize>,
    setups: BTreeSet<usize>,
}

pub struct TaskGraph<C> {
    nodes: Vec<Node<C>>,
}

impl<C> Default for TaskGraph<C> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<C: Send> TaskGraph<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(
        &mut self,
        id: impl Into<String>,
        task: impl Task<C> + 'static,
    ) -> Result<TaskId, GraphError> {
        let id = id.into();
        if self.nodes.iter().any(|n| n.id == id) {
            return Err(GraphError::DuplicateTask(id));
        }
        self.nodes.push(Node {
            id,
            task: Box::new(task),
            upstream: BTreeSet::new(),
            setups: BTreeSet::new(),
        });
        Ok(TaskId(self.nodes.len() - 1))
    }

    fn check(&self, id: TaskId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownTask(id.0))
        }
    }

    pub fn add_dependency(&mut self, upstream: TaskId, downstream: TaskId) -> Result<(), GraphError> {
        self.check(upstream)?;
        self.check(downstream)?;
        if upstream == downstream {
            return Err(GraphError::SelfDependency(self.nodes[upstream.0].id.clone()));
        }
        self.nodes[downstream.0].upstream.insert(upstream.0);
        Ok(())
    }

    /// `a >> b >> c`: each task depends on the one before it.
    pub fn chain(&mut self, ids: &[TaskId]) -> Result<(), GraphError> {
        for pair in ids.windows(2) {
            self.add_dependency(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Binds `teardown` to `setup`. The teardown also becomes a downstream of
    /// its setup.
    pub fn as_teardown(&mut self, teardown: TaskId, setup: TaskId) -> Result<(), GraphError> {
        self.add_dependency(setup, teardown)?;
        self.nodes[teardown.0].setups.insert(setup.0);
        Ok(())
    }

    /// Kahn's algorithm; among ready tasks the earliest added runs first.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.upstream.len()).collect();
        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_first() {
            order.push(TaskId(next));
            for (idx, node) in self.nodes.iter().enumerate() {
                if node.upstream.contains(&next) {
                    indegree[idx] -= 1;
                    if indegree[idx] == 0 {
                        ready.insert(idx);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let placed: BTreeSet<usize> = order.iter().map(|t| t.0).collect();
            let stuck = (0..self.nodes.len())
                .filter(|i| !placed.contains(i))
                .map(|i| self.nodes[i].id.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    pub fn describe(&self) -> Result<Vec<NodeDescription>, GraphError> {
        let names = |set: &BTreeSet<usize>| -> Vec<String> {
            set.iter().map(|i| self.nodes[*i].id.clone()).collect()
        };
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|id| {
                let node = &self.nodes[id.0];
                NodeDescription {
                    id: node.id.clone(),
                    upstream: names(&node.upstream),
                    teardown_of: names(&node.setups),
                }
            })
            .collect())
    }

    /// Runs every task in topological order, one at a time. Task failures
    /// are recorded in the returned run; only a malformed graph is an error.
    pub async fn execute(&self, ctx: &mut C) -> Result<GraphRun, GraphError> {
        let order = self.topological_order()?;
        let mut states: Vec<Option<TaskState>> = vec![None; self.nodes.len()];
        let mut run = GraphRun::default();

        for TaskId(idx) in order {
            let node = &self.nodes[idx];
            let succeeded = |i: &usize| states[*i] == Some(TaskState::Success);

            let runnable = if node.setups.is_empty() {
                node.upstream.iter().all(succeeded)
            } else {
                node.setups.iter().all(succeeded)
            };

            let started = Instant::now();
            let state = if runnable {
                log::info!("Running task `{}`", node.id);
                match node.task.run(ctx).await {
                    Ok(()) => TaskState::Success,
                    Err(err) => {
                        log::error!("Task `{}` failed: {:?}", node.id, err);
                        TaskState::Failed(format!("{err:#}"))
                    }
                }
            } else if node.setups.is_empty() {
                log::warn!("Task `{}` not run: upstream failed", node.id);
                TaskState::UpstreamFailed
            } else {
                log::warn!("Teardown `{}` skipped: setup did not succeed", node.id);
                TaskState::Skipped
            };

            run.tasks.push(TaskReport {
                id: node.id.clone(),
                state: state.clone(),
                elapsed_ms: started.elapsed().as_millis(),
            });
            states[idx] = Some(state);
        }
        Ok(run)
    }
}
