use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{
    context::Context,
    error::{GraphError, Result},
    task::{NextAction, Task, TaskResult},
};

/// Upper bound on tasks run by one execution, guards against edge cycles
pub const DEFAULT_MAX_STEPS: usize = 64;

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Where a task goes after it asks to continue
#[derive(Clone)]
enum Edge {
    Direct(String),
    Conditional {
        condition: EdgeCondition,
        yes: String,
        no: String,
    },
}

impl Edge {
    fn target(&self, context: &Context) -> &str {
        match self {
            Edge::Direct(to) => to,
            Edge::Conditional { condition, yes, no } => {
                if condition(context) {
                    yes
                } else {
                    no
                }
            }
        }
    }
}

/// An immutable graph of tasks, built once with [`GraphBuilder`] and shared
/// between concurrent executions
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: HashMap<String, Edge>,
    start_task_id: Option<String>,
    max_steps: usize,
}

impl Graph {
    /// Run the graph from its start task until a task ends the execution or
    /// continues without an outgoing edge
    pub async fn execute(&self, context: Context) -> Result<ExecutionResult> {
        let start = self.start_task_id.clone().ok_or(GraphError::NoStartTask)?;
        self.execute_from(&start, context).await
    }

    /// Run the graph starting from a specific task
    pub async fn execute_from(&self, task_id: &str, context: Context) -> Result<ExecutionResult> {
        let mut current = task_id.to_string();
        let mut path = Vec::new();

        loop {
            if path.len() >= self.max_steps {
                return Err(GraphError::StepLimitExceeded(self.max_steps));
            }

            let result = self.execute_single_task(&current, context.clone()).await?;
            path.push(result.task_id.clone());

            debug!(
                graph_id = %self.id,
                task_id = %result.task_id,
                next_action = ?result.next_action,
                status = result.status_message.as_deref().unwrap_or(""),
                "Task finished"
            );

            match result.next_action {
                NextAction::End => {
                    return Ok(ExecutionResult {
                        response: result.response,
                        path,
                    });
                }
                NextAction::GoTo(target_id) => {
                    if !self.tasks.contains_key(&target_id) {
                        return Err(GraphError::TaskNotFound(target_id));
                    }
                    current = target_id;
                }
                NextAction::ContinueAndExecute => match self.find_next_task(&current, &context) {
                    Some(next_task_id) => current = next_task_id,
                    None => {
                        return Ok(ExecutionResult {
                            response: result.response,
                            path,
                        });
                    }
                },
            }
        }
    }

    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;

        let mut result = task.run(context).await?;
        result.task_id = task_id.to_string();
        Ok(result)
    }

    /// Find the next task based on the outgoing edge of `current_task_id`
    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        self.edges
            .get(current_task_id)
            .map(|edge| edge.target(context).to_string())
    }

    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(task_id).cloned()
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                id: id.into(),
                tasks: HashMap::new(),
                edges: HashMap::new(),
                start_task_id: None,
                max_steps: DEFAULT_MAX_STEPS,
            },
        }
    }

    /// Add a task; the first task added becomes the start task
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.start_task_id.is_none() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    /// Add an unconditional edge, replacing any previous edge out of `from`
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Add a branching edge: `yes` when the condition holds, `no` otherwise
    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.graph.edges.insert(
            from.into(),
            Edge::Conditional {
                condition: Arc::new(condition),
                yes: yes.into(),
                no: no.into(),
            },
        );
        self
    }

    /// Set the starting task, ignored unless the task has been added
    pub fn set_start_task(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if self.graph.tasks.contains_key(&task_id) {
            self.graph.start_task_id = Some(task_id);
        }
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.graph.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// Outcome of one graph execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Response of the last task that ran
    pub response: Option<String>,
    /// Ids of the tasks that ran, in order
    pub path: Vec<String>,
}

impl ExecutionResult {
    pub fn visited(&self, task_id: &str) -> bool {
        self.path.iter().any(|id| id == task_id)
    }
}
