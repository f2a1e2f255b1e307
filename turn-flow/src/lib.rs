//! # turn-flow
//!
//! A small task-graph engine for conversational turns. A [`Graph`] wires
//! [`Task`]s together with plain or conditional edges; one call to
//! [`Graph::execute`] runs a single turn end to end over a fresh [`Context`].
//!
//! ```rust,ignore
//! let graph = GraphBuilder::new("turn")
//!     .add_task(extract.clone())
//!     .add_task(compose.clone())
//!     .add_task(apologize.clone())
//!     .add_conditional_edge(
//!         extract.id(),
//!         |ctx| ctx.contains_key("extracted"),
//!         compose.id(),
//!         apologize.id(),
//!     )
//!     .build();
//!
//! let context = Context::new();
//! context.set("user_input", "Met Dr. Smith today").await;
//! let result = graph.execute(context).await?;
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod task;

// Re-export commonly used types
pub use context::{Context, MessageRole, SerializableMessage};
pub use error::{GraphError, Result};
pub use graph::{ExecutionResult, Graph, GraphBuilder};
pub use task::{NextAction, Task, TaskResult};
