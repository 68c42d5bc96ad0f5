//! Tools module - Tool implementations for the agents
//!
//! Contains the registry, the invoker shared by tool-using agents, the
//! network diagnostics and the ticketing tool.

pub mod escalation;
pub mod invoker;
pub mod network;
pub mod registry;

pub use escalation::{escalation_tools, EscalateRequestTool};
pub use invoker::ToolInvoker;
pub use network::{network_tools, WhoisRecord};
pub use registry::{json_schema, Tool, ToolError, ToolRegistry};
