//! Plan generation and pull-model execution.

pub mod aggregate;
pub mod distinct;
pub mod executor;
pub mod expressions;
pub mod join;
pub mod planner;
pub mod sort;

pub use executor::{Executor, RowStream};
pub use expressions::{Expr, ExpressionEvaluator, Operand};
pub use planner::{PlanNode, Planner};
