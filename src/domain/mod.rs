//! Request vocabulary shared across the control plane

mod request;
mod tags;

pub use request::{
    arg_f64, arg_flag, arg_str, is_truthy, parse_arg_pairs, request_key, scope_size,
    RequestDescriptor, ResourceEstimate, ToolArgs,
};
pub use tags::{ComplexityLevel, DomainTag, OperationTag, Priority};
