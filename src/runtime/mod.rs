//! Linked programs and their evaluation

pub mod interpreter;
pub mod op;
pub mod program;

pub use interpreter::{Interpreter, Parameters};
pub use op::{DataType, OpAddress, OpArgs, OpType, NO_INDEX};
pub use program::{ConstantSource, ImageConstant, ParamValue, ParameterDesc, Program};
