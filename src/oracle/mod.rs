//! Oracle inputs: parameter documents to witness assignment.
//!
//! ```text
//! ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ ParameterLoader  │───►│ WitnessAssembler │───►│ OracleAssignment │
//! │  (5 documents)   │    │  (threshold)     │    │ + OracleSkeleton │
//! └──────────────────┘    └──────────────────┘    └──────────────────┘
//! ```

pub mod assembler;
pub mod params;
pub mod schema;

pub use assembler::{
    counter_block, pad_handshake_secret, AssemblyError, OracleAssignment, OracleSkeleton,
    WitnessAssembler,
};
pub use params::{OracleParameters, ParamField, ParamSource, ParameterLoader, ParamsError};
pub use schema::{SchemaError, Visibility, WitnessField, WitnessSchema};
