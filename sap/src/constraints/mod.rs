//! Constraint types supported by the SAP formulation.

mod friction_cone;
mod holonomic;
mod limit;

pub use friction_cone::*;
pub use holonomic::*;
pub use limit::*;
