pub mod attribute;
pub mod model;
pub mod spec;

pub use attribute::{Attribute, AttributeType};
pub use model::{Process, ProcessState};
pub use spec::{Conditions, FunctionSpec};
