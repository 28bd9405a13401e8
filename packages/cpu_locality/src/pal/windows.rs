mod bindings;
pub(crate) use bindings::*;

mod probe;
pub(crate) use probe::*;
