mod bindings;
pub(crate) use bindings::*;

mod filesystem;
pub(crate) use filesystem::*;

mod probe;
pub(crate) use probe::*;

mod sysfs_values;
