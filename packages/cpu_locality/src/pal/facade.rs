mod probe;

pub(crate) use probe::*;
