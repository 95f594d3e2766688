/// Provide wrapper boilerplate for raw ibverbs objects.
#[cfg(feature = "ibverbs")]
#[macro_use]
pub(crate) mod boilerplate;

/// Provide the local host name.
pub(crate) mod hostname;

/// Provide interoperability with C return values.
pub(crate) mod interop;
