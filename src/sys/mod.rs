//! Platform dispatch. Exactly one of the submodules is compiled in and both expose
//! the same set of functions.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::*;
#[cfg(unix)]
pub use unix::SystemIdentity;

#[cfg(not(unix))]
mod unsupported;
#[cfg(not(unix))]
pub(crate) use unsupported::*;
#[cfg(not(unix))]
pub use unsupported::SystemIdentity;
