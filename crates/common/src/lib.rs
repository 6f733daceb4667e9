//! Error-context plumbing shared by the wagate crates.
//!
//! Deliberately tiny: each crate owns its error enum, and this crate only
//! supplies the [`FromMessage`] hook plus the [`impl_context!`] macro that
//! stamps out `.context()`/`.with_context()` adapters targeting it.

pub mod error;

pub use error::FromMessage;
