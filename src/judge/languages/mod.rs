//! Concrete language backends.

pub mod c;
pub mod processing;
pub mod python;
