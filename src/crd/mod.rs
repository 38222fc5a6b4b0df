//! Custom Resource Definitions for the Iter8 operator
//!
//! This module defines the `Iter8` CRD and the types its manifest is built from.

mod iter8;
pub mod types;


pub use iter8::{Iter8, Iter8Spec, Iter8Status, ObjectKey};
pub use types::*;
