//! Iter8 Operator: installs and tears down Iter8 on a Kubernetes cluster
//!
//! This crate provides a Kubernetes operator that provisions the iter8
//! controller and analytics engine for each `Iter8` custom resource, and
//! compiles the declared metrics into the analytics engine's query templates.

pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use crate::error::{Error, Result};
