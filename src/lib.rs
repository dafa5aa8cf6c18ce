//! Endpoint controller
//!
//! Keeps the Endpoints of opted-in Kubernetes Services in sync with the
//! health of the external blockchain nodes they front.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod rest_api;

pub use error::{Error, Result};
