//! Kubernetes integration for logbridge
//!
//! This crate provides ConfigMap access and the forwarder sync that keeps the
//! log store forwarder configuration in line with the cluster's forwarders.

mod client;
mod sync;

pub use client::{ConfigMapRef, ConfigStore, KubeConfigStore};
pub use sync::{FORWARDER_KEY, ForwarderSync, filter_invalid, load_worker_template, merge_forwarders};
