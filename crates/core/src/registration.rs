//! Minimal stand-ins for the registration/configuration/listener layer.
//!
//! Registration, configuration storage, listener construction, certificate
//! storage, and logging/tracing setup are explicitly out of scope for this
//! crate (§1). These types exist only so that [`crate::handle::Handle`] has
//! something real to tag-check against and so connections can hold an
//! `Arc<Configuration>` the way the specification describes; none of their
//! fields are interpreted here.

use std::sync::atomic::{AtomicU16, Ordering};

/// A registration groups connections under a shared app name and worker
/// partition count. Construction, teardown, and partition assignment
/// policy live in the (out-of-scope) registration layer; this crate only
/// needs to read `partition_count`.
#[derive(Debug)]
pub struct Registration {
    app_name: String,
    partition_count: u16,
    next_partition: AtomicU16,
}

impl Registration {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self::with_partitions(app_name, 1)
    }

    pub fn with_partitions(app_name: impl Into<String>, partition_count: u16) -> Self {
        Self {
            app_name: app_name.into(),
            partition_count: partition_count.max(1),
            next_partition: AtomicU16::new(0),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn partition_count(&self) -> u16 {
        self.partition_count
    }

    /// Round-robins through the registration's partitions; used by
    /// `ConnectionOpen` (which does not let the caller pick a partition).
    pub fn next_partition_index(&self) -> u16 {
        self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partition_count
    }
}

/// Opaque TLS/ALPN/transport-parameter bundle. The handshake engine that
/// interprets it is out of scope; this crate treats it as an inert handle
/// that a connection either has or does not have.
#[derive(Debug, Default)]
pub struct Configuration {
    alpn: Vec<String>,
}

impl Configuration {
    pub fn new(alpn: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            alpn: alpn.into_iter().map(Into::into).collect(),
        }
    }

    pub fn alpn(&self) -> &[String] {
        &self.alpn
    }
}

/// Opaque listener handle; socket binding and packet routing are out of
/// scope, so this only carries enough state to be a distinct handle kind.
#[derive(Debug, Default)]
pub struct Listener {
    local_alpn: Vec<String>,
}

impl Listener {
    pub fn new(local_alpn: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            local_alpn: local_alpn.into_iter().map(Into::into).collect(),
        }
    }

    pub fn local_alpn(&self) -> &[String] {
        &self.local_alpn
    }
}
