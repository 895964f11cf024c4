//! Resource and isolation profiles
//!
//! Immutable configuration attached to every sandbox and every run.

use serde::{Deserialize, Serialize};

use crate::languages::LanguageConfig;

/// Hard resource budget for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub time_limit_ms: u32,
    pub memory_limit_bytes: u64,
    /// CPU share in milli-cores applied to the box cgroup
    pub cpu_quota_millis: u32,
    /// Process/thread ceiling (fork-bomb prevention)
    pub pids_limit: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit_ms: 1000,
            memory_limit_bytes: 256 * 1024 * 1024,
            cpu_quota_millis: 1000,
            pids_limit: 64,
        }
    }
}

/// Filesystem policy: read-only root plus a quota'd writable scratch area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemPolicy {
    pub scratch_quota_bytes: u64,
    pub open_files: u32,
}

impl Default for FilesystemPolicy {
    fn default() -> Self {
        Self {
            scratch_quota_bytes: 256 * 1024 * 1024,
            open_files: 256,
        }
    }
}

/// Immutable per-language isolation configuration.
///
/// Describes what `provision` must configure: resource ceilings, filesystem
/// policy and the syscall allowlist. Network access is always denied; that is
/// not configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationProfile {
    pub limits: ResourceLimits,
    pub fs: FilesystemPolicy,
    /// Only these syscalls are permitted; empty means allow the runtime default
    pub allowed_syscalls: Vec<String>,
}

impl Default for IsolationProfile {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            fs: FilesystemPolicy::default(),
            allowed_syscalls: Vec::new(),
        }
    }
}

impl IsolationProfile {
    /// Build the profile for a language from its configuration table entry
    pub fn for_language(config: &LanguageConfig) -> Self {
        Self {
            limits: ResourceLimits::default(),
            fs: FilesystemPolicy::default(),
            allowed_syscalls: config.allowed_syscalls.clone(),
        }
    }
}
