//! Static descriptor table for the engine services managed on a node
//!
//! The supervision order lives in the orchestrator; this table only knows
//! what each service is called, which binary backs it, and how patient the
//! dispatchers should be with it.

use std::time::Duration;

/// Description of one supervised engine service
#[derive(Debug, Clone, Copy)]
pub struct ServiceDescriptor {
    /// Canonical service name used across the control plane
    pub name: &'static str,
    /// Binary name under the install directory (also the process name)
    pub binary: &'static str,
    /// Optional subcommand appended to the invocation; `{}` is replaced by
    /// the workernode instance index
    pub subcommand: Option<&'static str>,
    /// Settle time after a container start before the liveness check
    pub start_delay: Duration,
    /// How long a graceful stop may take before escalating to kill
    pub stop_timeout: Duration,
    /// One-shot services finish on their own and fail the post-start check
    pub oneshot: bool,
}

pub const STORAGEMANAGER: &str = "mcs-storagemanager";
pub const WORKERNODE: &str = "mcs-workernode";
pub const CONTROLLERNODE: &str = "mcs-controllernode";
pub const PRIMPROC: &str = "mcs-primproc";
pub const EXEMGR: &str = "mcs-exemgr";
pub const WRITEENGINESERVER: &str = "mcs-writeengineserver";
pub const DMLPROC: &str = "mcs-dmlproc";
pub const DDLPROC: &str = "mcs-ddlproc";
pub const LOADBRM: &str = "mcs-loadbrm";

/// All services the dispatchers know how to manage
pub const ALL_SERVICES: &[ServiceDescriptor] = &[
    ServiceDescriptor {
        name: STORAGEMANAGER,
        binary: "StorageManager",
        subcommand: None,
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(60),
        oneshot: false,
    },
    ServiceDescriptor {
        name: WORKERNODE,
        binary: "workernode",
        subcommand: Some("DBRM_Worker{}"),
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: CONTROLLERNODE,
        binary: "controllernode",
        subcommand: Some("fg"),
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: PRIMPROC,
        binary: "PrimProc",
        subcommand: None,
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: EXEMGR,
        binary: "ExeMgr",
        subcommand: None,
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: WRITEENGINESERVER,
        binary: "WriteEngineServ",
        subcommand: None,
        start_delay: Duration::from_secs(3),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: DMLPROC,
        binary: "DMLProc",
        subcommand: None,
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: DDLPROC,
        binary: "DDLProc",
        subcommand: None,
        start_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(3),
        oneshot: false,
    },
    ServiceDescriptor {
        name: LOADBRM,
        binary: "mcs-loadbrm.py",
        subcommand: None,
        start_delay: Duration::from_secs(0),
        stop_timeout: Duration::from_secs(3),
        oneshot: true,
    },
];

/// Look up a service descriptor by canonical name
pub fn descriptor(service: &str) -> Option<&'static ServiceDescriptor> {
    ALL_SERVICES.iter().find(|d| d.name == service)
}

/// Resolve the workernode instance index for a node role.
///
/// The primary runs `DBRM_Worker1`, every other node runs `DBRM_Worker2`.
pub fn workernode_instance(is_primary: bool) -> u8 {
    if is_primary {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_lookup() {
        let d = descriptor(WORKERNODE).unwrap();
        assert_eq!(d.binary, "workernode");
        assert_eq!(d.subcommand, Some("DBRM_Worker{}"));
        assert!(descriptor("mcs-nonesuch").is_none());
    }

    #[test]
    fn test_storagemanager_patience() {
        let d = descriptor(STORAGEMANAGER).unwrap();
        assert_eq!(d.stop_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_oneshot_flag() {
        assert!(descriptor(LOADBRM).unwrap().oneshot);
        assert!(!descriptor(PRIMPROC).unwrap().oneshot);
    }

    #[test]
    fn test_workernode_instance() {
        assert_eq!(workernode_instance(true), 1);
        assert_eq!(workernode_instance(false), 2);
    }
}
