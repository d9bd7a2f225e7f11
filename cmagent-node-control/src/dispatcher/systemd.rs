//! Service-manager dispatcher back-end
//!
//! Delegates every operation to `systemctl`, optionally through `sudo`.
//! The workernode service is templated: the primary runs instance `@1`,
//! every other node runs instance `@2`.

use super::{DispatcherKind, ProcessDispatcher};
use crate::constants::MCS_INSTALL_BIN;
use crate::services::{self, workernode_instance, EXEMGR, LOADBRM, WORKERNODE};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, error, warn};

pub struct SystemdDispatcher;

impl SystemdDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Build a `systemctl` argument vector, with `sudo` prepended on request
    fn systemctl_argv(use_privileged: bool, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if use_privileged {
            argv.push("sudo".to_string());
        }
        argv.push("systemctl".to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// Unit to start for a service on this node
    fn start_unit(service: &str, is_primary: bool) -> String {
        if service == WORKERNODE {
            format!("{service}@{}.service", workernode_instance(is_primary))
        } else {
            service.to_string()
        }
    }

    /// Units to stop for a service; workernode stops both instances
    fn stop_units(service: &str) -> Vec<String> {
        if service == WORKERNODE {
            vec![format!("{service}@1"), format!("{service}@2")]
        } else {
            vec![service.to_string()]
        }
    }

    /// The ExeMgr binary is absent on newer installs; its unit is skipped.
    fn exemgr_absent() -> bool {
        !Path::new(MCS_INSTALL_BIN).join("ExeMgr").exists()
    }

    /// Run a command discarding its output, returning whether it exited zero
    async fn run_quiet(argv: &[String]) -> Option<bool> {
        debug!("running {}", argv.join(" "));
        match tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => Some(status.success()),
            Err(e) => {
                error!("cannot run {}: {}", argv.join(" "), e);
                None
            }
        }
    }
}

impl Default for SystemdDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessDispatcher for SystemdDispatcher {
    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Systemd
    }

    async fn is_running(&self, service: &str, _is_primary: bool, use_privileged: bool) -> bool {
        let argv = Self::systemctl_argv(use_privileged, &["--state=running"]);
        match tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => {
                if !output.status.success() {
                    return false;
                }
                String::from_utf8_lossy(&output.stdout).contains(service)
            }
            Err(e) => {
                error!("cannot run {}: {}", argv.join(" "), e);
                false
            }
        }
    }

    async fn start(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool {
        if service == EXEMGR && Self::exemgr_absent() {
            return true;
        }
        if self.is_running(service, is_primary, use_privileged).await {
            return true;
        }

        if service == WORKERNODE && is_primary {
            // enabling the unit is not critical, just log failure
            let enable =
                Self::systemctl_argv(use_privileged, &["enable", "mcs-workernode@1.service"]);
            if Self::run_quiet(&enable).await.is_none() {
                warn!("failed to enable workernode instance 1");
            }
        }

        let unit = Self::start_unit(service, is_primary);
        let start = Self::systemctl_argv(use_privileged, &["start", &unit]);
        let _ = Self::run_quiet(&start).await;

        // one-shot units finish on their own, a liveness check would lie
        if service == LOADBRM
            || services::descriptor(service).map(|d| d.oneshot).unwrap_or(false)
        {
            return true;
        }
        self.is_running(service, is_primary, use_privileged).await
    }

    async fn stop(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool {
        if service == EXEMGR && Self::exemgr_absent() {
            return true;
        }
        if service == WORKERNODE {
            let disable =
                Self::systemctl_argv(use_privileged, &["disable", "mcs-workernode@1.service"]);
            if Self::run_quiet(&disable).await.is_none() {
                warn!("failed to disable workernode instance 1");
            }
        }

        let units = Self::stop_units(service);
        let mut args = vec!["stop"];
        args.extend(units.iter().map(|u| u.as_str()));
        let stop = Self::systemctl_argv(use_privileged, &args);
        match Self::run_quiet(&stop).await {
            Some(true) => {}
            _ => return false,
        }
        !self.is_running(service, is_primary, use_privileged).await
    }

    async fn restart(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool {
        if service == EXEMGR && Self::exemgr_absent() {
            return true;
        }
        let restart = Self::systemctl_argv(use_privileged, &["restart", service]);
        match Self::run_quiet(&restart).await {
            Some(true) => {}
            _ => return false,
        }
        self.is_running(service, is_primary, use_privileged).await
    }
}
