//! In-container dispatcher back-end
//!
//! There is no service manager inside the engine container, so this
//! back-end spawns the engine binaries itself: `LD_PRELOAD` pointed at a
//! discovered jemalloc, stdout redirected to a per-service log file, and a
//! graceful-then-forceful termination sequence on stop. The BRM image is
//! loaded before the workernode starts and saved before it stops.
//!
//! When `Dispatcher.path` names a shell helper, all operations delegate to
//! it instead: `<path> <start|stop> <service> <0|1>`.

use super::{DispatcherKind, ProcessDispatcher};
use crate::constants::{LIBJEMALLOC_DEFAULT_PATH, MCS_INSTALL_BIN, MCS_LOG_PATH};
use crate::error::{NodeControlError, Result};
use crate::services::{self, workernode_instance, ServiceDescriptor, WORKERNODE};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Signal, System};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, error, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ContainerDispatcher {
    /// Optional shell helper all operations delegate to
    helper: Option<PathBuf>,
    install_bin: PathBuf,
    log_dir: PathBuf,
    libjemalloc: OnceCell<PathBuf>,
}

impl ContainerDispatcher {
    pub fn new(helper: Option<PathBuf>) -> Self {
        Self {
            helper,
            install_bin: PathBuf::from(MCS_INSTALL_BIN),
            log_dir: PathBuf::from(MCS_LOG_PATH),
            libjemalloc: OnceCell::new(),
        }
    }

    /// Construction with explicit paths, for tests and relocated installs
    pub fn with_paths(helper: Option<PathBuf>, install_bin: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            helper,
            install_bin,
            log_dir,
            libjemalloc: OnceCell::new(),
        }
    }

    /// Run a shell command, returning success and its combined output
    async fn exec_command(command: &str) -> (bool, String) {
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
        {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                if !output.status.success() {
                    error!(
                        "`{}` exited with {:?}: {}",
                        command,
                        output.status.code(),
                        text.trim()
                    );
                    return (false, text);
                }
                (true, text)
            }
            Err(e) => {
                error!("cannot run `{}`: {}", command, e);
                (false, e.to_string())
            }
        }
    }

    /// Pick the jemalloc path out of `ldconfig -p` output
    fn parse_ldconfig(output: &str) -> Option<String> {
        let pattern = Regex::new(r"^\s+(\S+)(\s.*)? => (\S+)").ok()?;
        for line in output.lines().skip(1) {
            let Some(caps) = pattern.captures(line) else {
                continue;
            };
            if caps.get(1).map(|m| m.as_str().contains("libjemalloc")) == Some(true) {
                return caps.get(3).map(|m| m.as_str().to_string());
            }
        }
        None
    }

    /// Discover the jemalloc shared object, once per process
    async fn libjemalloc_path(&self) -> Result<PathBuf> {
        self.libjemalloc
            .get_or_try_init(|| async {
                let (ok, output) = Self::exec_command("ldconfig -p").await;
                if ok {
                    if let Some(path) = Self::parse_ldconfig(&output) {
                        return Ok(PathBuf::from(path));
                    }
                }
                let fallback = Path::new(LIBJEMALLOC_DEFAULT_PATH);
                if fallback.exists() {
                    return Ok(fallback.to_path_buf());
                }
                Err(NodeControlError::Process(
                    "no libjemalloc.so.2 found".to_string(),
                ))
            })
            .await
            .cloned()
    }

    /// Invocation for a service binary on this node
    fn command_for(&self, desc: &ServiceDescriptor, is_primary: bool) -> (PathBuf, Vec<String>) {
        let program = self.install_bin.join(desc.binary);
        let args = match desc.subcommand {
            Some(template) if template.contains("{}") => {
                vec![template.replace("{}", &workernode_instance(is_primary).to_string())]
            }
            Some(sub) => vec![sub.to_string()],
            None => Vec::new(),
        };
        (program, args)
    }

    /// Create the per-service log file and return a handle for redirection
    fn log_file(&self, filename: &str) -> Result<std::fs::File> {
        std::fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(filename);
        Ok(std::fs::File::create(path)?)
    }

    /// Spawn a process with stdout captured in the log directory
    fn spawn_logged(
        &self,
        program: &Path,
        args: &[String],
        log_filename: &str,
        env: &[(String, String)],
    ) -> Result<tokio::process::Child> {
        let file = self.log_file(log_filename)?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).stdout(Stdio::from(file));
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.spawn().map_err(|e| NodeControlError::Exec {
            command: program.display().to_string(),
            source: e,
        })
    }

    fn refreshed_system() -> System {
        let mut sys = System::new();
        sys.refresh_processes();
        sys
    }

    fn process_running(binary: &str) -> bool {
        let sys = Self::refreshed_system();
        sys.processes()
            .values()
            .any(|p| p.name().eq_ignore_ascii_case(binary))
    }

    /// Send a signal to every process matching the binary name
    fn signal_processes(binary: &str, signal: Signal) -> bool {
        let sys = Self::refreshed_system();
        let mut signaled = false;
        for proc in sys
            .processes()
            .values()
            .filter(|p| p.name().eq_ignore_ascii_case(binary))
        {
            if proc.kill_with(signal).unwrap_or(false) {
                signaled = true;
            }
        }
        signaled
    }

    async fn wait_for_exit(binary: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !Self::process_running(binary) {
                return true;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        !Self::process_running(binary)
    }

    /// Run the BRM load/save companion to completion
    async fn run_brm_tool(
        &self,
        tool: &str,
        args: &[String],
        log: &str,
        with_preload: bool,
    ) -> Result<()> {
        let program = self.install_bin.join(tool);
        let mut env = Vec::new();
        if with_preload {
            env.push((
                "LD_PRELOAD".to_string(),
                self.libjemalloc_path().await?.display().to_string(),
            ));
        }
        debug!("running {} to completion", tool);
        let mut child = self.spawn_logged(&program, args, log, &env)?;
        child.wait().await.map_err(|e| NodeControlError::Exec {
            command: program.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    async fn helper_run(&self, helper: &Path, op: &str, service: &str, is_primary: bool) -> bool {
        let command = format!(
            "{} {} {} {}",
            helper.display(),
            op,
            service,
            is_primary as u8
        );
        Self::exec_command(&command).await.0
    }
}

#[async_trait]
impl ProcessDispatcher for ContainerDispatcher {
    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Container
    }

    async fn is_running(&self, service: &str, _is_primary: bool, _use_privileged: bool) -> bool {
        match services::descriptor(service) {
            Some(desc) => Self::process_running(desc.binary),
            None => false,
        }
    }

    async fn start(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool {
        if let Some(helper) = self.helper.clone() {
            return self.helper_run(&helper, "start", service, is_primary).await;
        }

        let Some(desc) = services::descriptor(service) else {
            error!("cannot start unknown service {}", service);
            return false;
        };
        if self.is_running(service, is_primary, use_privileged).await {
            return true;
        }
        debug!("starting {}", service);

        let preload = match self.libjemalloc_path().await {
            Ok(path) => path.display().to_string(),
            Err(e) => {
                error!("cannot start {}: {}", service, e);
                return false;
            }
        };
        let env = [("LD_PRELOAD".to_string(), preload)];

        // the workernode refuses to come up without a current BRM image
        if service == WORKERNODE {
            if let Err(e) = self
                .run_brm_tool("mcs-loadbrm.py", &["no".to_string()], "mcs-loadbrm.log", true)
                .await
            {
                error!("BRM load failed before workernode start: {}", e);
                return false;
            }
        }

        let (program, args) = self.command_for(desc, is_primary);
        let log_filename = format!("{}.log", desc.binary.to_lowercase());
        match self.spawn_logged(&program, &args, &log_filename, &env) {
            Ok(child) => debug!("{} PID = {:?}", service, child.id()),
            Err(e) => {
                error!("failed to spawn {}: {}", service, e);
                return false;
            }
        }

        tokio::time::sleep(desc.start_delay).await;
        if desc.oneshot {
            return true;
        }
        self.is_running(service, is_primary, use_privileged).await
    }

    async fn stop(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool {
        if let Some(helper) = self.helper.clone() {
            return self.helper_run(&helper, "stop", service, is_primary).await;
        }

        let Some(desc) = services::descriptor(service) else {
            error!("cannot stop unknown service {}", service);
            return false;
        };
        if !self.is_running(service, is_primary, use_privileged).await {
            return true;
        }
        debug!("stopping {}", service);

        // preserve the BRM image while the workernode is still up
        if service == WORKERNODE {
            if let Err(e) = self
                .run_brm_tool("mcs-savebrm.py", &[], "mcs-savebrm.log", false)
                .await
            {
                warn!("BRM save failed before workernode stop: {}", e);
            }
        }

        Self::signal_processes(desc.binary, Signal::Term);
        if Self::wait_for_exit(desc.binary, desc.stop_timeout).await {
            debug!("gracefully stopped {}", service);
        } else {
            debug!("{} ignored SIGTERM, sending SIGKILL", service);
            Self::signal_processes(desc.binary, Signal::Kill);
            if !Self::wait_for_exit(desc.binary, desc.stop_timeout).await {
                warn!(
                    "{} still alive after SIGKILL and {}s",
                    service,
                    desc.stop_timeout.as_secs()
                );
            }
        }

        !self.is_running(service, is_primary, use_privileged).await
    }

    async fn restart(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool {
        let stopped = if self.is_running(service, is_primary, use_privileged).await {
            self.stop(service, is_primary, use_privileged).await
        } else {
            true
        };
        let started = self.start(service, is_primary, use_privileged).await;
        stopped && started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CONTROLLERNODE, DDLPROC};

    const LDCONFIG_SAMPLE: &str = "\
302 libs found in cache `/etc/ld.so.cache'
\tlibjemalloc.so.2 (libc6,x86-64) => /usr/lib/x86_64-linux-gnu/libjemalloc.so.2
\tlibz.so.1 (libc6,x86-64) => /lib/x86_64-linux-gnu/libz.so.1
";

    #[test]
    fn test_parse_ldconfig_finds_jemalloc() {
        assert_eq!(
            ContainerDispatcher::parse_ldconfig(LDCONFIG_SAMPLE),
            Some("/usr/lib/x86_64-linux-gnu/libjemalloc.so.2".to_string())
        );
    }

    #[test]
    fn test_parse_ldconfig_no_match() {
        let output = "1 libs found\n\tlibz.so.1 (libc6,x86-64) => /lib/libz.so.1\n";
        assert_eq!(ContainerDispatcher::parse_ldconfig(output), None);
    }

    #[test]
    fn test_command_for_workernode_by_role() {
        let dispatcher = ContainerDispatcher::with_paths(
            None,
            PathBuf::from("/opt/bin"),
            PathBuf::from("/tmp/logs"),
        );
        let desc = services::descriptor(WORKERNODE).unwrap();

        let (program, args) = dispatcher.command_for(desc, true);
        assert_eq!(program, PathBuf::from("/opt/bin/workernode"));
        assert_eq!(args, vec!["DBRM_Worker1"]);

        let (_, args) = dispatcher.command_for(desc, false);
        assert_eq!(args, vec!["DBRM_Worker2"]);
    }

    #[test]
    fn test_command_for_controllernode_foreground() {
        let dispatcher = ContainerDispatcher::new(None);
        let desc = services::descriptor(CONTROLLERNODE).unwrap();
        let (_, args) = dispatcher.command_for(desc, true);
        assert_eq!(args, vec!["fg"]);
    }

    #[test]
    fn test_command_for_plain_service() {
        let dispatcher = ContainerDispatcher::new(None);
        let desc = services::descriptor(DDLPROC).unwrap();
        let (program, args) = dispatcher.command_for(desc, true);
        assert!(program.ends_with("DDLProc"));
        assert!(args.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_service_refused() {
        let dispatcher = ContainerDispatcher::new(None);
        assert!(!dispatcher.is_running("mcs-nonesuch", true, true).await);
        assert!(!dispatcher.start("mcs-nonesuch", true, true).await);
        assert!(!dispatcher.stop("mcs-nonesuch", true, true).await);
    }

    #[test]
    fn test_log_file_created_in_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dispatcher = ContainerDispatcher::with_paths(
            None,
            PathBuf::from("/usr/bin"),
            tmp.path().to_path_buf(),
        );
        dispatcher.log_file("ddlproc.log").unwrap();
        assert!(tmp.path().join("ddlproc.log").exists());
    }
}
