//! OS Operations Orchestrator
//!
//! Applies ordered start/stop plans to the local engine services through a
//! pluggable dispatcher. Start plans are gated on readiness probes: the
//! controllernode waits for every workernode to listen, and the DML/DDL
//! processors wait for the controllernode. Failures never abort a plan;
//! each failed operation yields one error record and the plan continues.

use crate::dbrm::{DbrmControl, SystemState};
use crate::dispatcher::{DispatcherKind, ProcessDispatcher};
use crate::services::{
    CONTROLLERNODE, DDLPROC, DMLPROC, EXEMGR, PRIMPROC, STORAGEMANAGER, WORKERNODE,
    WRITEENGINESERVER,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How many 1-second rounds a readiness gate waits before giving up
const READINESS_ATTEMPTS: u32 = 30;

/// Connect timeout for a single readiness probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A probeable service address
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where the readiness gates find their peers
pub trait ClusterEndpoints: Send + Sync {
    /// DBRM workernode addresses across the cluster
    fn workernode_endpoints(&self) -> Vec<Endpoint>;

    /// The DBRM controller address
    fn controller_endpoint(&self) -> Option<Endpoint>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Start,
    Stop,
    Restart,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Start => "start",
            OpKind::Stop => "stop",
            OpKind::Restart => "restart",
        }
    }
}

/// One step of a supervision plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub op: OpKind,
    pub service: &'static str,
}

impl Operation {
    pub fn start(service: &'static str) -> Self {
        Self {
            op: OpKind::Start,
            service,
        }
    }

    pub fn stop(service: &'static str) -> Self {
        Self {
            op: OpKind::Stop,
            service,
        }
    }

    pub fn restart(service: &'static str) -> Self {
        Self {
            op: OpKind::Restart,
            service,
        }
    }
}

/// Record of one failed operation within a plan
#[derive(Debug, Clone)]
pub struct OpError {
    pub operation: &'static str,
    pub service: String,
    pub error: String,
}

/// The ordered start plan for a node
pub fn start_plan(is_primary: bool) -> Vec<Operation> {
    let mut plan = vec![Operation::start(WORKERNODE)];
    if is_primary {
        plan.push(Operation::start(CONTROLLERNODE));
    }
    plan.extend([
        Operation::start(PRIMPROC),
        Operation::start(EXEMGR),
        Operation::start(WRITEENGINESERVER),
    ]);
    if is_primary {
        plan.extend([Operation::start(DMLPROC), Operation::start(DDLPROC)]);
    }
    plan
}

/// The ordered stop plan for a node.
///
/// DMLProc is expected to exit on its own during a graceful shutdown; in
/// force mode it is stopped explicitly, right after DDLProc.
pub fn shutdown_plan(force: bool) -> Vec<Operation> {
    let mut plan = vec![
        Operation::stop(DDLPROC),
        Operation::stop(PRIMPROC),
        Operation::stop(WRITEENGINESERVER),
        Operation::stop(EXEMGR),
        Operation::stop(CONTROLLERNODE),
        Operation::stop(WORKERNODE),
        Operation::stop(STORAGEMANAGER),
    ];
    if force {
        plan.insert(1, Operation::stop(DMLPROC));
    }
    plan
}

pub struct OsOperations {
    dispatcher: Arc<dyn ProcessDispatcher>,
    endpoints: Arc<dyn ClusterEndpoints>,
    dbrm: Arc<dyn DbrmControl>,
    use_privileged: bool,
    probe_timeout: Duration,
    readiness_attempts: u32,
    poll_interval: Duration,
}

impl OsOperations {
    pub fn new(
        dispatcher: Arc<dyn ProcessDispatcher>,
        endpoints: Arc<dyn ClusterEndpoints>,
        dbrm: Arc<dyn DbrmControl>,
    ) -> Self {
        Self {
            dispatcher,
            endpoints,
            dbrm,
            use_privileged: true,
            probe_timeout: PROBE_TIMEOUT,
            readiness_attempts: READINESS_ATTEMPTS,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Run dispatcher operations without privilege escalation
    pub fn with_privileged(mut self, use_privileged: bool) -> Self {
        self.use_privileged = use_privileged;
        self
    }

    /// Compressed timing for tests
    pub fn with_timing(
        mut self,
        probe_timeout: Duration,
        readiness_attempts: u32,
        poll_interval: Duration,
    ) -> Self {
        self.probe_timeout = probe_timeout;
        self.readiness_attempts = readiness_attempts;
        self.poll_interval = poll_interval;
        self
    }

    /// Apply an ordered plan, yielding one error record per failed step
    pub async fn apply(&self, operations: &[Operation], is_primary: bool) -> Vec<OpError> {
        let mut errors = Vec::new();

        for oper in operations {
            if oper.op == OpKind::Start && oper.service == CONTROLLERNODE {
                self.wait_for_workernodes().await;
            }
            if oper.op == OpKind::Start
                && (oper.service == DMLPROC || oper.service == DDLPROC)
            {
                self.wait_for_controller().await;
            }

            debug!(
                "running {} on {} (primary: {})",
                oper.op.as_str(),
                oper.service,
                is_primary
            );
            let ok = match oper.op {
                OpKind::Start => {
                    self.dispatcher
                        .start(oper.service, is_primary, self.use_privileged)
                        .await
                }
                OpKind::Stop => {
                    self.dispatcher
                        .stop(oper.service, is_primary, self.use_privileged)
                        .await
                }
                OpKind::Restart => {
                    self.dispatcher
                        .restart(oper.service, is_primary, self.use_privileged)
                        .await
                }
            };
            if !ok {
                errors.push(OpError {
                    operation: oper.op.as_str(),
                    service: oper.service.to_string(),
                    error: "error occurred running operation".to_string(),
                });
            }

            if is_primary && oper.op == OpKind::Start && oper.service == DDLPROC {
                self.run_dbbuilder().await;
            }
        }

        errors
    }

    /// Start this node's services in dependency order
    pub async fn start_node(&self, is_primary: bool) -> Vec<OpError> {
        self.apply(&start_plan(is_primary), is_primary).await
    }

    /// Stop this node's services in dependency order.
    ///
    /// A graceful primary shutdown first flags the rollback/pending states
    /// on the DBRM master, then gives DMLProc `timeout` to drain and exit
    /// on its own. Either step failing escalates to force mode, which stops
    /// DMLProc explicitly.
    pub async fn shutdown_node(
        &self,
        is_primary: bool,
        timeout: Duration,
        force: bool,
    ) -> Vec<OpError> {
        let mut force = force;

        if is_primary && !force {
            if let Err(e) = self
                .dbrm
                .set_system_state(&[SystemState::Rollback, SystemState::ShutdownPending])
                .await
            {
                error!("cannot set SS_ROLLBACK and SS_SHUTDOWN_PENDING: {}", e);
                force = true;
            }
        }

        if is_primary && !force {
            info!("waiting up to {}s for DMLProc to stop", timeout.as_secs());
            let deadline = Instant::now() + timeout;
            let mut stopped = false;
            loop {
                if !self
                    .dispatcher
                    .is_running(DMLPROC, is_primary, self.use_privileged)
                    .await
                {
                    info!("DMLProc stopped");
                    stopped = true;
                    break;
                }
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
            if !stopped {
                error!(
                    "DMLProc did not stop gracefully within {}s, using force mode",
                    timeout.as_secs()
                );
                force = true;
            }
        }

        self.apply(&shutdown_plan(force), is_primary).await
    }

    async fn probe(&self, endpoint: &Endpoint) -> bool {
        matches!(
            tokio::time::timeout(
                self.probe_timeout,
                TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Wait for every workernode to listen before the controllernode starts
    async fn wait_for_workernodes(&self) {
        let mut pending = self.endpoints.workernode_endpoints();
        let mut attempts = self.readiness_attempts;

        while attempts > 0 && !pending.is_empty() {
            debug!("waiting for {} workernode(s) to come up", pending.len());
            let mut still_down = Vec::new();
            for endpoint in pending {
                if self.probe(&endpoint).await {
                    debug!("workernode {} is reachable", endpoint);
                } else {
                    still_down.push(endpoint);
                }
            }
            pending = still_down;
            if !pending.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
            attempts -= 1;
        }

        if !pending.is_empty() {
            error!(
                "workernode(s) {:?} not reachable after {} rounds, starting mcs-controllernode anyway",
                pending.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                self.readiness_attempts
            );
        }
    }

    /// Wait for the controllernode to listen before DML/DDL processors start
    async fn wait_for_controller(&self) {
        let Some(endpoint) = self.endpoints.controller_endpoint() else {
            warn!("no controller endpoint configured, skipping readiness gate");
            return;
        };

        for _ in 0..self.readiness_attempts {
            if self.probe(&endpoint).await {
                debug!("controllernode {} is reachable", endpoint);
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        error!(
            "controllernode {} not reachable after {} rounds, starting mcs-dmlproc/mcs-ddlproc anyway",
            endpoint, self.readiness_attempts
        );
    }

    /// Schema bootstrap after DDLProc is up on the primary.
    ///
    /// Under the service manager the utility runs as the database user;
    /// inside a container it runs directly.
    async fn run_dbbuilder(&self) {
        use crate::constants::DBBUILDER_CMD;

        info!("running schema bootstrap on the primary node");
        let status = match self.dispatcher.kind() {
            DispatcherKind::Systemd => {
                tokio::process::Command::new("su")
                    .args(["-s", "/bin/sh", "-c", DBBUILDER_CMD, "mysql"])
                    .status()
                    .await
            }
            DispatcherKind::Container => {
                tokio::process::Command::new("sh")
                    .args(["-c", DBBUILDER_CMD])
                    .status()
                    .await
            }
        };
        match status {
            Ok(s) if s.success() => debug!("schema bootstrap finished"),
            Ok(s) => warn!("schema bootstrap exited with {:?}", s.code()),
            Err(e) => error!("cannot run schema bootstrap: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeControlError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    struct MockDispatcher {
        ops: Mutex<Vec<(&'static str, String)>>,
        fail_services: HashSet<String>,
        /// scripted answers for `is_running(mcs-dmlproc)`, drained in order;
        /// exhausted means "not running"
        dmlproc_alive: Mutex<Vec<bool>>,
    }

    impl MockDispatcher {
        fn new() -> Self {
            Self {
                ops: Mutex::new(Vec::new()),
                fail_services: HashSet::new(),
                dmlproc_alive: Mutex::new(Vec::new()),
            }
        }

        fn failing(services: &[&str]) -> Self {
            let mut mock = Self::new();
            mock.fail_services = services.iter().map(|s| s.to_string()).collect();
            mock
        }

        fn with_dmlproc_alive(self, script: Vec<bool>) -> Self {
            *self.dmlproc_alive.lock() = script;
            self
        }

        fn recorded(&self) -> Vec<(&'static str, String)> {
            self.ops.lock().clone()
        }
    }

    #[async_trait]
    impl ProcessDispatcher for MockDispatcher {
        fn kind(&self) -> DispatcherKind {
            DispatcherKind::Container
        }

        async fn is_running(&self, service: &str, _is_primary: bool, _use_privileged: bool) -> bool {
            if service == DMLPROC {
                let mut script = self.dmlproc_alive.lock();
                if script.is_empty() {
                    false
                } else {
                    script.remove(0)
                }
            } else {
                false
            }
        }

        async fn start(&self, service: &str, _is_primary: bool, _use_privileged: bool) -> bool {
            self.ops.lock().push(("start", service.to_string()));
            !self.fail_services.contains(service)
        }

        async fn stop(&self, service: &str, _is_primary: bool, _use_privileged: bool) -> bool {
            self.ops.lock().push(("stop", service.to_string()));
            !self.fail_services.contains(service)
        }

        async fn restart(&self, service: &str, _is_primary: bool, _use_privileged: bool) -> bool {
            self.ops.lock().push(("restart", service.to_string()));
            !self.fail_services.contains(service)
        }
    }

    struct MockEndpoints {
        workernodes: Vec<Endpoint>,
        controller: Option<Endpoint>,
    }

    impl MockEndpoints {
        fn none() -> Self {
            Self {
                workernodes: Vec::new(),
                controller: None,
            }
        }
    }

    impl ClusterEndpoints for MockEndpoints {
        fn workernode_endpoints(&self) -> Vec<Endpoint> {
            self.workernodes.clone()
        }

        fn controller_endpoint(&self) -> Option<Endpoint> {
            self.controller.clone()
        }
    }

    struct MockDbrm {
        fail: bool,
        calls: Mutex<Vec<Vec<SystemState>>>,
    }

    impl MockDbrm {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DbrmControl for MockDbrm {
        async fn set_system_state(&self, states: &[SystemState]) -> crate::error::Result<()> {
            self.calls.lock().push(states.to_vec());
            if self.fail {
                Err(NodeControlError::Dbrm("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn ops_under_test(
        dispatcher: Arc<MockDispatcher>,
        dbrm: Arc<MockDbrm>,
    ) -> OsOperations {
        OsOperations::new(dispatcher, Arc::new(MockEndpoints::none()), dbrm).with_timing(
            Duration::from_millis(50),
            2,
            Duration::from_millis(1),
        )
    }

    fn stops(recorded: &[(&'static str, String)]) -> Vec<String> {
        recorded
            .iter()
            .map(|(op, service)| {
                assert_eq!(*op, "stop");
                service.clone()
            })
            .collect()
    }

    #[test]
    fn test_start_plan_primary() {
        let services: Vec<_> = start_plan(true).iter().map(|o| o.service).collect();
        assert_eq!(
            services,
            vec![
                WORKERNODE,
                CONTROLLERNODE,
                PRIMPROC,
                EXEMGR,
                WRITEENGINESERVER,
                DMLPROC,
                DDLPROC
            ]
        );
    }

    #[test]
    fn test_start_plan_replica() {
        let services: Vec<_> = start_plan(false).iter().map(|o| o.service).collect();
        assert_eq!(
            services,
            vec![WORKERNODE, PRIMPROC, EXEMGR, WRITEENGINESERVER]
        );
    }

    #[tokio::test]
    async fn test_graceful_primary_shutdown_order() {
        // DMLProc drains on its own after one poll: no explicit stop for it
        let dispatcher = Arc::new(MockDispatcher::new().with_dmlproc_alive(vec![true, false]));
        let dbrm = Arc::new(MockDbrm::ok());
        let ops = ops_under_test(Arc::clone(&dispatcher), Arc::clone(&dbrm));

        let errors = ops
            .shutdown_node(true, Duration::from_secs(5), false)
            .await;
        assert!(errors.is_empty());

        assert_eq!(
            stops(&dispatcher.recorded()),
            vec![
                DDLPROC,
                PRIMPROC,
                WRITEENGINESERVER,
                EXEMGR,
                CONTROLLERNODE,
                WORKERNODE,
                STORAGEMANAGER
            ]
        );
        assert_eq!(
            dbrm.calls.lock().as_slice(),
            &[vec![SystemState::Rollback, SystemState::ShutdownPending]]
        );
    }

    #[tokio::test]
    async fn test_forced_shutdown_when_dmlproc_hangs() {
        let dispatcher = Arc::new(MockDispatcher::new().with_dmlproc_alive(vec![true; 64]));
        let dbrm = Arc::new(MockDbrm::ok());
        let ops = ops_under_test(Arc::clone(&dispatcher), dbrm);

        ops.shutdown_node(true, Duration::from_millis(10), false)
            .await;

        assert_eq!(
            stops(&dispatcher.recorded()),
            vec![
                DDLPROC,
                DMLPROC,
                PRIMPROC,
                WRITEENGINESERVER,
                EXEMGR,
                CONTROLLERNODE,
                WORKERNODE,
                STORAGEMANAGER
            ]
        );
    }

    #[tokio::test]
    async fn test_dbrm_failure_escalates_to_force() {
        let dispatcher = Arc::new(MockDispatcher::new());
        let dbrm = Arc::new(MockDbrm::failing());
        let ops = ops_under_test(Arc::clone(&dispatcher), dbrm);

        ops.shutdown_node(true, Duration::from_secs(5), false).await;

        let stop_list = stops(&dispatcher.recorded());
        assert_eq!(stop_list[1], DMLPROC);
    }

    #[tokio::test]
    async fn test_replica_shutdown_skips_dbrm_and_wait() {
        let dispatcher = Arc::new(MockDispatcher::new());
        let dbrm = Arc::new(MockDbrm::ok());
        let ops = ops_under_test(Arc::clone(&dispatcher), Arc::clone(&dbrm));

        ops.shutdown_node(false, Duration::from_secs(5), false)
            .await;

        assert!(dbrm.calls.lock().is_empty());
        assert!(!stops(&dispatcher.recorded()).contains(&DMLPROC.to_string()));
    }

    #[tokio::test]
    async fn test_apply_yields_one_error_per_failed_operation() {
        let dispatcher = Arc::new(MockDispatcher::failing(&["mcs-nonesuch"]));
        let dbrm = Arc::new(MockDbrm::ok());
        let ops = ops_under_test(dispatcher, dbrm);

        let plan = [
            Operation::start("mcs-nonesuch"),
            Operation::stop("mcs-nonesuch"),
            Operation::start("mcs-nonesuch"),
            Operation::restart("mcs-nonesuch"),
        ];
        let errors = ops.apply(&plan, false).await;
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[0].operation, "start");
        assert_eq!(errors[1].operation, "stop");
        assert_eq!(errors[3].operation, "restart");
    }

    #[tokio::test]
    async fn test_controllernode_gate_passes_with_reachable_workernode() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dispatcher = Arc::new(MockDispatcher::new());
        let endpoints = MockEndpoints {
            workernodes: vec![Endpoint::new("127.0.0.1", port)],
            controller: None,
        };
        let ops = OsOperations::new(
            Arc::clone(&dispatcher) as Arc<dyn ProcessDispatcher>,
            Arc::new(endpoints),
            Arc::new(MockDbrm::ok()),
        )
        .with_timing(Duration::from_millis(100), 2, Duration::from_millis(1));

        let errors = ops
            .apply(&[Operation::start(CONTROLLERNODE)], true)
            .await;
        assert!(errors.is_empty());
        assert_eq!(
            dispatcher.recorded(),
            vec![("start", CONTROLLERNODE.to_string())]
        );
    }

    #[tokio::test]
    async fn test_controllernode_gate_proceeds_at_deadline() {
        // nothing listens on the endpoint; the gate logs and starts anyway
        let dispatcher = Arc::new(MockDispatcher::new());
        let endpoints = MockEndpoints {
            workernodes: vec![Endpoint::new("127.0.0.1", 1)],
            controller: None,
        };
        let ops = OsOperations::new(
            Arc::clone(&dispatcher) as Arc<dyn ProcessDispatcher>,
            Arc::new(endpoints),
            Arc::new(MockDbrm::ok()),
        )
        .with_timing(Duration::from_millis(20), 2, Duration::from_millis(1));

        ops.apply(&[Operation::start(CONTROLLERNODE)], true).await;
        assert_eq!(
            dispatcher.recorded(),
            vec![("start", CONTROLLERNODE.to_string())]
        );
    }
}
