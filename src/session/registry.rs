//! Daemon-wide session registry and the ping/shutdown supervisor.
//!
//! The registry mirrors the client-table pattern one level up: proxy slots
//! are recycled through `reset()` rather than removed, so session ids stay
//! small and the table never shrinks. Snapshots of the registry are
//! persisted for inspection across coordinator restarts.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::daemon_log::daemon_log;
use crate::process::ProcessControl;
use crate::protocol::{RegistrySnapshot, SessionSummary};
use crate::session::proxy::{GroupDescriptor, RuntimeVersion, SessionProxy};
use crate::session::status::SessionRole;
use crate::transport::ClientConn;

/// Parameters of a session admission.
#[derive(Debug, Clone)]
pub struct AdmitRequest {
    pub client: String,
    pub alias: String,
    /// Caller-supplied tag; generated when absent.
    pub tag: Option<String>,
    pub role: SessionRole,
    pub group: Option<String>,
}

/// Table of session proxies, keyed by slot index.
pub struct SessionRegistry {
    slots: Mutex<Vec<Arc<SessionProxy>>>,
    /// Group descriptors are interned so sessions of the same group share
    /// one descriptor.
    groups: Mutex<HashMap<String, Arc<GroupDescriptor>>>,
    runtime: Arc<RuntimeVersion>,
    inflate_floor: i32,
}

impl SessionRegistry {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            groups: Mutex::new(HashMap::new()),
            runtime: Arc::new(RuntimeVersion {
                tag: config.runtime_tag.clone(),
            }),
            inflate_floor: config.inflate_floor,
        }
    }

    fn slots_locked(&self) -> std::sync::MutexGuard<'_, Vec<Arc<SessionProxy>>> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Admits a new session, recycling the lowest reclaimable slot before
    /// growing the table. The issuing connection, when given, becomes the
    /// session's first attachment and its parent.
    pub fn admit(
        &self,
        request: AdmitRequest,
        parent: Option<(&Arc<ClientConn>, u16)>,
    ) -> Arc<SessionProxy> {
        let proxy = {
            let mut slots = self.slots_locked();
            match slots.iter().find(|proxy| proxy.reclaimable()).cloned() {
                Some(proxy) => {
                    // Claiming the slot: after reset it is Unvalidated and
                    // no longer reclaimable, so a concurrent admit cannot
                    // pick it again.
                    proxy.reset();
                    proxy
                }
                None => {
                    let proxy = Arc::new(SessionProxy::new(slots.len()));
                    slots.push(proxy.clone());
                    proxy
                }
            }
        };

        let tag = request
            .tag
            .unwrap_or_else(|| format!("{}-{}", request.client, Uuid::new_v4()));
        proxy.set_tag(&tag);
        proxy.set_client(&request.client);
        proxy.set_alias(&request.alias);
        proxy.set_role(request.role);
        proxy.set_runtime(self.runtime.clone());
        proxy.set_inflate_floor(self.inflate_floor);
        if let Some(name) = request.group {
            proxy.set_group(Some(self.intern_group(&name)));
        }
        if let Some((conn, stream_id)) = parent {
            let id = proxy.attach_client(conn, stream_id);
            proxy.set_parent(id);
        }

        daemon_log(
            "registry",
            &format!("admitted session {} tag {}", proxy.id(), tag),
        );
        proxy
    }

    fn intern_group(&self, name: &str) -> Arc<GroupDescriptor> {
        let mut groups = self
            .groups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        groups
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(GroupDescriptor {
                    name: name.to_string(),
                })
            })
            .clone()
    }

    /// Bounds-checked lookup by session id.
    pub fn get(&self, id: usize) -> Option<Arc<SessionProxy>> {
        self.slots_locked().get(id).cloned()
    }

    /// All proxies, including reclaimable ones.
    pub fn sessions(&self) -> Vec<Arc<SessionProxy>> {
        self.slots_locked().clone()
    }

    pub fn len(&self) -> usize {
        self.slots_locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots_locked().is_empty()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions()
            .into_iter()
            .map(|proxy| proxy.snapshot().into())
            .collect()
    }

    /// Writes a snapshot of the registry for recovery and inspection.
    pub fn persist_to(&self, path: &Path) -> Result<()> {
        let snapshot = RegistrySnapshot {
            host: gethostname::gethostname().to_string_lossy().into_owned(),
            build_sha: crate::build_info::BUILD_SHA.to_string(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            sessions: self.summaries(),
        };
        let content =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize registry")?;
        std::fs::write(path, content).context("Failed to write registry file")?;
        Ok(())
    }

    /// Loads a snapshot written by a previous coordinator instance. The
    /// loaded sessions have no transport channel and are marked invalid;
    /// their slots are immediately reclaimable by new admissions.
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let content = std::fs::read_to_string(path).context("Failed to read registry file")?;
        let snapshot: RegistrySnapshot =
            serde_json::from_str(&content).context("Failed to parse registry file")?;

        let count = snapshot.sessions.len();
        for summary in snapshot.sessions {
            let proxy = self.admit(
                AdmitRequest {
                    client: summary.client,
                    alias: summary.alias,
                    tag: Some(summary.tag),
                    role: summary.role,
                    group: None,
                },
                None,
            );
            if let Some(pid) = summary.pid {
                proxy.set_pid(pid);
            }
            proxy.set_ordinal(&summary.ordinal);
            proxy.mark_invalid();
        }
        Ok(count)
    }
}

/// Periodic liveness sweep: probes every valid session and terminates the
/// ones that stop answering. Runs until the server aborts it.
pub async fn run_ping_supervisor(
    registry: Arc<SessionRegistry>,
    control: Arc<dyn ProcessControl>,
    config: CoordinatorConfig,
) {
    let mut interval = tokio::time::interval(config.ping_interval());
    // The first tick fires immediately; skip it so freshly admitted
    // sessions get a full interval to register their worker process.
    interval.tick().await;

    loop {
        interval.tick().await;
        for proxy in registry.sessions() {
            if !proxy.is_valid() || proxy.is_shutdown_requested() {
                continue;
            }
            match proxy.verify(config.ping_timeout()).await {
                Ok(outcome) if outcome.responsive() => {}
                Ok(_) => {
                    tracing::warn!(session = proxy.id(), "failed liveness probe, terminating");
                    daemon_log(
                        "supervisor",
                        &format!("session {} unresponsive, terminating", proxy.id()),
                    );
                    if let Err(e) = proxy
                        .terminate(control.as_ref(), config.terminate_grace())
                        .await
                    {
                        tracing::warn!(session = proxy.id(), error = %e, "termination failed");
                    }
                }
                Err(e) => {
                    daemon_log(
                        "supervisor",
                        &format!("session {} probe error: {}", proxy.id(), e),
                    );
                }
            }
        }
    }
}
