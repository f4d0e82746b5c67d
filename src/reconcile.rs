//! Idempotent reconciliation of the on-disk mongod configuration.
//!
//! One pass: validate the desired settings, read the live document, stop
//! early when it already matches (no writes at all), otherwise back up,
//! write the merged document atomically, restart the service and wait for
//! it to report active.  A failed restart rolls back to the backup and
//! restarts once more; if that also fails the node needs an operator and
//! the pass aborts with `Unrecoverable`.  No second rollback is ever
//! attempted.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backup::{write_atomic, ConfigBackup};
use crate::config::{DesiredConfig, ServiceConfig};
use crate::document::{MongodDocument, OwnedSection};
use crate::errors::ReplicadmError;
use crate::service::manager::ServiceManager;

/// Outcome of one reconciliation pass.
///
/// A restart failure recovered by rollback is reported here as a warning,
/// not bubbled as an `Err`: the node is back in its pre-call state and
/// rerunning the tool is safe.
#[derive(Debug)]
pub struct ReconcileResult {
    /// Whether the on-disk document was changed (and the change survived).
    pub changed: bool,
    /// Whether a failed restart forced a rollback to the backup.
    pub rolled_back: bool,
    /// Backup taken before the write, if a live file existed.
    pub backup: Option<ConfigBackup>,
    /// Recovered failure, present iff `rolled_back`.
    pub warning: Option<ReplicadmError>,
}

impl ReconcileResult {
    fn unchanged() -> Self {
        Self {
            changed: false,
            rolled_back: false,
            backup: None,
            warning: None,
        }
    }
}

/// What the live config file held before this pass.
enum LiveState {
    Absent,
    /// Present but not parseable as a YAML mapping; backed up, then
    /// superseded by a synthesized document.
    Malformed,
    Parsed(MongodDocument),
}

/// Applies a [`DesiredConfig`] to the managed config file and service.
pub struct ConfigReconciler<'a> {
    service: &'a dyn ServiceManager,
    settings: &'a ServiceConfig,
}

impl<'a> ConfigReconciler<'a> {
    pub fn new(service: &'a dyn ServiceManager, settings: &'a ServiceConfig) -> Self {
        Self { service, settings }
    }

    /// Run one reconciliation pass.
    pub async fn reconcile(
        &self,
        desired: &DesiredConfig,
        replica_set_name: &str,
    ) -> Result<ReconcileResult, ReplicadmError> {
        desired.validate()?;

        let path = &self.settings.config_path;
        let live = read_live(path)?;

        let next = match &live {
            LiveState::Parsed(doc) => {
                for section in OwnedSection::ALL {
                    debug!(
                        section = section.key(),
                        state = ?doc.section_state(section, desired, replica_set_name),
                        "live section"
                    );
                }
                if doc.matches(desired, replica_set_name) {
                    info!(config = %path.display(), "config already in desired state");
                    return Ok(ReconcileResult::unchanged());
                }
                let mut doc = doc.clone();
                doc.apply(desired, replica_set_name);
                doc
            }
            LiveState::Malformed => {
                warn!(
                    config = %path.display(),
                    "live config is malformed; replacing with a synthesized document"
                );
                MongodDocument::synthesize(desired, replica_set_name)
            }
            LiveState::Absent => {
                info!(config = %path.display(), "no live config; synthesizing");
                MongodDocument::synthesize(desired, replica_set_name)
            }
        };

        // Backup first, as its own completed step; only then touch the file.
        let backup = ConfigBackup::create(path)?;
        let rendered = next
            .render()
            .map_err(ReplicadmError::ConfigParse)?;
        write_atomic(path, &rendered)?;
        info!(config = %path.display(), "config written");

        if self.restart_and_wait().await? {
            return Ok(ReconcileResult {
                changed: true,
                rolled_back: false,
                backup,
                warning: None,
            });
        }

        // Restart failed: roll back to the pre-edit state and try once more.
        warn!(
            service = %self.settings.name,
            "service did not come up after config write; rolling back"
        );
        let restored = match &backup {
            Some(b) => b.restore(path),
            None => {
                // Pre-call state was "no file": rollback removes the write.
                std::fs::remove_file(path).map_err(|e| ReplicadmError::io(path, e))
            }
        };
        if let Err(e) = restored {
            // The just-written config is still live and cannot be undone.
            warn!(
                service = %self.settings.name,
                error = %e,
                "rollback could not restore the previous config"
            );
            return Err(self.unrecoverable(&backup));
        }

        if self.restart_and_wait().await? {
            info!(service = %self.settings.name, "service recovered on rolled-back config");
            return Ok(ReconcileResult {
                changed: false,
                rolled_back: true,
                warning: Some(ReplicadmError::RestartFailed {
                    service: self.settings.name.clone(),
                    waited_secs: self.settings.restart_timeout_secs,
                }),
                backup,
            });
        }

        Err(self.unrecoverable(&backup))
    }

    fn unrecoverable(&self, backup: &Option<ConfigBackup>) -> ReplicadmError {
        ReplicadmError::Unrecoverable {
            service: self.settings.name.clone(),
            backup: backup
                .as_ref()
                .map(|b| b.path().display().to_string())
                .unwrap_or_else(|| "(no prior config existed)".to_string()),
        }
    }

    /// Restart the service and poll for liveness within the configured
    /// budget.  Returns whether the service came up.
    async fn restart_and_wait(&self) -> Result<bool, ReplicadmError> {
        let name = &self.settings.name;
        if let Err(e) = self.service.restart(name).await {
            warn!(service = %name, error = %e, "restart request failed");
            return Ok(false);
        }

        let interval = Duration::from_secs(self.settings.restart_poll_interval_secs.max(1));
        let mut waited = Duration::ZERO;
        let budget = Duration::from_secs(self.settings.restart_timeout_secs);
        loop {
            match self.service.is_active(name).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => warn!(service = %name, error = %e, "liveness query failed"),
            }
            if waited >= budget {
                return Ok(false);
            }
            tokio::time::sleep(interval).await;
            waited += interval;
        }
    }
}

fn read_live(path: &Path) -> Result<LiveState, ReplicadmError> {
    match std::fs::read_to_string(path) {
        Ok(text) => match MongodDocument::parse(&text) {
            Ok(doc) => Ok(LiveState::Parsed(doc)),
            Err(e) => {
                warn!(config = %path.display(), error = %e, "failed to parse live config");
                Ok(LiveState::Malformed)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LiveState::Absent),
        Err(e) => Err(ReplicadmError::io(path, e)),
    }
}
