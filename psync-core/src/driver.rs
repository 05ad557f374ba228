//! Lifecycle driver.
//!
//! Drives a remote resource through create/read/update/delete and waits for
//! it to converge. The resource-specific parts (remote calls, state names,
//! how a response is written back into the local record) live behind the
//! [`Lifecycle`] trait.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{LifecycleError, Operation, RemoteError};

/// A remote resource the [`Driver`] can manage.
///
/// `get` refreshes the adapter's view of the remote resource; `state` reads
/// the lifecycle state from that view. `materialize` copies the remote view
/// into the tracked local record.
#[async_trait]
pub trait Lifecycle: Send {
    /// Remote identity, once assigned.
    fn id(&self) -> Option<&str>;

    /// Lifecycle state from the last successful call.
    fn state(&self) -> Option<&str>;

    fn created_pending(&self) -> &[&str];
    fn created_target(&self) -> &[&str];
    fn deleted_pending(&self) -> &[&str];
    fn deleted_target(&self) -> &[&str];

    async fn create(&mut self) -> Result<(), RemoteError>;
    async fn get(&mut self) -> Result<(), RemoteError>;
    async fn update(&mut self) -> Result<(), RemoteError>;
    async fn delete(&mut self) -> Result<(), RemoteError>;

    fn materialize(&mut self);
}

/// State sets for one polling phase.
struct Phase {
    operation: Operation,
    pending: Vec<String>,
    target: Vec<String>,
    timeout: Duration,
    /// Resource absence counts as reaching the target.
    absent_is_target: bool,
}

impl Phase {
    fn new(
        operation: Operation,
        pending: &[&str],
        target: &[&str],
        timeout: Duration,
        absent_is_target: bool,
    ) -> Self {
        Self {
            operation,
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            absent_is_target,
        }
    }

    fn expected(&self) -> Vec<String> {
        self.pending.iter().chain(&self.target).cloned().collect()
    }
}

/// Runs lifecycle operations with the deadlines and poll intervals from a
/// [`DriverConfig`].
#[derive(Debug, Clone, Default)]
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Create the resource and wait until it reaches a created target state.
    pub async fn create<L: Lifecycle + ?Sized>(&self, res: &mut L) -> Result<(), LifecycleError> {
        res.create()
            .await
            .map_err(|e| remote_error(Operation::Create, res, e))?;
        info!(id = res.id().unwrap_or_default(), "Create accepted, waiting for target state");

        let phase = Phase::new(
            Operation::Create,
            res.created_pending(),
            res.created_target(),
            self.config.create_timeout,
            false,
        );
        self.wait_for(res, &phase).await?;
        res.materialize();
        Ok(())
    }

    /// Refresh the resource once.
    ///
    /// Returns [`LifecycleError::NotFound`] when the resource is gone, either
    /// absent or sitting in a deleted target state.
    pub async fn read<L: Lifecycle + ?Sized>(&self, res: &mut L) -> Result<(), LifecycleError> {
        match res.get().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(LifecycleError::NotFound {
                    operation: Operation::Read,
                    id: res.id().map(str::to_string),
                });
            }
            Err(e) => return Err(remote_error(Operation::Read, res, e)),
        }

        if let Some(state) = res.state() {
            if res.deleted_target().contains(&state) {
                debug!(id = res.id().unwrap_or_default(), state, "Resource is in a deleted state");
                return Err(LifecycleError::NotFound {
                    operation: Operation::Read,
                    id: res.id().map(str::to_string),
                });
            }
        }

        res.materialize();
        Ok(())
    }

    /// Update the resource and wait until it is back in a created target state.
    pub async fn update<L: Lifecycle + ?Sized>(&self, res: &mut L) -> Result<(), LifecycleError> {
        res.update()
            .await
            .map_err(|e| remote_error(Operation::Update, res, e))?;
        debug!(id = res.id().unwrap_or_default(), "Update accepted, waiting for target state");

        let phase = Phase::new(
            Operation::Update,
            res.created_pending(),
            res.created_target(),
            self.config.update_timeout,
            false,
        );
        self.wait_for(res, &phase).await?;
        res.materialize();
        Ok(())
    }

    /// Delete the resource and wait until it is gone.
    pub async fn delete<L: Lifecycle + ?Sized>(&self, res: &mut L) -> Result<(), LifecycleError> {
        match res.delete().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(id = res.id().unwrap_or_default(), "Resource already gone");
                return Ok(());
            }
            Err(e) => return Err(remote_error(Operation::Delete, res, e)),
        }

        let phase = Phase::new(
            Operation::Delete,
            res.deleted_pending(),
            res.deleted_target(),
            self.config.delete_timeout,
            true,
        );
        self.wait_for(res, &phase).await?;
        Ok(())
    }

    /// Poll `get` until the state leaves the pending set.
    async fn wait_for<L: Lifecycle + ?Sized>(
        &self,
        res: &mut L,
        phase: &Phase,
    ) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let deadline = started + phase.timeout;
        let mut delay = self.config.poll_interval;
        let mut not_found = 0u32;
        let mut last_state: Option<String> = None;

        loop {
            match timeout_at(deadline, res.get()).await {
                Err(_) => {
                    warn!(
                        id = res.id().unwrap_or_default(),
                        operation = %phase.operation,
                        "Refresh did not return before the deadline"
                    );
                    return Err(timeout_error(phase, res, last_state, started));
                }
                Ok(Err(e)) if e.is_not_found() => {
                    if phase.absent_is_target {
                        info!(id = res.id().unwrap_or_default(), operation = %phase.operation, "Resource is gone");
                        return Ok(());
                    }
                    not_found += 1;
                    if not_found > self.config.not_found_checks {
                        warn!(
                            id = res.id().unwrap_or_default(),
                            operation = %phase.operation,
                            checks = not_found,
                            "Resource still not visible"
                        );
                        return Err(LifecycleError::NotFound {
                            operation: phase.operation,
                            id: res.id().map(str::to_string),
                        });
                    }
                    debug!(id = res.id().unwrap_or_default(), checks = not_found, "Resource not visible yet");
                }
                Ok(Err(e)) => {
                    let mut err = remote_error(phase.operation, res, e);
                    if let LifecycleError::Remote { last_state: ls, .. } = &mut err {
                        *ls = last_state;
                    }
                    return Err(err);
                }
                Ok(Ok(())) => {
                    not_found = 0;
                    let state = res.state().unwrap_or_default().to_string();
                    if phase.target.contains(&state) {
                        info!(
                            id = res.id().unwrap_or_default(),
                            operation = %phase.operation,
                            state = %state,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Reached target state"
                        );
                        return Ok(());
                    }
                    if !phase.pending.contains(&state) {
                        warn!(
                            id = res.id().unwrap_or_default(),
                            operation = %phase.operation,
                            state = %state,
                            "Unexpected state"
                        );
                        return Err(LifecycleError::UnexpectedState {
                            operation: phase.operation,
                            id: res.id().map(str::to_string),
                            state,
                            expected: phase.expected(),
                        });
                    }
                    debug!(id = res.id().unwrap_or_default(), state = %state, "Still pending");
                    last_state = Some(state);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    id = res.id().unwrap_or_default(),
                    operation = %phase.operation,
                    timeout_secs = phase.timeout.as_secs(),
                    "Timeout waiting for target state"
                );
                return Err(timeout_error(phase, res, last_state, started));
            }
            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(self.config.max_poll_interval);
        }
    }
}

fn remote_error<L: Lifecycle + ?Sized>(
    operation: Operation,
    res: &L,
    source: RemoteError,
) -> LifecycleError {
    LifecycleError::Remote {
        operation,
        id: res.id().map(str::to_string),
        last_state: res.state().map(str::to_string),
        source,
    }
}

fn timeout_error<L: Lifecycle + ?Sized>(
    phase: &Phase,
    res: &L,
    last_state: Option<String>,
    started: Instant,
) -> LifecycleError {
    LifecycleError::Timeout {
        operation: phase.operation,
        id: res.id().map(str::to_string),
        last_state,
        waited: started.elapsed(),
    }
}
