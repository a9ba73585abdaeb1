//! Scoped ownership of the run's container
//!
//! `acquire` creates and starts the container; `release` stops and removes
//! it. `release` consumes the lease, so a run cannot clean up twice. A lease
//! dropped without `release` (the run future was dropped, or the trial loop
//! panicked) hands the same stop + remove to a background task on the
//! current runtime.

use crate::engine::{Container, EngineClient};
use crate::state::ContainerState;
use execleak_foundation::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

pub struct ContainerLease {
    engine: Arc<dyn EngineClient>,
    container: Container,
    stop_timeout: Duration,
    released: bool,
}

impl ContainerLease {
    /// Create and start a container.
    ///
    /// A container that was created but failed to start is removed before
    /// the error is returned.
    pub async fn acquire(
        engine: Arc<dyn EngineClient>,
        image: &str,
        command: &[String],
        stop_timeout: Duration,
    ) -> Result<ContainerLease> {
        let id = engine.create_container(image, command).await?;
        let mut container = Container::new(id, image);

        if let Err(e) = engine.start_container(&container.id).await {
            if let Err(cleanup) = engine.remove_container(&container.id).await {
                warn!(container_id = %container.id, "Cleanup after failed start: {}", cleanup);
            }
            return Err(e);
        }
        container.state = ContainerState::Running;
        info!(container_id = %container.id, image, "Container is running");

        Ok(Self {
            engine,
            container,
            stop_timeout,
            released: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.container.id
    }

    /// Stop and remove the container. Failures are logged, not returned,
    /// so the removal is attempted even when stopping fails.
    pub async fn release(mut self) -> Container {
        self.released = true;
        stop_and_remove(self.engine.as_ref(), &mut self.container, self.stop_timeout).await;
        self.container.clone()
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut container = self.container.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                warn!(container_id = %container.id, "Lease dropped before release, cleaning up in background");
                let engine = Arc::clone(&self.engine);
                let stop_timeout = self.stop_timeout;
                runtime.spawn(async move {
                    stop_and_remove(engine.as_ref(), &mut container, stop_timeout).await;
                });
            }
            Err(_) => {
                error!(container_id = %container.id, "Lease dropped outside a runtime, container left behind");
            }
        }
    }
}

async fn stop_and_remove(engine: &dyn EngineClient, container: &mut Container, stop_timeout: Duration) {
    match engine.stop_container(&container.id, stop_timeout).await {
        Ok(()) => container.state = ContainerState::Stopped,
        Err(e) => error!(container_id = %container.id, "Stop failed: {}", e),
    }
    match engine.remove_container(&container.id).await {
        Ok(()) => container.state = ContainerState::Removed,
        Err(e) => error!(container_id = %container.id, "Remove failed: {}", e),
    }
}
