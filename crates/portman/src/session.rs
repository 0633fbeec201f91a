//! Process wiring: mirror, graph service, mixer registry and control loop.
//!
//! Shutdown order matters. The control loop stops first, then the mirror
//! closes (stopping and joining the debouncer thread), and only then is the
//! graph service released, so no settle callback can run against a
//! torn-down graph connection.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::control::{BindingSource, ControlLoop};
use crate::error::GraphError;
use crate::mirror::GraphMirror;
use crate::mixer::MixerRegistry;
use crate::service::GraphService;
use crate::track::GraphHandle;

pub struct Session {
    mirror: Arc<GraphMirror>,
    service: Arc<dyn GraphService>,
    registry: Arc<MixerRegistry>,
}

impl Session {
    /// Take the initial full snapshot of `service` into `mirror`.
    ///
    /// `service` must already deliver its callbacks to `mirror`.
    pub fn start(
        mirror: Arc<GraphMirror>,
        service: Arc<dyn GraphService>,
        registry: Arc<MixerRegistry>,
    ) -> Result<Self, GraphError> {
        mirror.populate(&*service)?;
        Ok(Self {
            mirror,
            service,
            registry,
        })
    }

    pub fn mirror(&self) -> &Arc<GraphMirror> {
        &self.mirror
    }

    pub fn registry(&self) -> &Arc<MixerRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> GraphHandle {
        GraphHandle::new(Arc::clone(&self.mirror), Arc::clone(&self.service))
    }

    /// Run the control loop over `keys` until they run out, redrawing on
    /// `out` at startup, after every key and whenever the graph settles.
    pub fn run(
        self,
        source: impl BindingSource + 'static,
        out: Box<dyn Write + Send>,
        keys: impl IntoIterator<Item = char>,
    ) -> anyhow::Result<()> {
        let control = Arc::new(ControlLoop::new(Arc::clone(&self.mirror), source, out));
        control.rebuild().context("Failed to draw initial bindings")?;

        let weak = Arc::downgrade(&control);
        let subscription = self.mirror.on_settled(move || {
            if let Some(control) = weak.upgrade() {
                control.rebuild()?;
            }
            Ok(())
        });

        info!("Control loop running");
        let result = control.run(keys);

        drop(subscription);
        drop(control);
        self.shutdown();
        result.context("Terminal I/O failed")
    }

    /// Close the mirror, then the graph service. Idempotent.
    pub fn shutdown(&self) {
        self.mirror.close();
        self.service.close();
        debug!("Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
