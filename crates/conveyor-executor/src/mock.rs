//! Scripted container runtime for tests.
//!
//! Understands `echo <text>`, `sleep <secs>` and `exit <code>` segments joined
//! with `&&`; anything else succeeds silently.

use async_trait::async_trait;
use bytes::Bytes;
use conveyor_core::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};
use conveyor_core::{Error, Result};
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Container {
    script: String,
    log_tx: Option<mpsc::UnboundedSender<Bytes>>,
    log_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    stopped: CancellationToken,
}

#[derive(Default)]
pub(crate) struct ScriptedRuntime {
    containers: Mutex<HashMap<String, Container>>,
    /// Images whose pull fails.
    broken_images: Vec<String>,
    events: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub(crate) fn with_broken_image(image: &str) -> Self {
        Self {
            broken_images: vec![image.to_string()],
            ..Default::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn container<R>(&self, name: &str, f: impl FnOnce(&mut Container) -> R) -> Result<R> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("container {}", name)))?;
        Ok(f(container))
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image));
        if self.broken_images.iter().any(|broken| broken == image) {
            return Err(Error::ExecutionFailed(format!(
                "Failed to pull image {}: not found",
                image
            )));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let script = spec.command.last().cloned().unwrap_or_default();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        self.containers.lock().unwrap().insert(
            spec.name.clone(),
            Container {
                script,
                log_tx: Some(log_tx),
                log_rx: Some(log_rx),
                stopped: CancellationToken::new(),
            },
        );
        self.record(format!("create {}", spec.name));
        Ok(ContainerHandle {
            id: format!("id-{}", spec.name),
            name: spec.name.clone(),
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        self.record(format!("start {}", handle.name));
        Ok(())
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, Bytes>> {
        let rx = self
            .container(&handle.name, |c| c.log_rx.take())?
            .ok_or_else(|| Error::Conflict("logs already attached".to_string()))?;
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (line, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64> {
        let (script, log_tx, stopped) = self.container(&handle.name, |c| {
            (c.script.clone(), c.log_tx.take(), c.stopped.clone())
        })?;

        for segment in script.split("&&").map(str::trim) {
            let (command, arg) = segment.split_once(' ').unwrap_or((segment, ""));
            match command {
                "echo" => {
                    if let Some(tx) = &log_tx {
                        let _ = tx.send(Bytes::from(format!("{}\n", arg)));
                    }
                }
                "sleep" => {
                    let secs: f64 = arg.parse().unwrap_or(0.0);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
                        _ = stopped.cancelled() => return Ok(137),
                    }
                }
                "exit" => return Ok(arg.parse().unwrap_or(1)),
                _ => {}
            }
            if stopped.is_cancelled() {
                return Ok(137);
            }
        }
        Ok(0)
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<()> {
        self.record(format!("stop {}", handle.name));
        self.container(&handle.name, |c| c.stopped.cancel())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        self.record(format!("remove {}", handle.name));
        self.containers.lock().unwrap().remove(&handle.name);
        Ok(())
    }
}
