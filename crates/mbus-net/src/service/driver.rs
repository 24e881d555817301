use super::Control;
use crate::transport::Transport;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed poll, so a persistently failing socket does not spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

struct Driver {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Driver {
    async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Body of the I/O thread.
pub(super) async fn run(
    transports: Vec<Box<dyn Transport>>,
    mut control: mpsc::UnboundedReceiver<Control>,
    poll_interval: Duration,
) {
    let mut drivers: HashMap<&'static str, Driver> = HashMap::new();
    for transport in transports {
        start_driver(&mut drivers, transport, poll_interval).await;
    }

    while let Some(command) = control.recv().await {
        match command {
            Control::Add(transport) => start_driver(&mut drivers, transport, poll_interval).await,
            Control::Remove(name) => {
                if let Some(driver) = drivers.remove(name.as_str()) {
                    driver.stop().await;
                    debug!(transport = %name, "[mbus] Transport removed");
                }
            }
            Control::Shutdown => break,
        }
    }

    for (_, driver) in drivers.drain() {
        driver.stop().await;
    }
    info!("[mbus] I/O loop exited");
}

async fn start_driver(
    drivers: &mut HashMap<&'static str, Driver>,
    transport: Box<dyn Transport>,
    poll_interval: Duration,
) {
    let name = transport.name();
    if let Some(previous) = drivers.remove(name) {
        warn!(transport = name, "[mbus] Replacing running transport");
        previous.stop().await;
    }
    let (stop, stopped) = watch::channel(false);
    let task = tokio::spawn(drive(transport, stopped, poll_interval));
    drivers.insert(name, Driver { stop, task });
}

async fn drive(mut transport: Box<dyn Transport>, mut stop: watch::Receiver<bool>, poll_interval: Duration) {
    let name = transport.name();
    if let Err(e) = transport.activate().await {
        error!(transport = name, error = %e, "[mbus] Transport activation failed");
        transport.release();
        return;
    }

    loop {
        let result = tokio::select! {
            biased;
            _ = stop.changed() => break,
            result = transport.poll(poll_interval) => result,
        };
        if let Err(e) = result {
            warn!(transport = name, error = %e, "[mbus] Transport poll failed");
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
        transport.housekeeping();
    }

    transport.release();
}
