// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::locking::handle::LockHandle;
use crate::locking::kind::{HolderId, LockType};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background renewal of a held lease. Stops when dropped.
#[derive(Debug)]
pub struct LeaseWatchdog {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl LeaseWatchdog {
    pub fn spawn(
        handle: Arc<LockHandle>,
        holder: HolderId,
        kind: LockType,
        lease: Duration,
        interval: Duration,
    ) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name(format!("distlock-watchdog-{}", handle.key()))
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match handle.renew(&holder, kind, lease) {
                        Ok(true) => trace!("Renewed lease on {} for {:?}", handle.key(), lease),
                        Ok(false) => {
                            warn!(
                                "Lease on {} was lost before renewal; stopping watchdog",
                                handle.key()
                            );
                            break;
                        }
                        Err(err) => warn!("Failed to renew lease on {}: {err}", handle.key()),
                    }
                }
            });

        match spawned {
            Ok(worker) => Self {
                stop: Some(stop),
                worker: Some(worker),
            },
            Err(err) => {
                warn!("Failed to start lease watchdog: {err}");
                Self {
                    stop: None,
                    worker: None,
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            debug!("Lease watchdog thread panicked");
        }
    }
}

impl Drop for LeaseWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
