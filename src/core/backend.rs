// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Asynchronous map optimization, running next to the frontend.
//!
//! The backend owns a worker thread waiting for update signals.
//! At most one signal can be pending: signalling again before the worker
//! picked it up merges both requests into a single optimization pass.
//! Passes therefore never overlap and never pile up.

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::core::map::Map;

/// One global optimization pass over the map (typically a bundle adjustment).
///
/// Implementations are expected to take `Map::write` for the duration of
/// their rewrites so the frontend never sees a half-updated map.
pub trait MapOptimizer: Send {
    fn optimize(&mut self, map: &Map);
}

impl<F> MapOptimizer for F
where
    F: FnMut(&Map) + Send,
{
    fn optimize(&mut self, map: &Map) {
        self(map)
    }
}

/// Handle to the backend worker thread.
pub struct Backend {
    sender: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    passes: Arc<AtomicUsize>,
}

impl Backend {
    /// Start the worker thread.
    pub fn spawn<O>(map: Arc<Map>, mut optimizer: O) -> Backend
    where
        O: MapOptimizer + 'static,
    {
        let (sender, receiver) = bounded::<()>(1);
        let passes = Arc::new(AtomicUsize::new(0));
        let worker_passes = passes.clone();
        let worker = thread::spawn(move || {
            for () in receiver.iter() {
                optimizer.optimize(&map);
                let nb = worker_passes.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Backend optimization pass {} done", nb);
            }
            info!("Backend stopped");
        });
        Backend {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            passes,
        }
    }

    /// Request an optimization pass. Never blocks.
    pub fn update_map(&self) {
        if let Some(sender) = self.sender.lock().as_ref() {
            match sender.try_send(()) {
                Ok(()) => (),
                Err(TrySendError::Full(())) => debug!("Backend update merged with a pending one"),
                Err(TrySendError::Disconnected(())) => warn!("Backend worker is gone"),
            }
        }
    }

    /// Number of completed optimization passes.
    pub fn nb_passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// Let the worker finish the pending pass, if any, then join it.
    pub fn stop(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Backend worker panicked");
            }
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

// TESTS #############################################################
