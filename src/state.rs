use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::analyser::AnalysisTap;
use crate::audio::graph::SignalGraph;

/// State shared between the canvas thread and the audio callback.
pub struct AudioState {
    /// The signal graph, built on first use.
    pub graph: Mutex<Option<SignalGraph>>,

    /// Most recent output samples, for the spectrum overlay and the scope.
    pub tap: Mutex<AnalysisTap>,
}

impl AudioState {
    /// Create a new `AudioState` with no graph yet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            graph: Mutex::new(None),
            tap: Mutex::new(AnalysisTap::default()),
        })
    }

    /// Locks the graph, recovering from poisoning.
    pub fn graph(&self) -> MutexGuard<'_, Option<SignalGraph>> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tap(&self) -> MutexGuard<'_, AnalysisTap> {
        self.tap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
