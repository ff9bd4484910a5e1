use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use stepgraph_core::error::{Result, StepgraphError};
use stepgraph_core::types::{RunId, RunStatus, WorkflowRun};

/// In-memory run records keyed by run id.
///
/// The map lock is only held to insert or find a record; each record carries
/// its own mutex, so drivers for different runs never block each other and
/// readers always see a whole record. Records are never evicted.
#[derive(Default)]
pub struct RunStore {
    runs: RwLock<HashMap<RunId, Arc<Mutex<WorkflowRun>>>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. An existing record with the same id is replaced.
    pub fn insert(&self, run: WorkflowRun) -> Result<()> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StepgraphError::Store(e.to_string()))?;
        runs.insert(run.run_id.clone(), Arc::new(Mutex::new(run)));
        Ok(())
    }

    /// Point-in-time snapshot of a run.
    pub fn get(&self, run_id: &RunId) -> Option<WorkflowRun> {
        let record = self.record(run_id)?;
        let run = record.lock().unwrap_or_else(PoisonError::into_inner);
        Some(run.clone())
    }

    /// Current status of a run without cloning its state.
    pub fn status(&self, run_id: &RunId) -> Option<RunStatus> {
        let record = self.record(run_id)?;
        let run = record.lock().unwrap_or_else(PoisonError::into_inner);
        Some(run.status)
    }

    /// Mutate a run in place under its record lock.
    pub fn update<T>(&self, run_id: &RunId, f: impl FnOnce(&mut WorkflowRun) -> T) -> Result<T> {
        let record = self
            .record(run_id)
            .ok_or_else(|| StepgraphError::RunNotFound(run_id.to_string()))?;
        let mut run = record
            .lock()
            .map_err(|e| StepgraphError::Store(e.to_string()))?;
        Ok(f(&mut run))
    }

    pub fn contains(&self, run_id: &RunId) -> bool {
        self.record(run_id).is_some()
    }

    /// All known run ids, in no particular order.
    pub fn ids(&self) -> Vec<RunId> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, run_id: &RunId) -> Option<Arc<Mutex<WorkflowRun>>> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use stepgraph_core::types::RunState;

    fn pending(graph_id: &str) -> WorkflowRun {
        WorkflowRun::pending(RunId::new(), graph_id, RunState::new())
    }

    #[test]
    fn test_insert_and_get() {
        let store = RunStore::new();
        let run = pending("g");
        let id = run.run_id.clone();
        store.insert(run).unwrap();

        let snapshot = store.get(&id).unwrap();
        assert_eq!(snapshot.graph_id, "g");
        assert_eq!(store.status(&id), Some(RunStatus::Pending));
        assert!(store.contains(&id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let store = RunStore::new();
        let id = RunId::from_str("missing");
        assert!(store.get(&id).is_none());
        assert!(store.status(&id).is_none());
        let err = store.update(&id, |run| run.mark_running()).unwrap_err();
        assert!(matches!(err, StepgraphError::RunNotFound(_)));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = RunStore::new();
        let run = pending("g");
        let id = run.run_id.clone();
        store.insert(run).unwrap();

        let before = store.get(&id).unwrap();
        store
            .update(&id, |run| run.history.push("a".into()))
            .unwrap();
        assert!(before.history.is_empty());
        assert_eq!(store.get(&id).unwrap().history, vec!["a"]);
    }

    #[test]
    fn test_concurrent_updates_on_distinct_runs() {
        let store = Arc::new(RunStore::new());
        let ids: Vec<RunId> = (0..8)
            .map(|_| {
                let run = pending("g");
                let id = run.run_id.clone();
                store.insert(run).unwrap();
                id
            })
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..100 {
                        store
                            .update(&id, |run| run.history.push(format!("n{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for id in &ids {
            assert_eq!(store.get(id).unwrap().history.len(), 100);
        }
        assert_eq!(store.ids().len(), 8);
    }
}
