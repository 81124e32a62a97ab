//! In-memory repository implementations
//!
//! Both mocks honour the same contracts as the SQL backends: the guarded claim,
//! one in-progress run per flow, and predecessor-checked status transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataflow_domain::{
    Cursor, DataFlow, DataFlowRepository, DataFlowRun, DataFlowRunRepository, DataFlowRunStatus,
    RunStatusUpdate,
};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Injected failures, keyed by operation name
#[derive(Debug, Clone, Default)]
struct Faults(Arc<Mutex<HashSet<String>>>);

impl Faults {
    fn add(&self, operation: &str) {
        self.0.lock().unwrap().insert(operation.to_string());
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn check(&self, operation: &str) -> DataFlowResult<()> {
        if self.0.lock().unwrap().contains(operation) {
            return Err(DataFlowError::database_error(format!("injected failure: {operation}")));
        }
        Ok(())
    }
}

/// Mock implementation of DataFlowRunRepository
#[derive(Debug, Clone)]
pub struct MockDataFlowRunRepository {
    runs: Arc<Mutex<HashMap<i64, DataFlowRun>>>,
    next_id: Arc<Mutex<i64>>,
    faults: Faults,
}

impl MockDataFlowRunRepository {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            faults: Faults::default(),
        }
    }

    /// Make `operation` fail with a database error until cleared.
    /// Status updates are keyed per target status, e.g. `update_status:success`.
    pub fn fail_on(&self, operation: &str) {
        self.faults.add(operation);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Insert a run as-is, keeping its id
    pub fn insert(&self, run: DataFlowRun) {
        let mut next_id = self.next_id.lock().unwrap();
        if run.id >= *next_id {
            *next_id = run.id + 1;
        }
        self.runs.lock().unwrap().insert(run.id, run);
    }

    pub fn count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn get_all_runs(&self) -> Vec<DataFlowRun> {
        let mut runs: Vec<_> = self.runs.lock().unwrap().values().cloned().collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    pub fn runs_for(&self, data_flow_id: i64, status: DataFlowRunStatus) -> Vec<DataFlowRun> {
        self.get_all_runs()
            .into_iter()
            .filter(|r| r.data_flow_id == data_flow_id && r.status == status)
            .collect()
    }

    fn has_due_pending(&self, data_flow_id: i64, now: DateTime<Utc>) -> bool {
        self.runs
            .lock()
            .unwrap()
            .values()
            .any(|r| r.data_flow_id == data_flow_id && r.is_due(now))
    }

    fn remove_for_flow(&self, data_flow_id: i64) {
        self.runs
            .lock()
            .unwrap()
            .retain(|_, r| r.data_flow_id != data_flow_id);
    }
}

impl Default for MockDataFlowRunRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataFlowRunRepository for MockDataFlowRunRepository {
    async fn create(&self, data_flow_id: i64, run_after: DateTime<Utc>) -> DataFlowResult<DataFlowRun> {
        let mut next_id = self.next_id.lock().unwrap();
        let mut run = DataFlowRun::new(data_flow_id, run_after);
        run.id = *next_id;
        *next_id += 1;
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlowRun>> {
        Ok(self.runs.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_data_flow(&self, data_flow_id: i64) -> DataFlowResult<Vec<DataFlowRun>> {
        let mut runs: Vec<_> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.data_flow_id == data_flow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.run_after.cmp(&a.run_after).then(b.id.cmp(&a.id)));
        Ok(runs)
    }

    async fn find_earliest_pending(
        &self,
        data_flow_id: i64,
        now: DateTime<Utc>,
    ) -> DataFlowResult<Option<DataFlowRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.data_flow_id == data_flow_id && r.is_due(now))
            .min_by(|a, b| a.run_after.cmp(&b.run_after).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn claim(&self, run_id: i64, started_at: DateTime<Utc>) -> DataFlowResult<bool> {
        let mut runs = self.runs.lock().unwrap();
        let Some(data_flow_id) = runs
            .get(&run_id)
            .filter(|r| r.is_pending())
            .map(|r| r.data_flow_id)
        else {
            return Ok(false);
        };

        let busy = runs
            .values()
            .any(|r| r.data_flow_id == data_flow_id && r.is_in_progress());
        if busy {
            return Ok(false);
        }

        if let Some(run) = runs.get_mut(&run_id) {
            run.status = DataFlowRunStatus::InProgress;
            run.started_at = Some(started_at);
        }
        Ok(true)
    }

    async fn update_status(
        &self,
        run_id: i64,
        status: DataFlowRunStatus,
        update: RunStatusUpdate,
    ) -> DataFlowResult<DataFlowRun> {
        self.faults.check(&format!("update_status:{status}"))?;
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| DataFlowError::data_flow_run_not_found(run_id))?;
        run.apply(status, &update)?;
        Ok(run.clone())
    }

    async fn update_cursors(&self, run_id: i64, first_id: &Cursor, last_id: &Cursor) -> DataFlowResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| DataFlowError::data_flow_run_not_found(run_id))?;
        run.first_id = Some(first_id.clone());
        run.last_id = Some(last_id.clone());
        Ok(())
    }

    async fn cancel_pending(&self, data_flow_id: i64) -> DataFlowResult<u64> {
        let now = Utc::now();
        let mut cancelled = 0;
        for run in self.runs.lock().unwrap().values_mut() {
            if run.data_flow_id == data_flow_id && run.is_pending() {
                run.status = DataFlowRunStatus::Cancelled;
                run.ended_at = Some(now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn find_overdue_pending(&self, before: DateTime<Utc>) -> DataFlowResult<Vec<DataFlowRun>> {
        let mut runs: Vec<_> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_pending() && r.run_after <= before)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.run_after);
        Ok(runs)
    }

    async fn cancel_runs(&self, run_ids: &[i64]) -> DataFlowResult<u64> {
        let now = Utc::now();
        let mut runs = self.runs.lock().unwrap();
        let mut cancelled = 0;
        for id in run_ids {
            if let Some(run) = runs.get_mut(id).filter(|r| r.is_pending()) {
                run.status = DataFlowRunStatus::Cancelled;
                run.ended_at = Some(now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn has_future_pending(&self, data_flow_id: i64, now: DateTime<Utc>) -> DataFlowResult<bool> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .any(|r| r.data_flow_id == data_flow_id && r.is_pending() && r.run_after > now))
    }

    async fn find_in_progress(&self) -> DataFlowResult<Vec<DataFlowRun>> {
        let mut runs: Vec<_> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_in_progress())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.id);
        Ok(runs)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> DataFlowResult<u64> {
        let mut runs = self.runs.lock().unwrap();
        let before = runs.len();
        runs.retain(|_, r| !(r.is_finished() && r.ended_at.unwrap_or(r.created_at) < cutoff));
        Ok((before - runs.len()) as u64)
    }
}

/// Mock implementation of DataFlowRepository
///
/// Shares a run store so `find_due` and cascading deletes see the same runs
/// as the paired [`MockDataFlowRunRepository`].
#[derive(Debug, Clone)]
pub struct MockDataFlowRepository {
    flows: Arc<Mutex<HashMap<i64, DataFlow>>>,
    next_id: Arc<Mutex<i64>>,
    runs: MockDataFlowRunRepository,
    faults: Faults,
}

impl MockDataFlowRepository {
    pub fn new(runs: MockDataFlowRunRepository) -> Self {
        Self {
            flows: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            runs,
            faults: Faults::default(),
        }
    }

    /// Make `operation` fail with a database error until cleared
    pub fn fail_on(&self, operation: &str) {
        self.faults.add(operation);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn insert(&self, data_flow: DataFlow) {
        let mut flows = self.flows.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        if data_flow.id >= *next_id {
            *next_id = data_flow.id + 1;
        }
        flows.insert(data_flow.id, data_flow);
    }

    pub fn count(&self) -> usize {
        self.flows.lock().unwrap().len()
    }

    pub fn get_all_flows(&self) -> Vec<DataFlow> {
        let mut flows: Vec<_> = self.flows.lock().unwrap().values().cloned().collect();
        flows.sort_by_key(|f| f.id);
        flows
    }

    fn modify<F>(&self, id: i64, f: F) -> DataFlowResult<()>
    where
        F: FnOnce(&mut DataFlow),
    {
        let mut flows = self.flows.lock().unwrap();
        let flow = flows
            .get_mut(&id)
            .ok_or_else(|| DataFlowError::data_flow_not_found(id))?;
        f(flow);
        flow.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DataFlowRepository for MockDataFlowRepository {
    async fn upsert_by_name(
        &self,
        name: &str,
        source: &Value,
        sink: &Value,
        runtime: Option<&Value>,
    ) -> DataFlowResult<(DataFlow, bool)> {
        let mut flows = self.flows.lock().unwrap();
        if let Some(existing) = flows.values_mut().find(|f| f.name == name) {
            existing.source = source.clone();
            existing.sink = sink.clone();
            existing.runtime = runtime.cloned();
            existing.updated_at = Utc::now();
            return Ok((existing.clone(), false));
        }

        let mut next_id = self.next_id.lock().unwrap();
        let mut flow = DataFlow::new(name, source.clone(), sink.clone(), runtime.cloned());
        flow.id = *next_id;
        *next_id += 1;
        flows.insert(flow.id, flow.clone());
        Ok((flow, true))
    }

    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlow>> {
        Ok(self.flows.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> DataFlowResult<Option<DataFlow>> {
        Ok(self
            .flows
            .lock()
            .unwrap()
            .values()
            .find(|f| f.name == name)
            .cloned())
    }

    async fn list(&self) -> DataFlowResult<Vec<DataFlow>> {
        Ok(self.get_all_flows())
    }

    async fn update(&self, data_flow: &DataFlow) -> DataFlowResult<DataFlow> {
        self.modify(data_flow.id, |flow| {
            flow.source = data_flow.source.clone();
            flow.sink = data_flow.sink.clone();
            flow.runtime = data_flow.runtime.clone();
            flow.status = data_flow.status;
        })?;
        self.get_by_id(data_flow.id)
            .await?
            .ok_or_else(|| DataFlowError::data_flow_not_found(data_flow.id))
    }

    async fn update_cursor(&self, id: i64, cursor: &Cursor) -> DataFlowResult<()> {
        self.faults.check("update_cursor")?;
        self.modify(id, |flow| flow.next_source_id = Some(cursor.clone()))
    }

    async fn record_run_started(&self, id: i64, at: DateTime<Utc>) -> DataFlowResult<()> {
        self.faults.check("record_run_started")?;
        self.modify(id, |flow| {
            flow.last_run_at = Some(at);
            flow.last_error = None;
        })
    }

    async fn record_error(&self, id: i64, message: &str) -> DataFlowResult<()> {
        self.faults.check("record_error")?;
        self.modify(id, |flow| flow.last_error = Some(message.to_string()))
    }

    async fn delete(&self, id: i64) -> DataFlowResult<bool> {
        let removed = self.flows.lock().unwrap().remove(&id).is_some();
        if removed {
            self.runs.remove_for_flow(id);
        }
        Ok(removed)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> DataFlowResult<Vec<DataFlow>> {
        Ok(self
            .get_all_flows()
            .into_iter()
            .filter(|f| f.is_active() && self.runs.has_due_pending(f.id, now))
            .collect())
    }
}

/// A paired flow/run mock sharing one run store
pub fn mock_repositories() -> (MockDataFlowRepository, MockDataFlowRunRepository) {
    let runs = MockDataFlowRunRepository::new();
    (MockDataFlowRepository::new(runs.clone()), runs)
}
