use std::sync::Arc;

use dataflow_connectors::{ConnectorRegistry, DefaultRuntime};
use dataflow_domain::{
    CollisionOutcome, Cursor, DataFlow, DataFlowRun, Descriptor, Runtime, Sink, Source,
};
use dataflow_errors::{DataFlowError, DataFlowResult};
use dataflow_infrastructure::{MetricsCollector, StructuredLogger};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::data_flow_service::DataFlowService;

/// 一次批处理的结果统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// 从源读取的记录数，包含被判定为冗余的记录
    pub processed: usize,
    pub written: usize,
    pub skipped: usize,
    pub updated: usize,
    pub first_id: Option<Cursor>,
    pub last_id: Option<Cursor>,
}

/// 对单个运行实例执行一批记录：重建连接器、读取、转换、写入、推进游标
pub struct BatchExecutor {
    registry: Arc<ConnectorRegistry>,
    service: Arc<DataFlowService>,
    metrics: Arc<MetricsCollector>,
}

impl BatchExecutor {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        service: Arc<DataFlowService>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            service,
            metrics,
        }
    }

    fn rehydrate_runtime(&self, flow: &DataFlow) -> Box<dyn Runtime> {
        let rehydrated = flow
            .runtime
            .as_ref()
            .map(|value| Descriptor::from_value(value).and_then(|d| self.registry.deserialize_runtime(&d)));

        match rehydrated {
            Some(Ok(runtime)) => runtime,
            Some(Err(e)) => {
                warn!("数据流 {} 的运行时无法重建，使用默认运行时: {}", flow.name, e);
                Box::new(DefaultRuntime::new(flow.policy()))
            }
            None => Box::new(DefaultRuntime::new(flow.policy())),
        }
    }

    fn rehydrate_source(&self, flow: &DataFlow) -> DataFlowResult<Box<dyn Source>> {
        Descriptor::from_value(&flow.source)
            .and_then(|d| self.registry.deserialize_source(&d))
            .inspect_err(|e| StructuredLogger::log_rehydration_failure(flow.id, "source", e))
    }

    fn rehydrate_sink(&self, flow: &DataFlow) -> DataFlowResult<Box<dyn Sink>> {
        Descriptor::from_value(&flow.sink)
            .and_then(|d| self.registry.deserialize_sink(&d))
            .inspect_err(|e| StructuredLogger::log_rehydration_failure(flow.id, "sink", e))
    }

    /// 执行一批。源和汇无论成败都会被关闭；游标只在成功且至少读到一条记录时推进
    pub async fn execute(&self, flow: &DataFlow, run: &DataFlowRun) -> DataFlowResult<BatchOutcome> {
        let runtime = self.rehydrate_runtime(flow);
        let source = self.rehydrate_source(flow)?;
        let sink = match self.rehydrate_sink(flow) {
            Ok(sink) => sink,
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    warn!("关闭源失败: {}", close_err);
                }
                return Err(e);
            }
        };

        let batch_size = runtime.policy().batch_size.max(1);
        let result = self
            .process(flow, source.as_ref(), sink.as_ref(), runtime.as_ref(), batch_size)
            .await;

        let sink_closed = sink.close().await;
        if let Err(e) = source.close().await {
            warn!("关闭数据流 {} 的源失败: {}", flow.name, e);
        }

        let outcome = result?;
        sink_closed?;

        self.metrics.record_written(outcome.written as u64);
        self.metrics.record_skipped(outcome.skipped as u64);
        self.metrics.record_updated(outcome.updated as u64);

        if let Some(last_id) = &outcome.last_id {
            let first_id = outcome.first_id.as_ref().unwrap_or(last_id);
            self.service.runs().update_cursors(run.id, first_id, last_id).await?;
            self.service.advance_cursor(flow, last_id).await?;
        } else {
            debug!("数据流 {} 本批没有新记录，游标保持不变", flow.name);
        }

        Ok(outcome)
    }

    async fn process(
        &self,
        flow: &DataFlow,
        source: &dyn Source,
        sink: &dyn Sink,
        runtime: &dyn Runtime,
        batch_size: usize,
    ) -> DataFlowResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut records = source.each(batch_size, flow.next_source_id.as_ref());

        while let Some(record) = records.next().await {
            let record = record?;
            let record_id = source.record_id(&record);
            if outcome.first_id.is_none() {
                outcome.first_id = record_id.clone();
            }
            if record_id.is_some() {
                outcome.last_id = record_id;
            }

            let transformed = runtime.transform(record.clone())?;
            match runtime.detect_collision(&record, &transformed).await? {
                Some(CollisionOutcome::Redundant) => {
                    outcome.skipped += 1;
                }
                Some(CollisionOutcome::Update) => {
                    let key = Self::collision_key(runtime, &transformed)?;
                    if sink.update(&key, transformed.clone()).await? {
                        outcome.updated += 1;
                    } else {
                        sink.write(transformed).await?;
                        outcome.written += 1;
                    }
                }
                _ => {
                    sink.write(transformed).await?;
                    outcome.written += 1;
                }
            }

            outcome.processed += 1;
            if outcome.processed >= batch_size {
                break;
            }
        }

        Ok(outcome)
    }

    fn collision_key(runtime: &dyn Runtime, transformed: &Value) -> DataFlowResult<Value> {
        runtime.collision_key(transformed).ok_or_else(|| {
            DataFlowError::execution_error(format!(
                "运行时 {} 判定为更新，但记录缺少冲突键",
                runtime.type_tag()
            ))
        })
    }
}
