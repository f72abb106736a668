// Copyright 2023 RisingWave Labs
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

//! Lowers a per-worker subplan into sources, pipelines and sinks.
//!
//! Chains of record-at-a-time operators become one pipeline each; stateful
//! operators split the plan into build pipelines feeding a shared handler
//! and a probe pipeline consuming its window triggers. Buffers move between
//! pipelines through the engine task queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rill_common::buffer::BufferManager;
use rill_common::catalog::{Schema, SourceDescriptor};
use rill_common::ids::{OperatorId, OriginId, PipelineId};
use rill_connector::sink::{create_sink, Sink};
use rill_plan::operator::{
    FilterOperator, JoinOperator, JoinStrategy, MapOperator, ProjectionOperator, SinkOperator,
    SourceOperator, WatermarkAssignerOperator,
};
use rill_plan::traits::OriginTrait;
use rill_plan::window::{WindowSpec, WindowType};
use rill_plan::{Function, LogicalOperator, LogicalPlan};

use super::queue::{FailureFn, RunningPipeline, Task, TaskQueue};
use crate::aggregation::{
    AggregationBuildOperator, CompiledAggregation, WindowAggregationHandler, WindowEmitScan,
};
use crate::error::{Result, StreamError};
use crate::executor::{
    BufferScan, EmitBufferFn, EmitOperator, ExecutableOperator, ExecutablePipeline,
    FilterExecutor, MapExecutor, OperatorHandler, PipelineExecutionContext, ProjectionExecutor,
    ScanOperator, WatermarkAssignerExecutor,
};
use crate::expression::CompiledExpression;
use crate::join::{
    JoinBuildOperator, JoinHandler, JoinKey, JoinProbeScan, JoinSide, RowCodec,
};
use crate::window::TimeFunction;

/// One source of the lowered query, not yet bound to a thread.
pub struct SourceSpec {
    pub descriptor: SourceDescriptor,
    pub origin: OriginId,
    pub target: Arc<RunningPipeline>,
}

/// A created sink plugin instance.
pub struct SinkHandle {
    pub name: String,
    pub sink: Arc<Mutex<Box<dyn Sink>>>,
}

/// Everything the engine needs to run one registered query.
pub struct LoweredQuery {
    /// Creation order is downstream-first; terminate runs it in reverse so
    /// build sides flush before their probes are torn down.
    pub pipelines: Vec<Arc<RunningPipeline>>,
    pub sinks: Vec<SinkHandle>,
    pub source_specs: Vec<SourceSpec>,
}

/// Where a pipeline's emitted buffers go.
#[derive(Clone)]
enum Consumer {
    Sink(Arc<Mutex<Box<dyn Sink>>>),
    Pipeline(Arc<RunningPipeline>),
}

pub(super) struct Lowering {
    buffer_manager: BufferManager,
    task_queue: Arc<TaskQueue>,
    num_worker_threads: usize,
    failure: FailureFn,
    origins: HashMap<OperatorId, OriginId>,
    pipelines: Vec<Arc<RunningPipeline>>,
    sinks: Vec<SinkHandle>,
    source_specs: Vec<SourceSpec>,
}

impl Lowering {
    pub(super) fn new(
        buffer_manager: BufferManager,
        task_queue: Arc<TaskQueue>,
        num_worker_threads: usize,
        failure: FailureFn,
    ) -> Self {
        Self {
            buffer_manager,
            task_queue,
            num_worker_threads,
            failure,
            origins: HashMap::new(),
            pipelines: vec![],
            sinks: vec![],
            source_specs: vec![],
        }
    }

    pub(super) fn lower(mut self, plan: &LogicalPlan) -> Result<LoweredQuery> {
        // Fix an origin per source leaf up front so source threads and
        // watermark processors agree.
        for op in plan.flatten() {
            if op.try_get::<SourceOperator>().is_some() {
                let origin = op
                    .trait_set()
                    .get::<OriginTrait>()
                    .map(|t| t.0)
                    .unwrap_or_else(OriginId::generate);
                self.origins.insert(op.id(), origin);
            }
        }

        for root in plan.root_operators() {
            let sink_op = root.get::<SinkOperator>().map_err(|_| {
                StreamError::UnsupportedQuery(format!(
                    "subplan root must be a sink, got {}",
                    root.kind()
                ))
            })?;
            let schema = output_schema_of(root)?;
            let sink = create_sink(
                sink_op.sink_type(),
                sink_op.sink_name(),
                &schema,
                sink_op.config(),
            )?;
            let handle = SinkHandle {
                name: sink_op.sink_name().to_owned(),
                sink: Arc::new(Mutex::new(sink)),
            };
            let consumer = Consumer::Sink(Arc::clone(&handle.sink));
            self.sinks.push(handle);

            let children = root.children();
            if children.len() != 1 {
                return Err(StreamError::UnsupportedQuery(
                    "sink must consume exactly one input".to_owned(),
                ));
            }
            self.descend(&children[0], consumer)?;
        }

        Ok(LoweredQuery {
            pipelines: self.pipelines,
            sinks: self.sinks,
            source_specs: self.source_specs,
        })
    }

    fn emit_fn(&self, consumer: &Consumer) -> EmitBufferFn {
        match consumer {
            Consumer::Sink(sink) => {
                let sink = Arc::clone(sink);
                let failure = Arc::clone(&self.failure);
                Arc::new(move |buffer| {
                    if let Err(e) = sink.lock().consume(&buffer) {
                        failure(e.into());
                    }
                })
            }
            Consumer::Pipeline(pipeline) => {
                let pipeline = Arc::clone(pipeline);
                let failure = Arc::clone(&self.failure);
                let queue = Arc::clone(&self.task_queue);
                Arc::new(move |buffer| {
                    queue.push(Task {
                        pipeline: Arc::clone(&pipeline),
                        buffer,
                        failure: Arc::clone(&failure),
                    })
                })
            }
        }
    }

    /// Builds the executable chain for `ops` (top of chain first), ending in
    /// an emit of the chain's output schema. Returns the chain head, which
    /// expects the records of the operator below `ops`.
    fn build_chain(
        &self,
        ops: &[LogicalOperator],
        fallback_schema: &Schema,
    ) -> Result<Arc<dyn ExecutableOperator>> {
        let emit_schema = match ops.first() {
            Some(top) => output_schema_of(top)?,
            None => fallback_schema.clone(),
        };
        let mut chain: Arc<dyn ExecutableOperator> = Arc::new(EmitOperator::new(0, emit_schema));
        for op in ops {
            let input_schema = output_schema_of(&op.children()[0])?;
            chain = self.lower_unary(op, &input_schema, chain)?;
        }
        Ok(chain)
    }

    fn lower_unary(
        &self,
        op: &LogicalOperator,
        input_schema: &Schema,
        child: Arc<dyn ExecutableOperator>,
    ) -> Result<Arc<dyn ExecutableOperator>> {
        if let Some(filter) = op.try_get::<FilterOperator>() {
            let predicate = CompiledExpression::build(filter.predicate(), input_schema)?;
            return Ok(Arc::new(FilterExecutor::new(predicate, child)));
        }
        if let Some(map) = op.try_get::<MapOperator>() {
            let expression = CompiledExpression::build(map.expression(), input_schema)?;
            let target_index = input_schema.field_index(map.assignment_field()).ok();
            return Ok(Arc::new(MapExecutor::new(expression, target_index, child)));
        }
        if let Some(projection) = op.try_get::<ProjectionOperator>() {
            let indices = projection
                .fields()
                .iter()
                .map(|name| input_schema.field_index(name).map_err(Into::into))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Arc::new(ProjectionExecutor::new(indices, child)));
        }
        if let Some(assigner) = op.try_get::<WatermarkAssignerOperator>() {
            let time = TimeFunction::build(assigner.time(), input_schema)?;
            return Ok(Arc::new(WatermarkAssignerExecutor::new(time, child)));
        }
        Err(StreamError::UnsupportedQuery(format!(
            "operator {} cannot run inside a pipeline chain",
            op.kind()
        )))
    }

    fn make_pipeline(
        &mut self,
        scan: Box<dyn BufferScan>,
        handlers: Vec<Arc<dyn OperatorHandler>>,
        consumer: &Consumer,
    ) -> Arc<RunningPipeline> {
        let ctx = PipelineExecutionContext::new(
            PipelineId::generate(),
            self.buffer_manager.clone(),
            self.num_worker_threads,
            handlers,
            self.emit_fn(consumer),
        );
        let pipeline = Arc::new(RunningPipeline {
            pipeline: ExecutablePipeline::new(ctx.pipeline_id(), scan),
            ctx,
        });
        self.pipelines.push(Arc::clone(&pipeline));
        pipeline
    }

    fn origins_under(&self, op: &LogicalOperator) -> Vec<OriginId> {
        let mut seen = HashSet::new();
        let mut origins = vec![];
        for node in rill_plan::plan::BfsIter::new(op.clone()) {
            if seen.insert(node.id()) {
                if let Some(origin) = self.origins.get(&node.id()) {
                    origins.push(*origin);
                }
            }
        }
        origins
    }

    /// Lowers the subtree rooted at `op`, whose output flows to `consumer`.
    fn descend(&mut self, op: &LogicalOperator, consumer: Consumer) -> Result<()> {
        // Collect the unary chain down to the next pipeline breaker.
        let mut ops = vec![];
        let mut cursor = op.clone();
        while matches!(
            cursor.kind(),
            "Filter" | "Map" | "Projection" | "WatermarkAssigner"
        ) && cursor.children().len() == 1
        {
            ops.push(cursor.clone());
            let next = cursor.children().remove(0);
            cursor = next;
        }

        match cursor.kind() {
            "Source" => self.lower_source(&cursor, &ops, consumer),
            "Union" => self.lower_union(&cursor, &ops, consumer),
            "WindowedAggregation" | "SliceCreation" | "WindowComputation" => {
                self.lower_aggregation(&cursor, &ops, consumer)
            }
            "Join" => self.lower_join(&cursor, &ops, consumer),
            other => Err(StreamError::UnsupportedQuery(format!(
                "cannot lower operator kind {other}"
            ))),
        }
    }

    fn lower_source(
        &mut self,
        source_op: &LogicalOperator,
        ops: &[LogicalOperator],
        consumer: Consumer,
    ) -> Result<()> {
        let source = source_op.get::<SourceOperator>()?;
        let mut descriptor = source.descriptor().cloned().ok_or_else(|| {
            StreamError::UnsupportedQuery(format!(
                "source {} is not bound to a physical source",
                source.logical_source_name()
            ))
        })?;
        let scan_schema = output_schema_of(source_op)?;
        // The plugin must produce buffers in the layout the scan reads.
        descriptor.logical_source.schema = scan_schema.clone();
        let chain = self.build_chain(ops, &scan_schema)?;
        let scan = Box::new(ScanOperator::new(scan_schema, chain));
        let pipeline = self.make_pipeline(scan, vec![], &consumer);

        let origin = self.origins[&source_op.id()];
        self.source_specs.push(SourceSpec {
            descriptor,
            origin,
            target: pipeline,
        });
        Ok(())
    }

    fn lower_union(
        &mut self,
        union_op: &LogicalOperator,
        ops: &[LogicalOperator],
        consumer: Consumer,
    ) -> Result<()> {
        let target = if ops.is_empty() {
            consumer
        } else {
            let union_schema = output_schema_of(union_op)?;
            let chain = self.build_chain(ops, &union_schema)?;
            let scan = Box::new(ScanOperator::new(union_schema, chain));
            Consumer::Pipeline(self.make_pipeline(scan, vec![], &consumer))
        };
        for child in union_op.children() {
            self.descend(&child, target.clone())?;
        }
        Ok(())
    }

    fn lower_aggregation(
        &mut self,
        agg_op: &LogicalOperator,
        ops: &[LogicalOperator],
        consumer: Consumer,
    ) -> Result<()> {
        let (window, keys, aggregations, branches) = aggregation_parts(agg_op)?;
        let input_schema = output_schema_of(&branches[0])?;
        let output_schema = output_schema_of(agg_op)?;

        let key_indices = keys
            .iter()
            .map(|key| input_schema.field_index(key).map_err(Into::into))
            .collect::<Result<Vec<_>>>()?;
        let compiled_aggregations = aggregations
            .iter()
            .map(|descriptor| CompiledAggregation::build(descriptor, &input_schema))
            .collect::<Result<Vec<_>>>()?;

        let handler = Arc::new(WindowAggregationHandler::new(
            window.window,
            key_indices,
            compiled_aggregations,
            self.origins_under(agg_op),
            self.num_worker_threads,
            OriginId::generate(),
        ));

        let chain = self.build_chain(ops, &output_schema)?;
        let probe_scan = Box::new(WindowEmitScan::new(Arc::clone(&handler), chain));
        let probe = self.make_pipeline(
            probe_scan,
            vec![Arc::clone(&handler) as Arc<dyn OperatorHandler>],
            &consumer,
        );

        for branch in &branches {
            let branch_schema = output_schema_of(branch)?;
            let time = TimeFunction::build(&window.time, &branch_schema)?;
            let build: Arc<dyn ExecutableOperator> = Arc::new(AggregationBuildOperator::new(
                0,
                time,
                Arc::clone(&handler),
            ));
            let scan = Box::new(ScanOperator::new(branch_schema, build));
            let build_pipeline = self.make_pipeline(
                scan,
                vec![Arc::clone(&handler) as Arc<dyn OperatorHandler>],
                &Consumer::Pipeline(Arc::clone(&probe)),
            );
            self.descend(branch, Consumer::Pipeline(build_pipeline))?;
        }
        Ok(())
    }

    fn lower_join(
        &mut self,
        join_op: &LogicalOperator,
        ops: &[LogicalOperator],
        consumer: Consumer,
    ) -> Result<()> {
        let join = join_op.get::<JoinOperator>()?;
        if matches!(join.window().window, WindowType::Sliding { .. }) {
            return Err(StreamError::UnsupportedQuery(
                "stream joins support tumbling windows".to_owned(),
            ));
        }
        let children = join_op.children();
        let left_schema = output_schema_of(&children[0])?;
        let right_schema = output_schema_of(&children[1])?;
        let combined_schema = output_schema_of(join_op)?;

        let condition = CompiledExpression::build(join.condition(), &combined_schema)?;
        let key = extract_equi_key(join.condition(), &combined_schema, left_schema.len())?;
        if join.strategy() == JoinStrategy::Hash && key.is_none() {
            return Err(StreamError::UnsupportedQuery(
                "hash join requires an equi-join condition over both sides".to_owned(),
            ));
        }

        let handler = Arc::new(JoinHandler::new(
            join.strategy(),
            join.window().window,
            RowCodec::build(&left_schema)?,
            RowCodec::build(&right_schema)?,
            key,
            condition,
            self.origins_under(join_op),
            self.num_worker_threads,
            OriginId::generate(),
        )?);

        let chain = self.build_chain(ops, &combined_schema)?;
        let probe_scan = Box::new(JoinProbeScan::new(Arc::clone(&handler), chain));
        let probe = self.make_pipeline(
            probe_scan,
            vec![Arc::clone(&handler) as Arc<dyn OperatorHandler>],
            &consumer,
        );

        for (child, side) in children.iter().zip([JoinSide::Left, JoinSide::Right]) {
            let side_schema = output_schema_of(child)?;
            let time = TimeFunction::build(&join.window().time, &side_schema)?;
            let build: Arc<dyn ExecutableOperator> = Arc::new(JoinBuildOperator::new(
                0,
                side,
                time,
                Arc::clone(&handler),
            ));
            let scan = Box::new(ScanOperator::new(side_schema, build));
            let build_pipeline = self.make_pipeline(
                scan,
                vec![Arc::clone(&handler) as Arc<dyn OperatorHandler>],
                &Consumer::Pipeline(Arc::clone(&probe)),
            );
            self.descend(child, Consumer::Pipeline(build_pipeline))?;
        }
        Ok(())
    }
}

fn output_schema_of(op: &LogicalOperator) -> Result<Schema> {
    op.output_schema().ok_or_else(|| {
        StreamError::UnsupportedQuery(format!(
            "operator {} has no inferred output schema; run type inference first",
            op.kind()
        ))
    })
}

/// The window, keys, aggregations and input branches of an
/// aggregation-shaped operator. A window computation reaches through its
/// slice-creation children to the raw inputs.
fn aggregation_parts(
    op: &LogicalOperator,
) -> Result<(
    WindowSpec,
    Vec<String>,
    Vec<rill_plan::operator::AggregationDescriptor>,
    Vec<LogicalOperator>,
)> {
    use rill_plan::operator::{
        SliceCreationOperator, WindowComputationOperator, WindowedAggregationOperator,
    };

    if let Some(agg) = op.try_get::<WindowedAggregationOperator>() {
        return Ok((
            agg.window().clone(),
            agg.keys().to_vec(),
            agg.aggregations().to_vec(),
            op.children(),
        ));
    }
    if let Some(slice) = op.try_get::<SliceCreationOperator>() {
        return Ok((
            slice.window().clone(),
            slice.keys().to_vec(),
            slice.aggregations().to_vec(),
            op.children(),
        ));
    }
    if let Some(computation) = op.try_get::<WindowComputationOperator>() {
        let mut branches = vec![];
        for child in op.children() {
            if child.try_get::<SliceCreationOperator>().is_some() {
                branches.extend(child.children());
            } else {
                branches.push(child);
            }
        }
        return Ok((
            computation.window().clone(),
            computation.keys().to_vec(),
            computation.aggregations().to_vec(),
            branches,
        ));
    }
    Err(StreamError::UnsupportedQuery(format!(
        "operator {} is not an aggregation",
        op.kind()
    )))
}

/// Derives the equi-join key columns from a conjunctive equality condition
/// over the combined schema. Returns `None` when the condition has any
/// other shape or the key types differ between the sides.
fn extract_equi_key(
    condition: &Function,
    combined: &Schema,
    left_len: usize,
) -> Result<Option<JoinKey>> {
    use rill_plan::function::{
        ComparisonFunction, ComparisonOp, FieldAccessFunction, LogicalFunction, LogicalOp,
    };

    fn collect(
        function: &Function,
        combined: &Schema,
        left_len: usize,
        pairs: &mut Vec<(usize, usize)>,
    ) -> bool {
        if let Some(logical) = function.try_get::<LogicalFunction>() {
            if logical.op() == LogicalOp::And {
                return function
                    .children()
                    .iter()
                    .all(|child| collect(child, combined, left_len, pairs));
            }
            return false;
        }
        let Some(comparison) = function.try_get::<ComparisonFunction>() else {
            return false;
        };
        if comparison.op() != ComparisonOp::Equals {
            return false;
        }
        let children = function.children();
        let (Some(a), Some(b)) = (
            children[0].try_get::<FieldAccessFunction>(),
            children[1].try_get::<FieldAccessFunction>(),
        ) else {
            return false;
        };
        let (Ok(ia), Ok(ib)) = (
            combined.field_index(a.field_name()),
            combined.field_index(b.field_name()),
        ) else {
            return false;
        };
        match (ia < left_len, ib < left_len) {
            (true, false) => pairs.push((ia, ib - left_len)),
            (false, true) => pairs.push((ib, ia - left_len)),
            _ => return false,
        }
        true
    }

    let mut pairs = vec![];
    if !collect(condition, combined, left_len, &mut pairs) || pairs.is_empty() {
        return Ok(None);
    }

    let mut key_size = 0;
    for &(left_index, right_index) in &pairs {
        let left_type = combined.fields()[left_index].data_type;
        let right_type = combined.fields()[left_len + right_index].data_type;
        if left_type != right_type {
            return Ok(None);
        }
        key_size += left_type.size_in_bytes();
    }

    let (left_indices, right_indices) = pairs.into_iter().unzip();
    Ok(Some(JoinKey {
        left_indices,
        right_indices,
        key_size,
    }))
}
