//! Streaming execution of a block plan.
//!
//! The reducer walks the plan's ranges through a read-reduce-write pipeline against a pair of
//! array stores. Blocks are independent: each output block is a pure function of its own input
//! rows, so the plan's block size never affects the result, only the memory footprint, and
//! blocks may be processed concurrently over disjoint ranges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array2, Zip};
use tokio::task::JoinSet;
use tracing::{event, Level};

use crate::error::ReductionError;
use crate::models::{MissingPolicy, ReduceRequest, ReduceSummary, ReductionKind};
use crate::operation::{BlockReduction, Element};
use crate::operations;
use crate::planner::{BlockPlan, BlockRange};
use crate::resource_manager::ResourceManager;
use crate::store::{ArraySink, ArraySource};

/// Cooperative cancellation handle.
///
/// Cancellation is honoured at block boundaries: a block already in flight runs to completion
/// or to I/O failure first. Already-written output blocks are not rolled back; a cancelled
/// run's output store must be treated as invalid in its entirety.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Return a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Reducer configuration.
#[derive(Clone, Debug)]
pub struct ReducerConfig {
    /// Maximum number of blocks processed concurrently.
    pub workers: usize,
    /// Whether to offload the CPU-bound fold to the rayon pool.
    pub use_rayon: bool,
    /// Cancellation handle for runs executed with this configuration.
    pub cancel: CancelToken,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        ReducerConfig {
            workers: 1,
            use_rayon: false,
            cancel: CancelToken::new(),
        }
    }
}

impl ReducerConfig {
    /// Configuration processing blocks concurrently on all available cores.
    pub fn parallel() -> Self {
        ReducerConfig {
            workers: num_cpus::get().max(1),
            ..Default::default()
        }
    }
}

/// A [ReduceRequest] converted to a concrete element type.
#[derive(Clone, Debug)]
struct TypedRequest<T> {
    kind: ReductionKind,
    missing: Option<MissingPolicy<T>>,
    fill: Option<T>,
}

impl<T: Element> TypedRequest<T> {
    fn try_new(request: &ReduceRequest) -> Result<Self, ReductionError> {
        let missing = request
            .missing
            .as_ref()
            .map(|policy| policy.resolve::<T>())
            .transpose()?;
        let fill = request.fill.as_ref().map(T::from_request_value).transpose()?;
        Ok(TypedRequest {
            kind: request.kind,
            missing,
            fill,
        })
    }
}

/// Overwrite all-missing cells with the fill value.
///
/// Returns the filled output block and the number of cells that received the fill value.
fn apply_fill<T: Element>(
    reduction: BlockReduction<T>,
    fill: Option<T>,
) -> Result<(Array2<T>, u64), ReductionError> {
    let BlockReduction { mut values, counts } = reduction;
    let mut filled = 0_u64;
    match fill {
        Some(fill) => {
            Zip::from(&mut values).and(&counts).for_each(|value, &count| {
                if count == 0 {
                    *value = fill;
                    filled += 1;
                }
            });
        }
        None => {
            if counts.iter().any(|&count| count == 0) {
                return Err(ReductionError::FillValueRequired);
            }
        }
    }
    Ok((values, filled))
}

/// Run one block through the read-reduce-write pipeline.
async fn process_block<T, S, K>(
    source: &S,
    sink: &K,
    range: BlockRange,
    request: &TypedRequest<T>,
    use_rayon: bool,
) -> Result<u64, ReductionError>
where
    T: Element,
    S: ArraySource<T> + ?Sized,
    K: ArraySink<T> + ?Sized,
{
    let block = source
        .read_rows(range)
        .await
        .map_err(|source| ReductionError::StoreRead {
            start_row: range.start_row,
            row_count: range.row_count,
            source,
        })?;
    let reduction = if use_rayon {
        let kind = request.kind;
        let missing = request.missing.clone();
        tokio_rayon::spawn(move || operations::reduce_block(kind, block.view(), missing.as_ref()))
            .await?
    } else {
        operations::reduce_block(request.kind, block.view(), request.missing.as_ref())?
    };
    let (values, filled) = apply_fill(reduction, request.fill)?;
    sink.write_rows(range.start_row, values)
        .await
        .map_err(|source| ReductionError::StoreWrite {
            start_row: range.start_row,
            row_count: range.row_count,
            source,
        })?;
    Ok(filled)
}

/// Streaming reducer.
#[derive(Clone, Debug, Default)]
pub struct Reducer {
    config: ReducerConfig,
}

impl Reducer {
    /// Return a new Reducer with the given configuration.
    pub fn new(config: ReducerConfig) -> Self {
        Reducer { config }
    }

    /// Execute a block plan against a pair of stores.
    ///
    /// On success the sink holds the complete reduced output and a [ReduceSummary] is
    /// returned. On failure the sink's contents are undefined and must be discarded; no
    /// partial-output cleanup is performed and failed I/O is never retried.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(kind = %request.kind, blocks = plan.len()))]
    pub async fn reduce<T, S, K>(
        &self,
        source: Arc<S>,
        sink: Arc<K>,
        plan: &BlockPlan,
        request: &ReduceRequest,
    ) -> Result<ReduceSummary, ReductionError>
    where
        T: Element,
        S: ArraySource<T> + 'static,
        K: ArraySink<T> + 'static,
    {
        let descriptor = source.descriptor().validated()?;
        request.validate_for(descriptor.dtype)?;
        if plan.rows() != descriptor.rows {
            return Err(ReductionError::PlanMismatch {
                plan_rows: plan.rows(),
                array_rows: descriptor.rows,
            });
        }
        let typed = TypedRequest::<T>::try_new(request)?;

        // The degenerate single-row fallback already runs over budget per block, so
        // multiplying the footprint across workers is not an option.
        let sequential = self.config.workers <= 1 || plan.len() == 1 || plan.budget_exceeded();
        let summary = if sequential {
            if self.config.workers > 1 && plan.budget_exceeded() {
                event!(
                    Level::WARN,
                    "plan exceeds budget at single-row granularity; processing sequentially"
                );
            }
            self.reduce_sequential(source.as_ref(), sink.as_ref(), plan, &typed)
                .await?
        } else {
            self.reduce_parallel(source, sink, plan, typed).await?
        };
        event!(
            Level::DEBUG,
            blocks = summary.blocks,
            rows = summary.rows,
            filled = summary.filled,
            "reduction complete"
        );
        Ok(summary)
    }

    /// Process the plan's blocks one at a time, in order.
    async fn reduce_sequential<T, S, K>(
        &self,
        source: &S,
        sink: &K,
        plan: &BlockPlan,
        request: &TypedRequest<T>,
    ) -> Result<ReduceSummary, ReductionError>
    where
        T: Element,
        S: ArraySource<T> + ?Sized,
        K: ArraySink<T> + ?Sized,
    {
        let mut summary = ReduceSummary::default();
        for range in plan.iter() {
            if self.config.cancel.is_cancelled() {
                return Err(ReductionError::Cancelled);
            }
            let filled =
                process_block(source, sink, range, request, self.config.use_rayon).await?;
            summary.blocks += 1;
            summary.rows += range.row_count;
            summary.filled += filled;
        }
        Ok(summary)
    }

    /// Process the plan's blocks concurrently over disjoint ranges.
    ///
    /// The concurrent footprint is `workers * block_bytes`, a multiplicative extension of the
    /// planner's per-block contract, so the worker count is clamped to keep it within the
    /// plan's budget and a byte-granular semaphore enforces the ceiling at runtime.
    async fn reduce_parallel<T, S, K>(
        &self,
        source: Arc<S>,
        sink: Arc<K>,
        plan: &BlockPlan,
        request: TypedRequest<T>,
    ) -> Result<ReduceSummary, ReductionError>
    where
        T: Element,
        S: ArraySource<T> + 'static,
        K: ArraySink<T> + 'static,
    {
        let block_bytes = plan.block_bytes();
        let budget = usize::try_from(plan.budget()).unwrap_or(usize::MAX);
        let max_workers = if block_bytes > 0 {
            (budget / block_bytes).max(1)
        } else {
            self.config.workers
        };
        let workers = self.config.workers.min(max_workers);
        if workers < self.config.workers {
            event!(
                Level::WARN,
                "clamping workers from {} to {} to keep the concurrent footprint within budget",
                self.config.workers,
                workers,
            );
        }
        let memory_pool = workers
            .saturating_mul(block_bytes)
            .min(budget)
            .min(tokio::sync::Semaphore::MAX_PERMITS);
        let resources = Arc::new(ResourceManager::new(Some(memory_pool), Some(workers)));

        // Errors do not cancel the caller's token; an internal token stops the dispatch of
        // blocks that have not started yet.
        let run_cancel = CancelToken::new();
        let mut join_set = JoinSet::new();
        for range in plan.iter() {
            let source = Arc::clone(&source);
            let sink = Arc::clone(&sink);
            let resources = Arc::clone(&resources);
            let cancel = self.config.cancel.clone();
            let run_cancel = run_cancel.clone();
            let request = request.clone();
            let use_rayon = self.config.use_rayon;
            join_set.spawn(async move {
                if cancel.is_cancelled() || run_cancel.is_cancelled() {
                    return Err(ReductionError::Cancelled);
                }
                let _task = resources.task().await?;
                let _memory = resources.memory(block_bytes).await?;
                if cancel.is_cancelled() || run_cancel.is_cancelled() {
                    return Err(ReductionError::Cancelled);
                }
                process_block(source.as_ref(), sink.as_ref(), range, &request, use_rayon)
                    .await
                    .map(|filled| (range, filled))
            });
        }

        let mut summary = ReduceSummary::default();
        let mut failure: Option<ReductionError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined.map_err(ReductionError::Join).and_then(|result| result) {
                Ok((range, filled)) => {
                    summary.blocks += 1;
                    summary.rows += range.row_count;
                    summary.filled += filled;
                }
                Err(err) => {
                    run_cancel.cancel();
                    let real_failure = !matches!(err, ReductionError::Cancelled);
                    match &failure {
                        None => failure = Some(err),
                        // Prefer the originating failure over follow-on cancellations.
                        Some(ReductionError::Cancelled) if real_failure => failure = Some(err),
                        Some(_) => (),
                    }
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None if self.config.cancel.is_cancelled() => Err(ReductionError::Cancelled),
            None => Ok(summary),
        }
    }
}
