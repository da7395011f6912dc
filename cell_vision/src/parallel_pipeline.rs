// THEORY:
// Once regions are selected, annotating frame `i` has nothing to do with frame
// `j`, so rendering can fan out across a pool of workers. The output, however, is
// an ordered stream: frames must reach the sink in exactly the order they were
// decoded. The `ParallelPipeline` therefore splits the work into three roles:
//
// 1.  **Producer**: decodes frames, validates them against the pipeline, and
//     dispatches them round-robin to the workers.
// 2.  **Workers**: each owns a task queue and a handle to the shared, immutable
//     `Annotator`; finished frames go back over one shared result channel, in
//     whatever order they complete.
// 3.  **Reorder Buffer**: holds finished frames until the next expected index is
//     available, then releases the longest ready run to the sink.
//
// At most `max_in_flight` frames exist between decode and write, which bounds
// memory regardless of how far ahead the fastest worker gets.

use crate::core_modules::annotator::Annotator;
use crate::core_modules::frame_io::{FrameSink, FrameSource};
use crate::error::{AnalysisError, Result};
use crate::pipeline::{AnomalyPipeline, RunSummary};
use image::RgbImage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct FrameTask {
    pub index: usize,
    pub frame: RgbImage,
}

type FrameResult = (usize, RgbImage);

pub struct WorkerPool {
    task_senders: Vec<mpsc::UnboundedSender<FrameTask>>,
    workers: Vec<JoinHandle<()>>,
    next_worker: usize,
}

impl WorkerPool {
    pub fn new(
        annotator: Arc<Annotator>,
        worker_count: usize,
        result_sender: mpsc::UnboundedSender<FrameResult>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let mut task_senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameTask>();
            let annotator = Arc::clone(&annotator);
            let result_sender = result_sender.clone();

            let worker = tokio::spawn(async move {
                while let Some(task) = task_receiver.recv().await {
                    let annotated = annotator.annotate(task.index, task.frame);
                    if result_sender.send((task.index, annotated)).is_err() {
                        break;
                    }
                }
                debug!(worker_id, "annotation worker stopped");
            });

            task_senders.push(task_sender);
            workers.push(worker);
        }

        Self {
            task_senders,
            workers,
            next_worker: 0,
        }
    }

    pub fn dispatch(&mut self, task: FrameTask) -> Result<()> {
        let index = task.index;
        self.task_senders[self.next_worker]
            .send(task)
            .map_err(|_| AnalysisError::Worker(format!("worker dropped frame {index}")))?;
        self.next_worker = (self.next_worker + 1) % self.task_senders.len();
        Ok(())
    }

    /// Closes every queue and waits for the workers to drain.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.task_senders);
        for joined in futures::future::join_all(self.workers).await {
            joined.map_err(|e| AnalysisError::Worker(e.to_string()))?;
        }
        Ok(())
    }
}

/// Holds out-of-order frames until they can be released in index order.
#[derive(Default)]
pub struct ReorderBuffer {
    pending: HashMap<usize, RgbImage>,
    next_expected: usize,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, frame: RgbImage) {
        self.pending.insert(index, frame);
    }

    /// The next frame in sequence, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(usize, RgbImage)> {
        let index = self.next_expected;
        let frame = self.pending.remove(&index)?;
        self.next_expected += 1;
        Some((index, frame))
    }

    pub fn next_expected(&self) -> usize {
        self.next_expected
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Runs an `AnomalyPipeline`'s annotation across a tokio worker pool.
pub struct ParallelPipeline {
    pipeline: AnomalyPipeline,
}

impl ParallelPipeline {
    pub fn new(pipeline: AnomalyPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &AnomalyPipeline {
        &self.pipeline
    }

    pub async fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        self.run_with_progress(source, sink, |_| {}).await
    }

    pub async fn run_with_progress<S, K, F>(&self, source: &mut S, sink: &mut K, mut on_frame: F) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(usize),
    {
        self.pipeline.check_video(&source.metadata())?;

        let config = self.pipeline.config();
        let (result_sender, mut result_receiver) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(self.pipeline.annotator(), config.worker_count, result_sender);

        let streamed = self
            .stream(source, sink, &mut pool, &mut result_receiver, &mut on_frame)
            .await;
        drop(result_receiver);
        pool.shutdown().await?;
        let frames = streamed?;

        self.pipeline.check_complete(frames)?;
        let output = sink.finish()?;
        info!(
            frames,
            workers = config.worker_count,
            output = %output.display(),
            "parallel annotation complete"
        );
        Ok(RunSummary { frames, output })
    }

    async fn stream<S, K, F>(
        &self,
        source: &mut S,
        sink: &mut K,
        pool: &mut WorkerPool,
        results: &mut mpsc::UnboundedReceiver<FrameResult>,
        on_frame: &mut F,
    ) -> Result<usize>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(usize),
    {
        let max_in_flight = self.pipeline.config().max_in_flight.max(1);
        let mut reorder = ReorderBuffer::new();
        let mut dispatched = 0;

        while let Some(frame) = source.next_frame()? {
            self.pipeline.check_frame(dispatched, &frame)?;
            pool.dispatch(FrameTask {
                index: dispatched,
                frame,
            })?;
            dispatched += 1;

            while dispatched - reorder.next_expected() >= max_in_flight {
                Self::collect(results, &mut reorder).await?;
                Self::release(&mut reorder, sink, on_frame)?;
            }
        }

        while reorder.next_expected() < dispatched {
            Self::collect(results, &mut reorder).await?;
            Self::release(&mut reorder, sink, on_frame)?;
        }
        Ok(dispatched)
    }

    async fn collect(results: &mut mpsc::UnboundedReceiver<FrameResult>, reorder: &mut ReorderBuffer) -> Result<()> {
        let (index, frame) = results
            .recv()
            .await
            .ok_or_else(|| AnalysisError::Worker("all annotation workers stopped".to_string()))?;
        reorder.insert(index, frame);
        Ok(())
    }

    fn release<K, F>(reorder: &mut ReorderBuffer, sink: &mut K, on_frame: &mut F) -> Result<()>
    where
        K: FrameSink + ?Sized,
        F: FnMut(usize),
    {
        while let Some((index, frame)) = reorder.pop_ready() {
            sink.write_frame(&frame)?;
            on_frame(index);
        }
        Ok(())
    }
}
