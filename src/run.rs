//! The agent loop.
//!
//! Reads one JSON request per line, hands it to the [`Engine`] and
//! forwards the responses to a writer task through a bounded queue.
//! When the queue is full the reader waits, so a slow host applies
//! back-pressure all the way to its own input.
//!
//! [`run_agent()`] is the root of all the action here.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::errors::{AggError, Result};
use crate::protocol::{InitResponse, Request, Response};
use crate::recovery::CheckpointStore;

#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    /// Responses buffered before the reader waits on the writer.
    pub queue_capacity: usize,
    /// Points between durable checkpoints. Zero writes checkpoints
    /// only when the host asks for a snapshot.
    pub checkpoint_every: u64,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            checkpoint_every: 0,
        }
    }
}

struct Agent {
    engine: Engine,
    tx: mpsc::Sender<Response>,
    checkpoints: Option<CheckpointStore>,
    checkpoint_every: u64,
    since_checkpoint: u64,
    resumed: bool,
}

impl Agent {
    async fn send(&self, response: Response) -> Result<()> {
        self.tx
            .send(response)
            .await
            .map_err(|_| AggError::Emission("output closed".to_owned()))
    }

    async fn step(&mut self, line: &str) -> Result<()> {
        let request = match serde_json::from_str::<Request>(line) {
            Ok(request) => request,
            Err(err) => {
                let response = self.engine.reject("unparsed", AggError::Protocol(err));
                return self.send(response).await;
            }
        };
        tracing::trace!(request = request.label(), "received");

        let is_init = matches!(request, Request::Init(_));
        let is_snapshot = matches!(request, Request::Snapshot);
        let is_point = matches!(request, Request::Point(_));

        let responses = self.engine.handle(request);
        let init_ok = is_init
            && matches!(
                responses.first(),
                Some(Response::Init(InitResponse { success: true, .. }))
            );
        let rejected = responses
            .iter()
            .any(|response| matches!(response, Response::Error(_)));
        for response in responses {
            self.send(response).await?;
        }

        if init_ok && !self.resumed {
            self.resume();
        } else if is_snapshot {
            self.checkpoint();
        } else if is_point && !rejected {
            self.since_checkpoint += 1;
            if self.checkpoint_every > 0 && self.since_checkpoint >= self.checkpoint_every {
                self.checkpoint();
            }
        }
        Ok(())
    }

    /// Load the newest durable checkpoint for this mode, if any.
    ///
    /// Only the first successful init resumes; a later init starts the
    /// engine empty like it does without a checkpoint store.
    fn resume(&mut self) {
        self.resumed = true;
        let Some(store) = self.checkpoints.as_ref() else {
            return;
        };
        self.since_checkpoint = 0;
        match store.latest(self.engine.mode()) {
            Ok(Some(snapshot)) => match self.engine.try_restore(&snapshot.0) {
                Ok(groups) => tracing::info!(groups, "resumed from durable checkpoint"),
                Err(err) => tracing::error!("ignoring unusable durable checkpoint: {err}"),
            },
            Ok(None) => tracing::info!("no durable checkpoint; starting empty"),
            Err(err) => tracing::error!("can't read durable checkpoint: {err}"),
        }
    }

    // Checkpoint failures are logged and never stop the loop.
    fn checkpoint(&mut self) {
        let Some(store) = self.checkpoints.as_mut() else {
            return;
        };
        if !self.engine.is_initialized() {
            return;
        }
        self.since_checkpoint = 0;
        let mode = self.engine.mode();
        match self
            .engine
            .snapshot()
            .and_then(|snapshot| store.write(mode, &snapshot))
        {
            Ok(seq) => tracing::debug!(seq, "durable checkpoint written"),
            Err(err) => tracing::error!("durable checkpoint failed: {err}"),
        }
    }

    async fn run<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.step(&line).await?;
        }
        tracing::info!(
            groups = self.engine.group_count(),
            "input closed; stopping without flushing"
        );
        Ok(())
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<Response>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let sink_failed = |err: std::io::Error| AggError::Emission(format!("output failed: {err}"));
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        writer.write_all(&line).await.map_err(sink_failed)?;
        writer.flush().await.map_err(sink_failed)?;
    }
    Ok(())
}

/// Serve the agent protocol until `reader` is exhausted.
///
/// Only failures to deliver output or read input are returned; every
/// per-request problem is answered with an error response instead.
pub async fn run_agent<R, W>(
    engine: Engine,
    reader: R,
    writer: W,
    checkpoints: Option<CheckpointStore>,
    options: AgentOptions,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut agent = Agent {
        engine,
        tx,
        checkpoints,
        checkpoint_every: options.checkpoint_every,
        since_checkpoint: 0,
        resumed: false,
    };
    let outcome = agent.run(reader).await;
    // Closing the queue lets the writer drain and finish.
    drop(agent);

    let written = writer_task
        .await
        .map_err(|err| AggError::Emission(format!("writer task failed: {err}")))?;
    match outcome {
        // The writer's own error says why the output closed.
        Err(AggError::Emission(_)) => written.and(outcome),
        _ => outcome.and(written),
    }
}
