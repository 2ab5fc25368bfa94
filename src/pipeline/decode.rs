// EPUB Liberator - ADEPT DRM removal for EPUB books
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Concurrent entry decoding
//!
//! # Concurrency Model
//! - Encrypted entries are queued up front on a bounded `mpsc` channel sized
//!   to their count, so queuing never waits
//! - `workers` tokio tasks share the queue receiver and run each decode on
//!   the blocking pool
//! - Plain entries are read on the blocking pool and handed to the sink by
//!   the calling task while the workers run
//! - Decrypted results flow back over a second `mpsc` channel to the sink, in
//!   completion order
//! - The first failure raises a shared `watch` flag. A worker raises it
//!   itself before reporting a failed decode; the coordinator raises it on a
//!   read or sink failure. Workers stop taking jobs, pass-through stops, and
//!   the coordinator drains and discards what is in flight

use crate::container::{ContainerIndex, EntryHeader};
use crate::crypto::EntryDecoder;
use crate::epub::EncryptionManifest;
use crate::error::{LiberatorError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How an entry's content was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Not listed in the manifest; content read as-is
    Plain,
    /// Decrypted and inflated
    Decrypted,
}

/// One entry ready to be written to the output container
#[derive(Debug, Clone)]
pub struct DecodeResult {
    /// Output header (method forced to deflate)
    pub header: EntryHeader,
    /// Original uncompressed content
    pub content: Vec<u8>,
    pub kind: EntryKind,
}

impl DecodeResult {
    pub fn name(&self) -> &str {
        &self.header.name
    }
}

#[derive(Debug)]
struct Job {
    name: String,
    kind: EntryKind,
}

/// Decodes every payload entry of a container
#[derive(Debug, Clone)]
pub struct DecodePipeline {
    workers: usize,
}

impl Default for DecodePipeline {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DecodePipeline {
    /// Create a pipeline with `workers` decode tasks (at least one)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Decode all payload entries and feed each result to `sink`
    ///
    /// Entries named by `manifest` are decrypted with `decoder`; the rest pass
    /// through. Results arrive in no particular order.
    ///
    /// # Returns
    /// Number of results delivered to `sink`
    ///
    /// # Errors
    /// The first decode, read or sink error. Nothing further reaches `sink`
    /// once an error has occurred.
    pub async fn run<F>(
        &self,
        index: Arc<ContainerIndex>,
        manifest: Arc<EncryptionManifest>,
        decoder: Arc<EntryDecoder>,
        mut sink: F,
    ) -> Result<usize>
    where
        F: FnMut(DecodeResult) -> Result<()>,
    {
        let names = index.payload_names();
        let total = names.len();
        if total == 0 {
            return Ok(0);
        }
        let (encrypted, plain): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| manifest.is_encrypted(name));

        let capacity = encrypted.len().max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>(capacity);
        for name in encrypted.iter().cloned() {
            job_tx
                .try_send(Job { name, kind: EntryKind::Decrypted })
                .map_err(|e| LiberatorError::internal(format!("job queue rejected entry: {}", e)))?;
        }
        drop(job_tx);

        let (result_tx, mut result_rx) = mpsc::channel::<Result<DecodeResult>>(capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let jobs = Arc::new(Mutex::new(job_rx));

        let worker_count = self.workers.min(encrypted.len());
        info!(
            entries = total,
            encrypted = encrypted.len(),
            workers = worker_count,
            "Decoding entries"
        );

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            let worker = Worker {
                id,
                jobs: Arc::clone(&jobs),
                results: result_tx.clone(),
                cancel: cancel_rx.clone(),
                abort: Arc::clone(&cancel_tx),
                index: Arc::clone(&index),
                decoder: Arc::clone(&decoder),
            };
            workers.spawn(worker.run());
        }
        drop(result_tx);

        let mut failure: Option<LiberatorError> = None;
        let mut delivered = 0usize;

        // Plain entries pass through while the workers decrypt
        for name in plain {
            if *cancel_rx.borrow() {
                debug!("Pass-through stopped after a decode failure");
                break;
            }
            let job = Job { name, kind: EntryKind::Plain };
            match read_plain(&index, &decoder, job).await.and_then(|result| sink(result)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(error = %e, "Pass-through failed, cancelling remaining entries");
                    cancel_tx.send_replace(true);
                    failure = Some(e);
                    break;
                }
            }
        }

        while let Some(outcome) = result_rx.recv().await {
            if failure.is_some() {
                continue;
            }
            match outcome.and_then(|result| sink(result)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(error = %e, "Decode failed, cancelling remaining entries");
                    cancel_tx.send_replace(true);
                    failure = Some(e);
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(_)) | Ok(Err(LiberatorError::Cancelled)) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(LiberatorError::internal(format!("decode worker panicked: {}", e)));
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if delivered != total {
            return Err(LiberatorError::internal(format!(
                "only {} of {} entries were decoded",
                delivered, total
            )));
        }

        debug!(entries = delivered, "All entries decoded");
        Ok(delivered)
    }

    /// Decode all payload entries into a vector
    pub async fn collect(
        &self,
        index: Arc<ContainerIndex>,
        manifest: Arc<EncryptionManifest>,
        decoder: Arc<EntryDecoder>,
    ) -> Result<Vec<DecodeResult>> {
        let mut results = Vec::with_capacity(index.len());
        self.run(index, manifest, decoder, |result| {
            results.push(result);
            Ok(())
        })
        .await?;
        Ok(results)
    }
}

struct Worker {
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<Result<DecodeResult>>,
    cancel: watch::Receiver<bool>,
    abort: Arc<watch::Sender<bool>>,
    index: Arc<ContainerIndex>,
    decoder: Arc<EntryDecoder>,
}

impl Worker {
    /// Take jobs until the queue is empty, a job fails, or work is cancelled
    async fn run(mut self) -> Result<usize> {
        let mut handled = 0usize;

        loop {
            if *self.cancel.borrow() {
                return Err(LiberatorError::Cancelled);
            }

            let job = {
                let mut jobs = self.jobs.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.changed() => return Err(LiberatorError::Cancelled),
                    job = jobs.recv() => job,
                }
            };
            let Some(job) = job else {
                return Ok(handled);
            };

            let name = job.name.clone();
            let index = Arc::clone(&self.index);
            let decoder = Arc::clone(&self.decoder);
            let outcome = tokio::task::spawn_blocking(move || decode_job(&index, &decoder, job))
                .await
                .unwrap_or_else(|e| Err(LiberatorError::internal(format!("decoding '{}' panicked: {}", name, e))));

            let failed = outcome.is_err();
            debug!(worker = self.id, entry = %name, failed, "Entry processed");
            if failed {
                self.abort.send_replace(true);
            }

            if self.results.send(outcome).await.is_err() {
                return Err(LiberatorError::Cancelled);
            }
            handled += 1;
            if failed {
                return Ok(handled);
            }
        }
    }
}

/// Read a pass-through entry on the blocking pool
async fn read_plain(index: &Arc<ContainerIndex>, decoder: &Arc<EntryDecoder>, job: Job) -> Result<DecodeResult> {
    let name = job.name.clone();
    let index = Arc::clone(index);
    let decoder = Arc::clone(decoder);
    tokio::task::spawn_blocking(move || decode_job(&index, &decoder, job))
        .await
        .unwrap_or_else(|e| Err(LiberatorError::internal(format!("reading '{}' panicked: {}", name, e))))
}

fn decode_job(index: &ContainerIndex, decoder: &EntryDecoder, job: Job) -> Result<DecodeResult> {
    let entry = index
        .get(&job.name)
        .ok_or_else(|| LiberatorError::internal(format!("entry '{}' is not in the index", job.name)))?;
    let stored = index.read(entry)?;

    let content = match job.kind {
        EntryKind::Plain => stored,
        EntryKind::Decrypted => decoder.decode(&job.name, &stored)?,
    };

    Ok(DecodeResult {
        header: entry.header.as_deflated(),
        content,
        kind: job.kind,
    })
}
