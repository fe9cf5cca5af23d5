//! Scripted in-memory server for engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use chunklift_protocol::{CheckExistingRequest, CheckExistingResponse, ChunkHeader, MergeRequest};
use tokio::sync::Semaphore;

use crate::error::ServerError;
use crate::server::{ChunkUpload, DirectUpload, ServerFuture, UploadServer};

#[derive(Default)]
struct Flight {
    current: usize,
    max: usize,
}

/// Records every call and fails on demand.
///
/// When gated, each chunk upload blocks until [`MockServer::release`] hands
/// it a permit.
pub(crate) struct MockServer {
    gate: Option<Semaphore>,
    check_response: Mutex<CheckExistingResponse>,
    check_error: Mutex<Option<String>>,
    chunk_failures: AtomicU32,
    merge_failures: AtomicU32,
    direct_failures: AtomicU32,
    checks: Mutex<Vec<CheckExistingRequest>>,
    chunks: Mutex<Vec<(ChunkHeader, Vec<u8>)>>,
    chunk_attempts: AtomicUsize,
    merges: Mutex<Vec<MergeRequest>>,
    merge_attempts: AtomicUsize,
    directs: Mutex<Vec<DirectUpload>>,
    flights: Mutex<HashMap<String, Flight>>,
    cancelled: AtomicUsize,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            gate: None,
            check_response: Mutex::new(CheckExistingResponse::upload_all()),
            check_error: Mutex::new(None),
            chunk_failures: AtomicU32::new(0),
            merge_failures: AtomicU32::new(0),
            direct_failures: AtomicU32::new(0),
            checks: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
            chunk_attempts: AtomicUsize::new(0),
            merges: Mutex::new(Vec::new()),
            merge_attempts: AtomicUsize::new(0),
            directs: Mutex::new(Vec::new()),
            flights: Mutex::new(HashMap::new()),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Lets `n` gated chunk uploads through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn set_check_response(&self, resp: CheckExistingResponse) {
        *self.check_response.lock().unwrap() = resp;
    }

    pub fn set_check_error(&self, message: &str) {
        *self.check_error.lock().unwrap() = Some(message.to_string());
    }

    /// Fails the next `n` chunk uploads.
    pub fn fail_chunks(&self, n: u32) {
        self.chunk_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_merges(&self, n: u32) {
        self.merge_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_directs(&self, n: u32) {
        self.direct_failures.store(n, Ordering::SeqCst);
    }

    pub fn check_calls(&self) -> usize {
        self.checks.lock().unwrap().len()
    }

    /// Successful chunk uploads, in arrival order.
    pub fn chunk_uploads(&self) -> Vec<(ChunkHeader, Vec<u8>)> {
        self.chunks.lock().unwrap().clone()
    }

    /// Chunk uploads that reached the server, failed ones included.
    pub fn chunk_attempts(&self) -> usize {
        self.chunk_attempts.load(Ordering::SeqCst)
    }

    pub fn merges(&self) -> Vec<MergeRequest> {
        self.merges.lock().unwrap().clone()
    }

    pub fn merge_attempts(&self) -> usize {
        self.merge_attempts.load(Ordering::SeqCst)
    }

    pub fn direct_uploads(&self) -> Vec<DirectUpload> {
        self.directs.lock().unwrap().clone()
    }

    /// Chunk uploads dropped before they completed.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self, fingerprint: &str) -> usize {
        self.flights
            .lock()
            .unwrap()
            .get(fingerprint)
            .map_or(0, |f| f.current)
    }

    pub fn max_in_flight(&self, fingerprint: &str) -> usize {
        self.flights
            .lock()
            .unwrap()
            .get(fingerprint)
            .map_or(0, |f| f.max)
    }

    pub fn total_in_flight(&self) -> usize {
        self.flights.lock().unwrap().values().map(|f| f.current).sum()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Tracks one chunk upload; counts a cancellation if dropped unfinished.
struct FlightGuard<'a> {
    server: &'a MockServer,
    fingerprint: String,
    done: bool,
}

impl<'a> FlightGuard<'a> {
    fn enter(server: &'a MockServer, fingerprint: &str) -> Self {
        let mut flights = server.flights.lock().unwrap();
        let flight = flights.entry(fingerprint.to_string()).or_default();
        flight.current += 1;
        flight.max = flight.max.max(flight.current);
        Self {
            server,
            fingerprint: fingerprint.to_string(),
            done: false,
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(flight) = self.server.flights.lock().unwrap().get_mut(&self.fingerprint) {
            flight.current -= 1;
        }
        if !self.done {
            self.server.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl UploadServer for MockServer {
    fn check_existing(
        &self,
        req: CheckExistingRequest,
    ) -> ServerFuture<'_, CheckExistingResponse> {
        Box::pin(async move {
            self.checks.lock().unwrap().push(req);
            if let Some(message) = self.check_error.lock().unwrap().clone() {
                return Err(ServerError::Rejected(message));
            }
            Ok(self.check_response.lock().unwrap().clone())
        })
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> ServerFuture<'_, ()> {
        Box::pin(async move {
            let mut guard = FlightGuard::enter(self, &chunk.header.fingerprint);
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|_| ServerError::Rejected("gate closed".into()))?
                    .forget();
            }
            guard.done = true;
            self.chunk_attempts.fetch_add(1, Ordering::SeqCst);
            if take_one(&self.chunk_failures) {
                return Err(ServerError::Status {
                    status: 503,
                    message: "injected chunk failure".into(),
                });
            }
            self.chunks
                .lock()
                .unwrap()
                .push((chunk.header, chunk.payload));
            Ok(())
        })
    }

    fn merge_chunks(&self, req: MergeRequest) -> ServerFuture<'_, ()> {
        Box::pin(async move {
            self.merge_attempts.fetch_add(1, Ordering::SeqCst);
            if take_one(&self.merge_failures) {
                return Err(ServerError::Status {
                    status: 500,
                    message: "injected merge failure".into(),
                });
            }
            self.merges.lock().unwrap().push(req);
            Ok(())
        })
    }

    fn upload_direct(&self, upload: DirectUpload) -> ServerFuture<'_, ()> {
        Box::pin(async move {
            if take_one(&self.direct_failures) {
                return Err(ServerError::Status {
                    status: 500,
                    message: "injected direct failure".into(),
                });
            }
            self.directs.lock().unwrap().push(upload);
            Ok(())
        })
    }
}
