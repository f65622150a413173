//! The disk I/O engine.
//!
//! A single dedicated worker thread performs every seek, read and write.
//! Any number of tasks queue operations on two lock-free queues and await
//! the result on a one-shot channel. Funnelling all transfers through one
//! thread means two operations never race on the seek position of a shared
//! file handle, and blocking file I/O never runs on the async runtime.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::error::StorageError;
use super::file::FileHandle;
use crate::stats::TransferMonitor;

/// Completion of a queued read.
pub type ReadCompletion = oneshot::Receiver<Result<Bytes, StorageError>>;

/// Completion of a queued write; resolves to the number of bytes written.
pub type WriteCompletion = oneshot::Receiver<Result<usize, StorageError>>;

struct ReadOp {
    handle: Arc<FileHandle>,
    file_offset: u64,
    length: usize,
    reply: oneshot::Sender<Result<Bytes, StorageError>>,
}

struct WriteOp {
    handle: Arc<FileHandle>,
    file_offset: u64,
    data: Bytes,
    reply: oneshot::Sender<Result<usize, StorageError>>,
}

struct EngineShared {
    reads: SegQueue<ReadOp>,
    writes: SegQueue<WriteOp>,
    wake: Mutex<bool>,
    signal: Condvar,
    running: AtomicBool,
    stopped: AtomicBool,
    monitor: Option<Arc<TransferMonitor>>,
}

impl EngineShared {
    fn notify(&self) {
        let mut pending = self.wake.lock();
        *pending = true;
        self.signal.notify_one();
    }

    fn drain(&self) {
        while let Some(op) = self.writes.pop() {
            let result = write_at(&op.handle, op.file_offset, &op.data);
            match &result {
                Ok(n) => {
                    if let Some(monitor) = &self.monitor {
                        monitor.add_written(*n as u64);
                    }
                }
                Err(e) => warn!(
                    "Write of {} bytes at {} to {} failed: {}",
                    op.data.len(),
                    op.file_offset,
                    op.handle.path().display(),
                    e
                ),
            }
            let _ = op.reply.send(result);
        }

        while let Some(op) = self.reads.pop() {
            let result = read_at(&op.handle, op.file_offset, op.length);
            match &result {
                Ok(data) => {
                    if let Some(monitor) = &self.monitor {
                        monitor.add_read(data.len() as u64);
                    }
                }
                Err(e) => debug!(
                    "Read of {} bytes at {} from {} failed: {}",
                    op.length,
                    op.file_offset,
                    op.handle.path().display(),
                    e
                ),
            }
            let _ = op.reply.send(result);
        }
    }

    fn reject_queued(&self) {
        while let Some(op) = self.writes.pop() {
            let _ = op.reply.send(Err(StorageError::EngineStopped));
        }
        while let Some(op) = self.reads.pop() {
            let _ = op.reply.send(Err(StorageError::EngineStopped));
        }
    }

    fn run(&self) {
        trace!("Disk worker started");
        loop {
            {
                let mut pending = self.wake.lock();
                while !*pending && self.running.load(Ordering::Acquire) {
                    self.signal.wait(&mut pending);
                }
                *pending = false;
            }

            self.drain();

            if !self.running.load(Ordering::Acquire) {
                // Let anything queued before shutdown land.
                self.drain();
                break;
            }
        }
        self.stopped.store(true, Ordering::Release);
        trace!("Disk worker stopped");
    }
}

fn read_at(handle: &FileHandle, offset: u64, length: usize) -> Result<Bytes, StorageError> {
    let mut file = handle.file();
    file.seek(SeekFrom::Start(offset))?;

    let mut buf = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled != length {
        return Err(StorageError::ShortTransfer {
            expected: length,
            actual: filled,
        });
    }

    Ok(Bytes::from(buf))
}

fn write_at(handle: &FileHandle, offset: u64, data: &[u8]) -> Result<usize, StorageError> {
    let mut file = handle.file();
    file.seek(SeekFrom::Start(offset))?;

    let mut written = 0;
    while written < data.len() {
        match file.write(&data[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if written != data.len() {
        return Err(StorageError::ShortTransfer {
            expected: data.len(),
            actual: written,
        });
    }

    Ok(written)
}

/// Single-consumer disk I/O engine.
///
/// Operations are queued with [`submit_read`](Self::submit_read) and
/// [`submit_write`](Self::submit_write) and complete through the returned
/// receiver. A failing operation completes with an error and never stops
/// the worker.
pub struct DiskIoEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskIoEngine {
    pub fn new() -> Result<Self, StorageError> {
        Self::build(None)
    }

    /// Creates an engine that reports transferred bytes to `monitor`.
    pub fn with_monitor(monitor: Arc<TransferMonitor>) -> Result<Self, StorageError> {
        Self::build(Some(monitor))
    }

    fn build(monitor: Option<Arc<TransferMonitor>>) -> Result<Self, StorageError> {
        let shared = Arc::new(EngineShared {
            reads: SegQueue::new(),
            writes: SegQueue::new(),
            wake: Mutex::new(false),
            signal: Condvar::new(),
            running: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            monitor,
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("disk-io".into())
            .spawn(move || worker_shared.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of operations waiting for the worker.
    pub fn queued(&self) -> usize {
        self.shared.reads.len() + self.shared.writes.len()
    }

    pub fn submit_read(
        &self,
        handle: Arc<FileHandle>,
        file_offset: u64,
        length: usize,
    ) -> Result<ReadCompletion, StorageError> {
        if !self.is_running() {
            return Err(StorageError::EngineStopped);
        }

        let (reply, rx) = oneshot::channel();
        self.shared.reads.push(ReadOp {
            handle,
            file_offset,
            length,
            reply,
        });
        self.wake_or_reject();
        Ok(rx)
    }

    pub fn submit_write(
        &self,
        handle: Arc<FileHandle>,
        file_offset: u64,
        data: Bytes,
    ) -> Result<WriteCompletion, StorageError> {
        if !self.is_running() {
            return Err(StorageError::EngineStopped);
        }

        let (reply, rx) = oneshot::channel();
        self.shared.writes.push(WriteOp {
            handle,
            file_offset,
            data,
            reply,
        });
        self.wake_or_reject();
        Ok(rx)
    }

    fn wake_or_reject(&self) {
        if self.is_running() {
            self.shared.notify();
        } else if self.shared.stopped.load(Ordering::Acquire) {
            // The worker exited between the check and the push.
            self.shared.reject_queued();
        }
    }

    /// Stops accepting work, lets queued operations finish and joins the
    /// worker thread.
    pub async fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            debug!("Shutting down disk engine with {} queued ops", self.queued());
        }
        self.shared.notify();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            report_worker_exit(tokio::task::spawn_blocking(move || worker.join()).await);
        }

        self.shared.reject_queued();
    }
}

/// Logs how the worker thread ended. Returns true on a clean exit.
fn report_worker_exit(result: Result<std::thread::Result<()>, tokio::task::JoinError>) -> bool {
    match result {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            warn!("Disk worker thread panicked");
            false
        }
        Err(e) => {
            warn!("Failed to join disk worker: {}", e);
            false
        }
    }
}

impl Drop for DiskIoEngine {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn handle(temp: &TempDir, name: &str, contents: &[u8], writable: bool) -> Arc<FileHandle> {
        let path: PathBuf = temp.path().join(name);
        std::fs::write(&path, contents).unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .unwrap();
        Arc::new(FileHandle::new(path, file, writable))
    }

    #[test]
    fn test_worker_panic_is_reported() {
        assert!(report_worker_exit(Ok(Ok(()))));

        let panicked: std::thread::Result<()> =
            std::thread::spawn(|| panic!("disk worker failure")).join();
        assert!(panicked.is_err());
        assert!(!report_worker_exit(Ok(panicked)));
    }

    #[tokio::test]
    async fn test_read_and_write() {
        let temp = TempDir::new().unwrap();
        let engine = DiskIoEngine::new().unwrap();
        let h = handle(&temp, "data", &[0u8; 32], true);

        let written = engine
            .submit_write(h.clone(), 8, Bytes::from_static(b"abcd"))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written, 4);

        let data = engine.submit_read(h, 6, 6).unwrap().await.unwrap().unwrap();
        assert_eq!(data.as_ref(), b"\0\0abcd");

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_short_read_is_failure() {
        let temp = TempDir::new().unwrap();
        let engine = DiskIoEngine::new().unwrap();
        let h = handle(&temp, "short", &[1u8; 10], false);

        let result = engine.submit_read(h.clone(), 6, 8).unwrap().await.unwrap();
        assert!(matches!(
            result,
            Err(StorageError::ShortTransfer {
                expected: 8,
                actual: 4
            })
        ));

        // The worker survives the failure.
        let data = engine.submit_read(h, 0, 2).unwrap().await.unwrap().unwrap();
        assert_eq!(data.as_ref(), &[1, 1]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_to_read_only_handle_fails() {
        let temp = TempDir::new().unwrap();
        let engine = DiskIoEngine::new().unwrap();
        let h = handle(&temp, "ro", &[0u8; 4], false);

        let result = engine
            .submit_write(h, 0, Bytes::from_static(b"xx"))
            .unwrap()
            .await
            .unwrap();
        assert!(result.is_err());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_work_drains_on_shutdown() {
        let temp = TempDir::new().unwrap();
        let engine = DiskIoEngine::new().unwrap();
        let h = handle(&temp, "drain", &[0u8; 64], true);

        let pending: Vec<_> = (0..16u8)
            .map(|i| {
                engine
                    .submit_write(h.clone(), i as u64 * 4, Bytes::from(vec![i; 4]))
                    .unwrap()
            })
            .collect();

        engine.shutdown().await;

        for rx in pending {
            assert_eq!(rx.await.unwrap().unwrap(), 4);
        }

        let contents = std::fs::read(h.path()).unwrap();
        assert_eq!(&contents[60..64], &[15, 15, 15, 15]);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let temp = TempDir::new().unwrap();
        let engine = DiskIoEngine::new().unwrap();
        let h = handle(&temp, "late", &[0u8; 4], true);

        engine.shutdown().await;
        assert!(!engine.is_running());
        assert!(matches!(
            engine.submit_read(h, 0, 1),
            Err(StorageError::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn test_monitor_counts_bytes() {
        let temp = TempDir::new().unwrap();
        let monitor = Arc::new(TransferMonitor::new());
        let engine = DiskIoEngine::with_monitor(monitor.clone()).unwrap();
        let h = handle(&temp, "counted", &[0u8; 16], true);

        engine
            .submit_write(h.clone(), 0, Bytes::from_static(b"12345"))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        engine.submit_read(h, 0, 3).unwrap().await.unwrap().unwrap();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.written, 5);
        assert_eq!(snapshot.read, 3);

        engine.shutdown().await;
    }
}
