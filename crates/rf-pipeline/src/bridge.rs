//! The decoder-to-encoder byte relay.
//!
//! Dual-process stages pipe raw decoded samples from a decoder child's
//! stdout into an encoder child, either through the encoder's redirected
//! stdin or through a named FIFO the encoder opens as an input file. The
//! relay never materializes the stream on disk.
//!
//! The relay transfers nothing until three readiness flags line up:
//! decoder alive, encoder alive, and the data marker observed in the
//! decoder's diagnostic output. The wait is a bounded poll; if either
//! process dies before the marker appears the relay fails out instead of
//! hanging. Relay failures are logged and contained; the owning stage's
//! exit handling decides the run's fate.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use rf_core::{Error, Result};

/// Read/write buffer size. Raw video at BluRay bitrates moves hundreds of
/// MB/min; large buffers keep the syscall count down.
pub const RELAY_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Readiness poll interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared liveness/readiness flags between the relay and the process
/// waiter tasks.
#[derive(Debug, Clone, Default)]
pub struct BridgeFlags {
    /// Decoder process is running.
    pub decoder_alive: Arc<AtomicBool>,
    /// Encoder process is running.
    pub encoder_alive: Arc<AtomicBool>,
    /// The decoder's data marker was seen in its diagnostic output.
    pub data_ready: Arc<AtomicBool>,
}

impl BridgeFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn data_ready(&self) -> bool {
        self.data_ready.load(Ordering::Acquire)
    }

    fn either_dead(&self) -> bool {
        !self.decoder_alive.load(Ordering::Acquire)
            || !self.encoder_alive.load(Ordering::Acquire)
    }

    fn encoder_dead(&self) -> bool {
        !self.encoder_alive.load(Ordering::Acquire)
    }
}

/// Where relayed bytes go.
pub enum BridgeSink {
    /// Write directly into an already-open stream (the encoder's stdin).
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    /// Open this FIFO for writing once the readiness gate passes. The FIFO
    /// must exist and the encoder must already be launched (its read-side
    /// open unblocks ours).
    FifoPath(std::path::PathBuf),
}

/// One relay between a decoder output and an encoder input.
pub struct StreamBridge {
    flags: BridgeFlags,
}

impl StreamBridge {
    pub fn new(flags: BridgeFlags) -> Self {
        Self { flags }
    }

    /// Create the FIFO backing a named-pipe topology.
    ///
    /// Must be called before the encoder is launched so the encoder's open
    /// cannot race the endpoint's existence.
    #[cfg(unix)]
    pub fn create_fifo(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600))
            .map_err(|e| Error::bridge(format!("mkfifo {}: {e}", path.display())))
    }

    #[cfg(not(unix))]
    pub fn create_fifo(path: &Path) -> Result<()> {
        Err(Error::bridge(format!(
            "named pipes are not supported on this platform ({})",
            path.display()
        )))
    }

    /// Run the relay to completion, returning the byte count moved.
    ///
    /// Ends on decoder EOF (zero-byte read) or when a liveness flag drops
    /// mid-loop. The sink is shut down exactly once on every exit path so
    /// the encoder observes EOF.
    ///
    /// # Errors
    ///
    /// [`Error::Bridge`] when a process dies before the data marker appears
    /// or when a read/write fails. Callers log these; they are not
    /// authoritative for stage failure.
    pub async fn relay<R>(&self, mut source: R, sink: BridgeSink) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        if let Err(e) = self.wait_ready().await {
            // Whatever sits on the other end must still observe EOF.
            match sink {
                BridgeSink::Writer(mut w) => {
                    if let Err(se) = w.shutdown().await {
                        tracing::debug!("sink shutdown: {se}");
                    }
                }
                BridgeSink::FifoPath(path) => release_fifo_reader(&path),
            }
            return Err(e);
        }

        let mut sink: Box<dyn AsyncWrite + Send + Unpin> = match sink {
            BridgeSink::Writer(w) => w,
            BridgeSink::FifoPath(path) => Box::new(
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .await
                    .map_err(|e| {
                        Error::bridge(format!("open fifo {}: {e}", path.display()))
                    })?,
            ),
        };

        let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];
        let mut total: u64 = 0;

        let result = loop {
            // A dead encoder has nowhere for bytes to go. A dead decoder is
            // not checked here: its remaining output sits buffered in the
            // pipe and drains to a normal zero-byte EOF.
            if self.flags.encoder_dead() {
                tracing::debug!(total, "encoder exited mid-stream");
                break Ok(total);
            }
            match source.read(&mut buffer).await {
                Ok(0) => break Ok(total),
                Ok(n) => {
                    if let Err(e) = sink.write_all(&buffer[..n]).await {
                        break Err(Error::bridge(format!("sink write: {e}")));
                    }
                    total += n as u64;
                }
                Err(e) => break Err(Error::bridge(format!("source read: {e}"))),
            }
        };

        // Close the sink exactly once so the encoder sees EOF even when the
        // loop broke on an error.
        if let Err(e) = sink.shutdown().await {
            tracing::debug!("sink shutdown: {e}");
        }

        result
    }

    /// Bounded poll until the data marker has been observed.
    ///
    /// A process death before the marker fails the wait, with one grace
    /// poll so a marker line still buffered in the diagnostic pipe of a
    /// fast-exiting decoder is not lost to the race between its line
    /// reader and its exit waiter.
    async fn wait_ready(&self) -> Result<()> {
        let mut dead_polls = 0u32;
        loop {
            if self.flags.data_ready() {
                return Ok(());
            }
            if self.flags.either_dead() {
                dead_polls += 1;
                if dead_polls > 1 {
                    return Err(Error::bridge(
                        "process exited before the data marker appeared",
                    ));
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Hand EOF to a reader already blocked on the FIFO.
///
/// The non-blocking write open succeeds only when a reader holds the other
/// end; dropping the handle immediately completes that reader with zero
/// bytes. `ENXIO` means nothing is waiting for EOF.
#[cfg(unix)]
fn release_fifo_reader(path: &Path) {
    use std::os::unix::fs::OpenOptionsExt;
    match std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
    {
        Ok(file) => drop(file),
        Err(e) => tracing::debug!("release fifo {}: {e}", path.display()),
    }
}

#[cfg(not(unix))]
fn release_fifo_reader(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::AsyncReadExt;

    fn ready_flags() -> BridgeFlags {
        let flags = BridgeFlags::new();
        flags.decoder_alive.store(true, Ordering::Release);
        flags.encoder_alive.store(true, Ordering::Release);
        flags.data_ready.store(true, Ordering::Release);
        flags
    }

    #[tokio::test]
    async fn relays_bytes_unchanged() {
        let payload = b"raw sample data".to_vec();
        let (sink_w, mut sink_r) = tokio::io::duplex(64);

        let bridge = StreamBridge::new(ready_flags());
        let relay = tokio::spawn(async move {
            bridge
                .relay(payload.as_slice(), BridgeSink::Writer(Box::new(sink_w)))
                .await
        });

        let mut received = Vec::new();
        sink_r.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"raw sample data");
        assert_eq!(relay.await.unwrap().unwrap(), 15);
    }

    #[tokio::test]
    async fn holds_all_bytes_until_marker_is_set() {
        // Readiness gate: decoder and encoder alive, but no data marker yet.
        let flags = BridgeFlags::new();
        flags.decoder_alive.store(true, Ordering::Release);
        flags.encoder_alive.store(true, Ordering::Release);

        let payload = vec![0xAAu8; 4096];
        let (sink_w, mut sink_r) = tokio::io::duplex(65536);

        let bridge = StreamBridge::new(flags.clone());
        let relay = tokio::spawn(async move {
            bridge
                .relay(payload.as_slice(), BridgeSink::Writer(Box::new(sink_w)))
                .await
        });

        // Well past several poll intervals, nothing may have been written.
        tokio::time::sleep(POLL_INTERVAL * 4).await;
        let mut probe = [0u8; 1];
        let pending = tokio::time::timeout(
            Duration::from_millis(10),
            sink_r.read(&mut probe),
        )
        .await;
        assert!(pending.is_err(), "bytes leaked through a closed gate");

        flags.data_ready.store(true, Ordering::Release);
        let mut received = Vec::new();
        sink_r.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 4096);
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fails_out_when_process_dies_before_marker() {
        let flags = BridgeFlags::new();
        flags.decoder_alive.store(true, Ordering::Release);
        flags.encoder_alive.store(true, Ordering::Release);

        let (sink_w, _sink_r) = tokio::io::duplex(64);
        let bridge = StreamBridge::new(flags.clone());
        let relay = tokio::spawn(async move {
            bridge
                .relay(&b"data"[..], BridgeSink::Writer(Box::new(sink_w)))
                .await
        });

        tokio::time::sleep(POLL_INTERVAL * 2).await;
        flags.decoder_alive.store(false, Ordering::Release);

        let result = tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay hung after process death")
            .unwrap();
        assert_matches!(result, Err(Error::Bridge(_)));
    }

    #[tokio::test]
    async fn eof_closes_sink_exactly_once() {
        let (sink_w, mut sink_r) = tokio::io::duplex(64);
        let bridge = StreamBridge::new(ready_flags());

        let relay = tokio::spawn(async move {
            bridge
                .relay(&b""[..], BridgeSink::Writer(Box::new(sink_w)))
                .await
        });

        // A closed sink yields clean EOF on the read side, without hanging.
        let mut received = Vec::new();
        let n = tokio::time::timeout(
            Duration::from_secs(2),
            sink_r.read_to_end(&mut received),
        )
        .await
        .expect("encoder side never saw EOF")
        .unwrap();
        assert_eq!(n, 0);
        assert_eq!(relay.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn thirty_megabytes_byte_identical() {
        // 30 MB in 10 MB chunks with a distinguishable pattern.
        let chunk: Vec<u8> = (0..RELAY_BUFFER_SIZE).map(|i| (i % 251) as u8).collect();
        let mut payload = Vec::with_capacity(3 * RELAY_BUFFER_SIZE);
        for _ in 0..3 {
            payload.extend_from_slice(&chunk);
        }
        let expected = payload.clone();

        let (sink_w, mut sink_r) = tokio::io::duplex(1 << 20);
        let bridge = StreamBridge::new(ready_flags());
        let relay = tokio::spawn(async move {
            bridge
                .relay(payload.as_slice(), BridgeSink::Writer(Box::new(sink_w)))
                .await
        });

        let mut received = Vec::with_capacity(expected.len());
        sink_r.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), expected.len());
        assert_eq!(received, expected);
        assert_eq!(relay.await.unwrap().unwrap(), 3 * RELAY_BUFFER_SIZE as u64);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fifo_topology_delivers_to_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let fifo = tmp.path().join("encode.fifo");
        StreamBridge::create_fifo(&fifo).unwrap();

        // Reader stands in for the encoder process opening its input file.
        let reader_path = fifo.clone();
        let reader = tokio::spawn(async move {
            let mut file = tokio::fs::File::open(&reader_path).await.unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).await.unwrap();
            data
        });

        let bridge = StreamBridge::new(ready_flags());
        bridge
            .relay(&b"pcm audio"[..], BridgeSink::FifoPath(fifo))
            .await
            .unwrap();

        assert_eq!(reader.await.unwrap(), b"pcm audio");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gate_failure_still_hands_the_fifo_reader_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let fifo = tmp.path().join("encode.fifo");
        StreamBridge::create_fifo(&fifo).unwrap();

        // Stands in for an encoder blocked opening its input file.
        let reader_path = fifo.clone();
        let reader = std::thread::spawn(move || {
            use std::io::Read;
            let mut data = Vec::new();
            std::fs::File::open(&reader_path)
                .unwrap()
                .read_to_end(&mut data)
                .unwrap();
            data
        });

        let flags = BridgeFlags::new();
        flags.decoder_alive.store(true, Ordering::Release);
        flags.encoder_alive.store(true, Ordering::Release);

        let bridge = StreamBridge::new(flags.clone());
        let relay = tokio::spawn(async move {
            bridge.relay(&b"data"[..], BridgeSink::FifoPath(fifo)).await
        });

        tokio::time::sleep(POLL_INTERVAL * 2).await;
        flags.decoder_alive.store(false, Ordering::Release);

        let result = tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay hung after process death")
            .unwrap();
        assert_matches!(result, Err(Error::Bridge(_)));

        for _ in 0..50 {
            if reader.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(reader.is_finished(), "fifo reader never saw EOF");
        assert_eq!(reader.join().unwrap(), b"");
    }

    #[cfg(unix)]
    #[test]
    fn create_fifo_replaces_stale_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let fifo = tmp.path().join("decode.fifo");
        std::fs::write(&fifo, b"stale regular file").unwrap();
        StreamBridge::create_fifo(&fifo).unwrap();
        StreamBridge::create_fifo(&fifo).unwrap();
    }
}
