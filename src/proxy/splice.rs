//! Bidirectional byte relay between two duplex streams.
//!
//! Each direction is a plain read / write / flush loop. Whichever direction
//! finishes first (EOF or error) ends the whole session: both write sides
//! are shut down and both streams dropped, so the other loop can never be
//! left blocked on a half-open peer.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::trace;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Upper bound on flushing and shutting down both sides after the session ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How a splice ended.
#[derive(Debug, Default)]
pub struct SpliceSummary {
    /// Bytes copied from `a` to `b`.
    pub a_to_b: u64,
    /// Bytes copied from `b` to `a`.
    pub b_to_a: u64,
    /// The I/O error that ended the session, if it did not end on EOF.
    pub error: Option<io::Error>,
    /// Set when the idle timeout ended the session.
    pub idle_timeout: bool,
}

/// Last-activity clock shared by both copy loops and the idle watchdog.
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Copy bytes both ways between `a` and `b` until either side finishes.
///
/// With `idle_timeout` set, a session that moves no bytes in either
/// direction for that long is ended as well. Both streams are consumed and
/// closed before this returns.
pub async fn splice<A, B>(a: A, b: B, idle_timeout: Option<Duration>) -> SpliceSummary
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let activity = Activity::new();
    let mut summary = SpliceSummary::default();

    tokio::select! {
        result = pump(&mut a_read, &mut b_write, &mut summary.a_to_b, &activity) => {
            if let Err(e) = result {
                trace!("a->b copy ended: {}", e);
                summary.error = Some(e);
            }
        }
        result = pump(&mut b_read, &mut a_write, &mut summary.b_to_a, &activity) => {
            if let Err(e) = result {
                trace!("b->a copy ended: {}", e);
                summary.error = Some(e);
            }
        }
        _ = idle_watchdog(&activity, idle_timeout) => {
            trace!("Splice idle for {:?}", idle_timeout);
            summary.idle_timeout = true;
        }
    }

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = b_write.shutdown().await;
        let _ = a_write.shutdown().await;
    })
    .await;

    summary
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
    activity: &Activity,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
        activity.touch();
    }
}

async fn idle_watchdog(activity: &Activity, limit: Option<Duration>) {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };
    loop {
        let deadline = activity.last() + limit;
        if Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep_until(deadline).await;
    }
}
