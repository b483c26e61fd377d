use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::PaneDump;
use crate::buffer::SharedBuffer;
use crate::tmux::{parse_control_line, Attach, AttachedStream, ControlEvent, Utf8Stream};

struct Feed {
    buffer: SharedBuffer,
    task: JoinHandle<()>,
    finished: Arc<AtomicBool>,
    /// When a finished reader may be re-attached
    retry_at: Option<Instant>,
}

/// Standing attached readers, one per captured session, each pushing output
/// into that session's [`SharedBuffer`].
///
/// Readers attach lazily on first use and keep running independently of the
/// render tick until detached or until the session goes away.
pub struct LiveFeeds {
    attacher: Arc<dyn Attach>,
    seeder: Option<Arc<dyn PaneDump>>,
    capacity: usize,
    retry_after: Duration,
    feeds: Mutex<HashMap<String, Feed>>,
}

impl LiveFeeds {
    pub fn new(attacher: Arc<dyn Attach>, capacity: usize) -> Self {
        Self {
            attacher,
            seeder: None,
            capacity,
            retry_after: Duration::from_secs(5),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Prefill each new buffer with a snapshot so the live view starts with
    /// the current screen rather than only output produced after attaching.
    pub fn with_seeder(mut self, seeder: Arc<dyn PaneDump>) -> Self {
        self.seeder = Some(seeder);
        self
    }

    #[cfg(test)]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    fn feeds(&self) -> MutexGuard<'_, HashMap<String, Feed>> {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a reader for `session_id` unless one is running. Returns
    /// immediately; attaching happens in the background.
    pub fn ensure_attached(&self, session_id: &str) {
        let mut feeds = self.feeds();

        if let Some(feed) = feeds.get_mut(session_id) {
            if !feed.finished.load(Ordering::SeqCst) {
                return;
            }
            match feed.retry_at {
                None => {
                    feed.retry_at = Some(Instant::now() + self.retry_after);
                    return;
                }
                Some(at) if Instant::now() < at => return,
                Some(_) => {}
            }
            let buffer = feed.buffer.clone();
            let (task, finished) = self.spawn_reader(session_id, buffer.clone());
            *feed = Feed {
                buffer,
                task,
                finished,
                retry_at: None,
            };
            return;
        }

        let buffer = SharedBuffer::new(self.capacity);
        let (task, finished) = self.spawn_reader(session_id, buffer.clone());
        feeds.insert(
            session_id.to_string(),
            Feed {
                buffer,
                task,
                finished,
                retry_at: None,
            },
        );
    }

    fn spawn_reader(&self, session_id: &str, buffer: SharedBuffer) -> (JoinHandle<()>, Arc<AtomicBool>) {
        let finished = Arc::new(AtomicBool::new(false));
        let attacher = self.attacher.clone();
        let seeder = self.seeder.clone();
        let capacity = self.capacity;
        let session = session_id.to_string();
        let done = finished.clone();

        let task = tokio::spawn(async move {
            match attacher.attach(&session).await {
                Ok(stream) => {
                    if let Some(seeder) = seeder {
                        seed(&*seeder, &session, &buffer, capacity).await;
                    }
                    info!(session = %session, "live reader attached");
                    read_control_stream(&session, stream, &buffer).await;
                }
                Err(e) => warn!(session = %session, error = %e, "live reader failed to attach"),
            }
            done.store(true, Ordering::SeqCst);
        });
        (task, finished)
    }

    pub fn buffer(&self, session_id: &str) -> Option<SharedBuffer> {
        self.feeds().get(session_id).map(|f| f.buffer.clone())
    }

    #[cfg(test)]
    pub fn is_attached(&self, session_id: &str) -> bool {
        self.feeds()
            .get(session_id)
            .is_some_and(|f| !f.finished.load(Ordering::SeqCst))
    }

    /// Empty the buffer and drop the reader, e.g. when the session was
    /// recreated under the same name.
    pub fn reset(&self, session_id: &str) {
        if let Some(feed) = self.feeds().get_mut(session_id) {
            feed.task.abort();
            feed.buffer.clear();
            feed.finished.store(true, Ordering::SeqCst);
            feed.retry_at = Some(Instant::now());
        }
    }

    /// Stop the reader and forget the buffer.
    pub fn detach(&self, session_id: &str) {
        if let Some(feed) = self.feeds().remove(session_id) {
            feed.task.abort();
            debug!(session = session_id, "live reader detached");
        }
    }

    pub fn detach_all(&self) {
        for (_, feed) in self.feeds().drain() {
            feed.task.abort();
        }
    }
}

impl Drop for LiveFeeds {
    fn drop(&mut self) {
        self.detach_all();
    }
}

async fn seed(seeder: &dyn PaneDump, session: &str, buffer: &SharedBuffer, lines: usize) {
    match seeder.dump(session, lines).await {
        Ok(snapshot) => {
            for line in snapshot.trim_end_matches('\n').split('\n') {
                buffer.push_line(line);
            }
        }
        Err(e) => debug!(session, error = %e, "seeding live buffer failed"),
    }
}

/// Pump control-mode notifications into `buffer` until the stream ends.
async fn read_control_stream(session: &str, stream: AttachedStream, buffer: &SharedBuffer) {
    // keeps the client alive for as long as we read
    let _child = stream.child;
    let mut reader = BufReader::new(stream.output);
    let mut raw = Vec::with_capacity(4096);
    let mut text = Utf8Stream::default();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session, error = %e, "live reader read failed");
                break;
            }
        }
        let line = raw.strip_suffix(b"\n").unwrap_or(&raw[..]);
        match parse_control_line(line) {
            ControlEvent::Output { data, .. } => buffer.feed(&text.decode(&data)),
            ControlEvent::Exit(reason) => {
                info!(session, reason = reason.as_deref().unwrap_or(""), "live reader exited");
                break;
            }
            ControlEvent::Other => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Script {
        lines: &'static [u8],
        attaches: AtomicUsize,
    }

    #[async_trait]
    impl Attach for Script {
        async fn attach(&self, _session_id: &str) -> Result<AttachedStream> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(AttachedStream {
                output: Box::new(std::io::Cursor::new(self.lines.to_vec())),
                child: None,
            })
        }
    }

    struct Refuse;

    #[async_trait]
    impl Attach for Refuse {
        async fn attach(&self, session_id: &str) -> Result<AttachedStream> {
            anyhow::bail!("can't find session: {}", session_id)
        }
    }

    struct Snapshot;

    #[async_trait]
    impl PaneDump for Snapshot {
        async fn dump(&self, _session_id: &str, _lines: usize) -> Result<String> {
            Ok("screen 1\nscreen 2\n".to_string())
        }
    }

    async fn wait_finished(feeds: &LiveFeeds, session: &str) {
        for _ in 0..100 {
            if !feeds.is_attached(session) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reader never finished");
    }

    #[tokio::test]
    async fn test_reader_fills_buffer_from_control_stream() {
        let script = Arc::new(Script {
            lines: b"%begin 1 1 0\n%end 1 1 0\n%output %0 hello\\015\\012wor\n%output %0 ld\\015\\012$ \n%exit\n",
            attaches: AtomicUsize::new(0),
        });
        let feeds = LiveFeeds::new(script.clone(), 100);

        feeds.ensure_attached("deck-1");
        feeds.ensure_attached("deck-1");
        wait_finished(&feeds, "deck-1").await;

        let buffer = feeds.buffer("deck-1").expect("buffer");
        assert_eq!(buffer.last_lines(10), vec!["hello", "world", "$ "]);
        assert_eq!(script.attaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_character_split_between_notifications_survives() {
        let script = Arc::new(Script {
            lines: b"%output %0 \xe4\xb8\n%output %0 \xad\\012\n%exit\n",
            attaches: AtomicUsize::new(0),
        });
        let feeds = LiveFeeds::new(script, 10);

        feeds.ensure_attached("deck-1");
        wait_finished(&feeds, "deck-1").await;

        let buffer = feeds.buffer("deck-1").expect("buffer");
        assert_eq!(buffer.last_lines(10), vec!["中"]);
    }

    #[tokio::test]
    async fn test_seeded_buffer_starts_with_snapshot() {
        let script = Arc::new(Script {
            lines: b"%output %0 next\\012\n",
            attaches: AtomicUsize::new(0),
        });
        let feeds = LiveFeeds::new(script, 100).with_seeder(Arc::new(Snapshot));

        feeds.ensure_attached("deck-1");
        wait_finished(&feeds, "deck-1").await;

        let buffer = feeds.buffer("deck-1").expect("buffer");
        assert_eq!(buffer.last_lines(10), vec!["screen 1", "screen 2", "next"]);
    }

    #[tokio::test]
    async fn test_failed_attach_leaves_empty_buffer() {
        let feeds = LiveFeeds::new(Arc::new(Refuse), 100);
        feeds.ensure_attached("deck-9");
        wait_finished(&feeds, "deck-9").await;
        assert!(feeds.buffer("deck-9").expect("buffer").is_empty());
    }

    #[tokio::test]
    async fn test_reattach_waits_for_retry_window() {
        let script = Arc::new(Script {
            lines: b"%exit\n",
            attaches: AtomicUsize::new(0),
        });
        let feeds = LiveFeeds::new(script.clone(), 10).with_retry_after(Duration::from_millis(20));

        feeds.ensure_attached("deck-1");
        wait_finished(&feeds, "deck-1").await;
        // first call after finishing only arms the retry window
        feeds.ensure_attached("deck-1");
        feeds.ensure_attached("deck-1");
        assert_eq!(script.attaches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        feeds.ensure_attached("deck-1");
        wait_finished(&feeds, "deck-1").await;
        assert_eq!(script.attaches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detach_forgets_buffer() {
        let script = Arc::new(Script {
            lines: b"%output %0 x\\012\n",
            attaches: AtomicUsize::new(0),
        });
        let feeds = LiveFeeds::new(script, 10);
        feeds.ensure_attached("deck-1");
        feeds.detach("deck-1");
        assert!(feeds.buffer("deck-1").is_none());
        assert!(!feeds.is_attached("deck-1"));
    }
}
