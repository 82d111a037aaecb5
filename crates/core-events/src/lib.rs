//! core-events: event types and channel plumbing for the Trellis runtime.
//!
//! The kernel is single-threaded; collaborator tasks (input, timers,
//! watchers) push events into one bounded mpsc channel and the main loop
//! consumes them one at a time, driving at most one refresh pass per
//! event. Producers use `blocking_send`, so backpressure parks the
//! producer instead of dropping events.

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// Bound of the runtime event channel. One producer per source and one
/// consumer keeps latency low; the bound exists for memory safety, not
/// for lossy shedding.
pub const EVENT_CHANNEL_CAP: usize = 8192;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Relaxed atomic counters; inspected by tests and logged periodically.
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static KEY_EVENTS: AtomicU64 = AtomicU64::new(0);
pub static TICK_EVENTS: AtomicU64 = AtomicU64::new(0);
pub static REFRESH_PASSES: AtomicU64 = AtomicU64::new(0);

/// Top-level event enum consumed by the central loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A keystroke, already encoded as a kernel key string ("Chr-a",
    /// "Enter", "C-Chr-q", ...).
    Key(String),
    /// Pointer event at a root-relative cell position.
    Mouse { key: String, x: i32, y: i32 },
    /// Display resized (columns, rows).
    Resize(u16, u16),
    /// Periodic monotonic tick driving idle work without busy polling.
    Tick,
    Shutdown,
}

bitflags::bitflags! {
    /// Modifier mask for building key strings.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ModMask: u8 {
        const CTRL  = 1;
        const ALT   = 2;
        const SHIFT = 4;
    }
}

/// Encode a key token and modifier mask as a kernel key string. Printable
/// characters become `Chr-<c>`; named tokens pass through; modifiers
/// prefix in a fixed order so bindings are byte-stable.
pub fn key_string(mods: ModMask, token: &str) -> String {
    let mut s = String::new();
    if mods.contains(ModMask::CTRL) {
        s.push_str("C-");
    }
    if mods.contains(ModMask::ALT) {
        s.push_str("A-");
    }
    if mods.contains(ModMask::SHIFT) {
        s.push_str("S-");
    }
    if token.chars().count() == 1 {
        s.push_str("Chr-");
    }
    s.push_str(token);
    s
}

// -------------------------------------------------------------------------------------------------
// Async event sources
// -------------------------------------------------------------------------------------------------

/// Trait implemented by any async event producer. Implementors hold their
/// configuration and spawn one background task pushing `Event`s into the
/// shared channel; on send failure (consumer dropped) the task must exit
/// promptly.
pub trait AsyncEventSource: Send + 'static {
    /// Stable identifier used for logging.
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources, spawned together at startup.
#[derive(Default)]
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    /// Spawn every registered source. Call after creating the runtime
    /// channel and before the loop starts consuming; during shutdown drop
    /// the final `Sender` clone before awaiting the handles so sources
    /// observe the closed channel and exit cooperatively.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            tracing::info!(target: "runtime.events", source = src.name(), "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

/// Built-in monotonic tick source.
pub struct TickEventSource {
    interval: Duration,
}

impl TickEventSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                TICK_EVENTS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// A scripted key source: feeds a fixed key sequence then goes quiet.
/// Used by the driver binary for reproducible sessions and by tests.
pub struct ScriptKeySource {
    keys: Vec<String>,
    gap: Duration,
}

impl ScriptKeySource {
    pub fn new(keys: Vec<String>, gap: Duration) -> Self {
        Self { keys, gap }
    }
}

impl AsyncEventSource for ScriptKeySource {
    fn name(&self) -> &'static str {
        "script-keys"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let keys = self.keys;
        let gap = self.gap;
        tokio::spawn(async move {
            for key in keys {
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
                KEY_EVENTS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if tx.send(Event::Key(key)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Event::Shutdown).await;
        })
    }
}

/// Helper result type for channel creation.
pub type EventResult<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn key_string_forms() {
        assert_eq!(key_string(ModMask::empty(), "a"), "Chr-a");
        assert_eq!(key_string(ModMask::CTRL, "q"), "C-Chr-q");
        assert_eq!(key_string(ModMask::empty(), "Enter"), "Enter");
        assert_eq!(key_string(ModMask::CTRL | ModMask::ALT, "x"), "C-A-Chr-x");
    }

    #[tokio::test]
    async fn script_source_feeds_keys_then_shutdown() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(ScriptKeySource::new(
            vec!["Chr-h".into(), "Chr-i".into()],
            Duration::ZERO,
        ));
        let handles = reg.spawn_all(&tx);
        drop(tx);
        assert_eq!(rx.recv().await, Some(Event::Key("Chr-h".into())));
        assert_eq!(rx.recv().await, Some(Event::Key("Chr-i".into())));
        assert_eq!(rx.recv().await, Some(Event::Shutdown));
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_millis(50), h).await;
        }
    }

    #[tokio::test]
    async fn tick_source_emits_until_channel_drops() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(TickEventSource::new(Duration::from_millis(5)));
        let handles = reg.spawn_all(&tx);
        drop(tx);
        assert_eq!(rx.recv().await, Some(Event::Tick));
        drop(rx);
        for h in handles {
            match tokio::time::timeout(Duration::from_millis(100), h).await {
                Ok(join) => join.expect("tick task exits cleanly"),
                Err(_) => panic!("tick task did not observe channel closure"),
            }
        }
    }
}
