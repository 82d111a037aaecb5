//! Trellis entrypoint: wire the kernel to its demo collaborators and run
//! the cooperative event loop.
//!
//! The kernel lives on the main thread (panes are not `Send`); event
//! sources run on a tokio runtime and feed one bounded channel which the
//! loop drains with `blocking_recv`, one event and at most one refresh
//! pass at a time.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use core_events::{
    EVENT_CHANNEL_CAP, Event, EventSourceRegistry, REFRESH_PASSES, ScriptKeySource,
    TickEventSource,
};
use core_pane::{CallInfo, CommandHandle, Editor};
use core_proto::{CmdRet, keys};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

mod display;
mod doc;
mod view;

use display::{display_snapshot, register_display_pane};
use doc::{LineDoc, register_doc_pane};
use view::register_view_pane;

const WELCOME: &str = "Trellis scratch buffer.\n";

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about = "Trellis editor kernel driver")]
struct Args {
    /// Optional path to load into the document at startup.
    pub path: Option<PathBuf>,
    /// Configuration file path (overrides discovery of `trellis.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Whitespace-separated key script ("Chr-h Chr-i Enter C-Chr-q");
    /// the session ends when the script runs out.
    #[arg(long = "keys")]
    pub keys: Option<String>,
    /// Display grid size.
    #[arg(long, default_value_t = 80)]
    pub width: usize,
    #[arg(long, default_value_t = 24)]
    pub height: usize,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self, file: &str) -> Result<()> {
        let path = Path::new(if file.is_empty() { "trellis.log" } else { file });
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        let name = path.file_name().context("log file needs a name")?;
        let file_appender =
            tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        if tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
            .is_ok()
        {
            self.log_guard = Some(guard);
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |panic| {
                error!(target: "runtime", %panic, "panic");
                default_panic(panic);
            }));
        });
    }
}

/// Global keystroke translator: the display addresses raw keys as
/// `Keystroke` calls with the key name in `str1`; this re-dispatches the
/// named key down the focus chain where mode panes bind it.
fn keystroke_translator() -> CommandHandle {
    CommandHandle::new("editor:keystroke", |ed, ci| {
        let key = ci.require_str()?.to_owned();
        let focus = ci.require_focus()?;
        let mut inner = CallInfo::new(key).with_focus(focus);
        ed.handle(&mut inner)
    })
}

fn message_sink() -> CommandHandle {
    CommandHandle::new("editor:message", |_, ci| {
        info!(target: "runtime", message = ci.str1.as_deref().unwrap_or(""), "message");
        Ok(CmdRet::ok())
    })
}

/// Surface a user-visible message through the prefix-addressed `Message`
/// protocol: every command registered under the `Message` prefix is
/// tried in key order until one claims the call.
fn broadcast_message(ed: &mut Editor, text: &str) -> core_proto::CallResult {
    let focus = ed.focus_leaf(ed.root());
    let mut ci = CallInfo::new(keys::MESSAGE)
        .with_focus(focus)
        .with_str(text);
    ed.handle_prefix(keys::MESSAGE, &mut ci)
}

fn build_editor(args: &Args, quit: Rc<Cell<bool>>) -> Result<Editor> {
    let mut ed = Editor::new();
    let root = ed.root();
    ed.resize(root, 0, 0, args.width as i32, args.height as i32);

    ed.register_command(keys::KEYSTROKE, keystroke_translator());
    ed.register_command(keys::MESSAGE, message_sink());
    ed.register_command(keys::MESSAGE_MODAL, message_sink());

    let text = match &args.path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("cannot read {}", p.display()))?,
        None => WELCOME.to_owned(),
    };
    let display = register_display_pane(&mut ed, root, args.width, args.height)?;
    let doc = register_doc_pane(&mut ed, root, LineDoc::new(text))?;
    register_view_pane(&mut ed, display, doc, display, quit)?;
    ed.refresh();
    Ok(ed)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut startup = AppStartup::new();
    let config_path = args.config.clone().unwrap_or_else(core_config::discover);
    let config = core_config::load_from(&config_path)?;
    startup.configure_logging(&config.file.log.file)?;
    AppStartup::install_panic_hook();
    let path_str = args.path.as_ref().map(|p| p.display().to_string());
    info!(
        target: "runtime",
        path = path_str.as_deref(),
        tick_ms = config.effective_tick_ms,
        "startup"
    );

    let quit = Rc::new(Cell::new(false));
    let mut ed = build_editor(&args, Rc::clone(&quit))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()?;
    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(Duration::from_millis(
        config.effective_tick_ms,
    )));
    if let Some(script) = &args.keys {
        let script_keys = script.split_whitespace().map(str::to_owned).collect();
        registry.register(ScriptKeySource::new(script_keys, Duration::ZERO));
    }
    let handles = {
        let _enter = rt.enter();
        registry.spawn_all(&tx)
    };
    drop(tx);

    let budget = config.file.dispatch.time_budget_ms;
    while let Some(event) = rx.blocking_recv() {
        match event {
            Event::Key(key) => {
                if budget > 0 {
                    ed.set_deadline(Some(Instant::now() + Duration::from_millis(budget)));
                }
                let leaf = ed.focus_leaf(ed.root());
                let mut ci = CallInfo::new(keys::KEYSTROKE)
                    .with_focus(leaf)
                    .with_str(&key);
                if let Err(err) = ed.handle(&mut ci) {
                    info!(target: "runtime", key = key.as_str(), %err, "keystroke failed");
                    let _ = broadcast_message(&mut ed, &format!("key {key} failed: {err}"));
                }
                ed.set_deadline(None);
            }
            Event::Mouse { key, x, y } => {
                let leaf = ed.focus_leaf(ed.root());
                let mut ci = CallInfo::new(keys::MOUSE_EVENT)
                    .with_focus(leaf)
                    .with_str(&key)
                    .with_xy(x, y);
                let _ = ed.handle(&mut ci);
            }
            Event::Resize(w, h) => {
                let root = ed.root();
                ed.resize(root, 0, 0, w as i32, h as i32);
            }
            Event::Tick => {}
            Event::Shutdown => break,
        }
        ed.refresh();
        REFRESH_PASSES.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if quit.get() {
            break;
        }
    }
    drop(rx);
    rt.shutdown_timeout(Duration::from_millis(200));
    drop(handles);

    // Leave the final frame on stdout; the headless display is the only
    // visible surface.
    let root = ed.root();
    let display = ed
        .pane(root)
        .and_then(|p| p.children().first().copied());
    if let Some(d) = display
        && let Some(frame) = display_snapshot(&ed, d)
    {
        println!("{frame}");
    }
    info!(target: "runtime", "shutdown");
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scripted(keys: &str) -> (Editor, Rc<Cell<bool>>, String) {
        let args = Args {
            path: None,
            config: None,
            keys: None,
            width: 40,
            height: 8,
        };
        let quit = Rc::new(Cell::new(false));
        let mut ed = build_editor(&args, Rc::clone(&quit)).unwrap();
        for key in keys.split_whitespace() {
            let leaf = ed.focus_leaf(ed.root());
            let mut ci = CallInfo::new(keys::KEYSTROKE)
                .with_focus(leaf)
                .with_str(key);
            let _ = ed.handle(&mut ci);
            ed.refresh();
        }
        let root = ed.root();
        let display = ed.pane(root).unwrap().children()[0];
        let frame = display_snapshot(&ed, display).unwrap();
        (ed, quit, frame)
    }

    #[test]
    fn typing_lands_in_the_frame() {
        let (_, _, frame) = scripted("Chr-h Chr-i Chr-!");
        assert_eq!(frame.lines().next(), Some("Trellis scratch buffer."));
        assert!(frame.lines().nth(1).unwrap_or("").starts_with("hi!"));
    }

    #[test]
    fn backspace_removes_typed_text() {
        let (_, _, frame) = scripted("Chr-a Chr-b Backspace");
        assert!(frame.lines().nth(1).unwrap_or("").starts_with("a"));
        assert!(!frame.contains("ab"));
    }

    #[test]
    fn quit_binding_raises_the_flag() {
        let (_, quit, _) = scripted("Chr-x C-Chr-q");
        assert!(quit.get());
    }

    #[test]
    fn message_broadcast_is_claimed_by_the_sink() {
        let (mut ed, _, _) = scripted("");
        // "Message" outranks "Message:modal" in key order, so the plain
        // sink claims the call and the modal variant never runs.
        let r = broadcast_message(&mut ed, "refresh fell behind");
        assert_eq!(r, Ok(CmdRet::ok()));
    }

    #[test]
    fn newline_splits_the_display_line() {
        let (_, _, frame) = scripted("Chr-a Enter Chr-b");
        let lines: Vec<&str> = frame.lines().collect();
        assert_eq!(lines.get(1).copied(), Some("a"));
        assert!(lines.get(2).unwrap_or(&"").starts_with('b'));
    }
}
