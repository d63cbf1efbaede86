//! The application orchestrator: terminal setup, the cooperative event
//! loop, and the render/dispatch/sweep cycle.
//!
//! Terminal lifecycle (raw mode, alternate screen, mouse capture, and their
//! teardown on drop) follows a construct-on-`new`/restore-on-`Drop` shape,
//! with a poll-duration-driven tick cadence feeding a render/dispatch/sweep
//! cycle over this crate's own `ElementTree`/`Component` model.

use crate::app::config::{AppConfig, InputLatency};
use crate::buffer::{Buffer, CellChange};
use crate::dispatch::{DispatchTable, KeyBinding};
use crate::element::{Component, ElementId, ElementTree};
use crate::inline::InlineSession;
use crate::input::{InputDecoder, InputEvent, KeyEvent, MouseEvent};
use crate::mount::MountRegistry;
use crate::state::{AppHandle, WatcherStop};
use crate::terminal::{CrosstermTerminal, Terminal};
use crate::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

//--------------------------------------------------------------------------------------------------
// App
//--------------------------------------------------------------------------------------------------

/// Owns the terminal, the retained element tree, and every queue the
/// cooperative event loop drains. One `App` runs one `root` for its whole
/// lifetime; dropping it always restores the terminal to cooked mode.
pub struct App {
    terminal: Box<dyn Terminal>,
    buffer: Buffer,
    tree: ElementTree,
    registry: MountRegistry,
    dispatch: DispatchTable,
    input: InputDecoder,
    handle: AppHandle,
    config: AppConfig,
    inline: Option<InlineSession>,
    full_redraw: bool,
    focused: Option<ElementId>,
    root_watchers_started: bool,
    root_stop_tx: watch::Sender<bool>,
    event_rx: mpsc::UnboundedReceiver<Job>,
    update_rx: mpsc::UnboundedReceiver<Job>,
    error_rx: mpsc::UnboundedReceiver<Error>,
    raw_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    reader_poison: Arc<AtomicBool>,
    watchers: Vec<JoinHandle<()>>,
    last_size: (u16, u16),
    write_failures: u32,
}

//--------------------------------------------------------------------------------------------------
// Construction
//--------------------------------------------------------------------------------------------------

impl App {
    /// Builds an app over a real TTY: enables raw mode, enters the
    /// alternate screen (or reserves inline widget rows), applies mouse and
    /// cursor settings, and starts the input-reader thread.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        let terminal: Box<dyn Terminal> = Box::new(CrosstermTerminal::new());
        Self::with_terminal(config, terminal, true)
    }

    /// Builds an app over an injected terminal. When `spawn_reader` is
    /// `false`, no stdin-reading thread is started; tests drive input
    /// through [`App::feed_input`] and [`App::tick`] instead.
    pub(crate) fn with_terminal(
        config: AppConfig,
        mut terminal: Box<dyn Terminal>,
        spawn_reader: bool,
    ) -> Result<Self, Error> {
        config.validate()?;

        terminal.enter_raw_mode().map_err(Error::TerminalSetup)?;
        let (width, height) = terminal.size().map_err(Error::TerminalSetup)?;

        let inline = match config.inline_height {
            Some(h) => {
                let mut session = InlineSession::new(width, height, h);
                session.reserve(terminal.as_mut()).map_err(Error::TerminalSetup)?;
                session
                    .apply_startup_policy(terminal.as_mut(), config.inline_startup_mode)
                    .map_err(Error::TerminalSetup)?;
                Some(session)
            }
            None => {
                terminal.enter_alt_screen().map_err(Error::TerminalSetup)?;
                None
            }
        };

        if config.mouse_enabled {
            terminal.enable_mouse().map_err(Error::TerminalSetup)?;
        }
        if config.cursor_visible {
            terminal.show_cursor().map_err(Error::TerminalSetup)?;
        } else {
            terminal.hide_cursor().map_err(Error::TerminalSetup)?;
        }

        let buffer_height = inline.as_ref().map(|s| s.widget_height()).unwrap_or(height);
        let buffer = Buffer::new(width, buffer_height);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = watch::channel(false);
        let handle = AppHandle::new(event_tx, update_tx, error_tx, stop_tx);
        let (root_stop_tx, _root_stop_rx) = watch::channel(false);

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let reader_poison = Arc::new(AtomicBool::new(false));
        if spawn_reader {
            spawn_reader_thread(config.input_latency, Arc::clone(&reader_poison), raw_tx);
        }

        Ok(Self {
            terminal,
            buffer,
            tree: ElementTree::new(),
            registry: MountRegistry::new(),
            dispatch: DispatchTable::default(),
            input: InputDecoder::new(),
            handle,
            config,
            inline,
            full_redraw: true,
            focused: None,
            root_watchers_started: false,
            root_stop_tx,
            event_rx,
            update_rx,
            error_rx,
            raw_rx,
            reader_poison,
            watchers: Vec::new(),
            last_size: (width, height),
            write_failures: 0,
        })
    }

    /// The handle watchers and components bind `State`/`EventBus` against.
    pub fn handle(&self) -> AppHandle {
        self.handle.clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Event loop
//--------------------------------------------------------------------------------------------------

/// What woke the loop from its idle wait.
enum Wake {
    Tick,
    Update(Job),
    Event(Job),
    Raw(Vec<u8>),
    Error(Error),
    Stop,
}

#[allow(clippy::too_many_arguments)]
async fn wait_for_wake(
    ticker: &mut tokio::time::Interval,
    update_rx: &mut mpsc::UnboundedReceiver<Job>,
    event_rx: &mut mpsc::UnboundedReceiver<Job>,
    raw_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    error_rx: &mut mpsc::UnboundedReceiver<Error>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Wake {
    tokio::select! {
        _ = ticker.tick() => Wake::Tick,
        job = update_rx.recv() => job.map(Wake::Update).unwrap_or(Wake::Stop),
        job = event_rx.recv() => job.map(Wake::Event).unwrap_or(Wake::Stop),
        bytes = raw_rx.recv() => bytes.map(Wake::Raw).unwrap_or(Wake::Stop),
        err = error_rx.recv() => err.map(Wake::Error).unwrap_or(Wake::Stop),
        _ = stop_rx.changed() => Wake::Stop,
    }
}

impl App {
    /// Runs the cooperative event loop against `root` until the app's stop
    /// signal fires. `root`'s own `render`/`paint` are invoked directly each
    /// dirty tick; nested components it mounts go through the registry.
    pub async fn run(mut self, mut root: Box<dyn Component>) -> Result<(), Error> {
        let mut stop_rx = self.handle.stop_signal();
        let mut ticker = tokio::time::interval(self.config.frame_duration());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.handle.mark_dirty();

        loop {
            match wait_for_wake(
                &mut ticker,
                &mut self.update_rx,
                &mut self.event_rx,
                &mut self.raw_rx,
                &mut self.error_rx,
                &mut stop_rx,
            )
            .await
            {
                Wake::Stop => break,
                Wake::Tick => {}
                Wake::Update(job) => job(),
                Wake::Event(job) => job(),
                Wake::Raw(bytes) => self.input.feed(&bytes),
                Wake::Error(err) => self.log_reported_error(&err),
            }

            // Drain whatever else is already ready: update before event,
            // per the documented ordering.
            while let Ok(job) = self.update_rx.try_recv() {
                job();
            }
            while let Ok(job) = self.event_rx.try_recv() {
                job();
            }
            while let Ok(bytes) = self.raw_rx.try_recv() {
                self.input.feed(&bytes);
            }
            while let Ok(err) = self.error_rx.try_recv() {
                self.log_reported_error(&err);
            }

            if *stop_rx.borrow() {
                break;
            }

            self.tick(root.as_mut());
        }

        Ok(())
    }

    /// Runs one iteration of the loop body: resize polling, input dispatch,
    /// and a render pass if dirty. Exposed for tests that drive input via
    /// [`App::feed_input`] without spinning the async `run` loop.
    pub(crate) fn tick(&mut self, root: &mut dyn Component) {
        self.poll_resize();
        self.dispatch_ready_input();

        if self.handle.take_dirty() {
            self.render_tick(root);
        }
    }

    /// Feeds raw bytes to the input decoder directly, bypassing the reader
    /// thread. For tests built with `spawn_reader: false`.
    #[cfg(test)]
    pub(crate) fn feed_input(&mut self, bytes: &[u8]) {
        self.input.feed(bytes);
    }

    fn log_reported_error(&self, err: &Error) {
        tracing::warn!(error = %err, "app reported a non-fatal error");
    }

    //----------------------------------------------------------------------------------------------
    // Resize
    //----------------------------------------------------------------------------------------------

    fn poll_resize(&mut self) {
        if let Ok((w, h)) = self.terminal.size() {
            if (w, h) != self.last_size {
                self.last_size = (w, h);
                self.input.signal_resize(w, h, Instant::now());
            }
        }
        if let Some(resize) = self.input.poll_resize(Instant::now()) {
            self.apply_resize(resize.width, resize.height);
        }
    }

    fn apply_resize(&mut self, width: u16, height: u16) {
        let mut resize_err = None;
        if let Some(inline) = self.inline.as_mut() {
            if let Err(source) = inline.resize(self.terminal.as_mut(), height, width) {
                resize_err = Some(source);
            }
            self.buffer.resize(width, inline.widget_height());
        } else {
            self.buffer.resize(width, height);
        }
        if let Some(source) = resize_err {
            self.note_write_failure(source);
        }
        self.handle.mark_dirty();
        self.full_redraw = true;
        tracing::debug!(width, height, "terminal resized");
    }

    //----------------------------------------------------------------------------------------------
    // Input dispatch
    //----------------------------------------------------------------------------------------------

    fn dispatch_ready_input(&mut self) {
        for event in self.input.events() {
            match event {
                InputEvent::Key(key) => self.dispatch_key(&key),
                InputEvent::Mouse(mouse) => self.dispatch_mouse(&mouse),
                InputEvent::Resize(resize) => self.apply_resize(resize.width, resize.height),
            }
        }
    }

    fn dispatch_key(&mut self, key: &KeyEvent) {
        let consumed = self.dispatch.dispatch(key);
        if consumed {
            self.handle.mark_dirty();
            return;
        }

        if let Some(handler) = self.config.global_key_handler.as_mut() {
            if handler(key) {
                self.handle.mark_dirty();
                return;
            }
        }

        if let Some(focused) = self.focused {
            if let Some(node) = self.tree.get_mut(focused) {
                if let Some(on_key) = node.hooks.on_key.as_mut() {
                    if on_key(key) {
                        self.handle.mark_dirty();
                    }
                }
            }
        }
    }

    fn dispatch_mouse(&mut self, mouse: &MouseEvent) {
        let Some(root_id) = self.tree.root() else { return };
        let tree = &self.tree;
        let hit = tree.hit_test(root_id, mouse.x, mouse.y, |id| {
            tree.get(id)
                .and_then(|n| n.layout_cache.as_ref())
                .and_then(|b| b.downcast_ref::<(u16, u16, u16, u16)>())
                .copied()
        });

        let Some(id) = hit else { return };
        let key = self.tree.get(id).and_then(|n| n.component.clone());
        let mut consumed = key.as_ref().is_some_and(|key| self.registry.handle_mouse(key, mouse));

        if !consumed {
            if let Some(node) = self.tree.get_mut(id) {
                if let Some(on_mouse) = node.hooks.on_mouse.as_mut() {
                    consumed = on_mouse(mouse);
                }
            }
        }

        if consumed {
            self.handle.mark_dirty();
        }
    }

    //----------------------------------------------------------------------------------------------
    // Render / paint / flush
    //----------------------------------------------------------------------------------------------

    fn render_tick(&mut self, root: &mut dyn Component) {
        self.tree.clear();
        let id = root.render(&self.handle, &mut self.tree);
        self.tree.set_root(id);

        self.reindex_focus(id);

        let bindings = self.collect_key_bindings(id);
        match DispatchTable::build(bindings) {
            Ok(table) => {
                tracing::trace!(entries = table.len(), "dispatch table rebuilt");
                self.dispatch = table;
            }
            Err(err) => {
                tracing::warn!(error = %err, "dispatch table rebuild failed");
                self.handle.report_error(err);
                // Duplicate Stop bindings leave the previous dispatch table
                // in force; the frame itself is aborted rather than painted
                // with a tree whose key bindings we know are broken.
                return;
            }
        }

        if !self.root_watchers_started {
            self.root_watchers_started = true;
            for watcher in root.watchers() {
                let stop = WatcherStop::new(self.handle.stop_signal(), self.root_stop_tx.subscribe());
                tracing::debug!("spawning watcher");
                self.watchers.push(watcher.spawn(self.handle.clone(), stop));
            }
        }

        root.paint(&self.handle, &self.tree, &mut self.buffer);
        self.flush_frame();

        self.registry.sweep();
    }

    fn reindex_focus(&mut self, root: ElementId) {
        let focusables: Vec<ElementId> = self
            .tree
            .dfs(root)
            .into_iter()
            .filter(|&id| self.tree.get(id).map(|n| n.focusable).unwrap_or(false))
            .collect();

        self.focused = self.focused.filter(|id| focusables.contains(id)).or_else(|| focusables.first().copied());

        if let Some(id) = self.focused {
            if let Some(node) = self.tree.get_mut(id) {
                node.focused = true;
            }
        }
    }

    fn collect_key_bindings(&self, root: ElementId) -> Vec<KeyBinding> {
        let mut bindings = Vec::new();
        for id in self.tree.dfs(root) {
            if let Some(key) = self.tree.get(id).and_then(|n| n.component.as_ref()) {
                bindings.extend(self.registry.key_bindings_for(key));
            }
        }
        bindings
    }

    fn flush_frame(&mut self) {
        let result = if self.full_redraw {
            match self.terminal.clear() {
                Ok(()) => {
                    self.full_redraw = false;
                    let changes = self.full_frame_changes();
                    self.write_changes(changes)
                }
                Err(e) => Err(e),
            }
        } else {
            let changes = self.buffer.diff();
            self.write_changes(changes)
        };

        match result {
            Ok(()) => {
                self.write_failures = 0;
                self.buffer.swap();
            }
            Err(source) => self.note_write_failure(source),
        }
    }

    fn full_frame_changes(&self) -> Vec<CellChange> {
        let (width, height) = self.buffer.dimensions();
        let mut changes = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                changes.push(CellChange { x, y, cell: self.buffer.cell(x, y) });
            }
        }
        changes
    }

    fn write_changes(&mut self, changes: Vec<CellChange>) -> std::io::Result<()> {
        let offset = self.inline.as_ref().map(|s| s.widget_start_row()).unwrap_or(0);
        if offset == 0 {
            return self.terminal.flush(&changes);
        }
        let translated: Vec<CellChange> =
            changes.into_iter().map(|c| CellChange { x: c.x, y: c.y + offset, cell: c.cell }).collect();
        self.terminal.flush(&translated)
    }

    fn note_write_failure(&mut self, source: std::io::Error) {
        self.write_failures += 1;
        if self.write_failures > 3 {
            tracing::warn!(failures = self.write_failures, error = %source, "sustained terminal write failures");
        } else {
            tracing::debug!(error = %source, "terminal write failed");
        }
        // The next flush retries as a full redraw rather than trusting
        // `buffer.diff()`, since we can't tell how much of this failed write
        // actually reached the terminal.
        self.full_redraw = true;
        let consecutive_failures = self.write_failures;
        self.handle.report_error(Error::IoWrite { source, consecutive_failures });
    }
}

//--------------------------------------------------------------------------------------------------
// Input reader thread
//--------------------------------------------------------------------------------------------------

/// Bridges blocking stdin reads into the async world: the thread waits for
/// readiness with `crossterm::event::poll` (itself timeout-based), reads
/// whatever bytes are available, and forwards them. Checking `poison`
/// between polls is the interrupt mechanism that lets `App::drop` stop the
/// thread without killing the process.
fn spawn_reader_thread(latency: InputLatency, poison: Arc<AtomicBool>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    std::thread::spawn(move || {
        use std::io::Read;

        let poll_timeout = match latency {
            InputLatency::Poll(d) => d,
            InputLatency::Block => std::time::Duration::from_millis(250),
        };

        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            if poison.load(Ordering::SeqCst) {
                break;
            }
            match crossterm::event::poll(poll_timeout) {
                Ok(true) => match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => continue,
                Err(_) => break,
            }
        }
    });
}

//--------------------------------------------------------------------------------------------------
// Drop
//--------------------------------------------------------------------------------------------------

impl Drop for App {
    fn drop(&mut self) {
        self.reader_poison.store(true, Ordering::SeqCst);
        self.handle.stop();
        let _ = self.root_stop_tx.send(true);

        if let Some(inline) = &self.inline {
            let mut w = crate::escape::EscapeWriter::new();
            w.cursor_down(inline.widget_height());
            let _ = self.terminal.write_direct(w.as_bytes());
        } else {
            let _ = self.terminal.exit_alt_screen();
        }
        if self.config.mouse_enabled {
            let _ = self.terminal.disable_mouse();
        }
        let _ = self.terminal.show_cursor();
        let _ = self.terminal.exit_raw_mode();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{KeyPattern, Propagation};
    use crate::element::{Cleanup, ElementBuilder};
    use crate::input::{Key, Modifier};
    use crate::style::Style;
    use crate::terminal::RecordingTerminal;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct Counter {
        escapes: Arc<AtomicUsize>,
    }

    impl Component for Counter {
        fn render(&mut self, _app: &AppHandle, tree: &mut ElementTree) -> ElementId {
            let escapes = Arc::clone(&self.escapes);
            ElementBuilder::new().focusable(true).on_key(move |_| {
                escapes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                false
            }).build(tree)
        }

        fn key_map(&self) -> Vec<KeyBinding> {
            let escapes = Arc::clone(&self.escapes);
            vec![KeyBinding {
                pattern: KeyPattern::key(Key::Escape),
                propagation: Propagation::Stop,
                handler: Box::new(move |_| {
                    escapes.fetch_add(10, std::sync::atomic::Ordering::SeqCst);
                }),
            }]
        }

        fn paint(&self, _app: &AppHandle, _tree: &ElementTree, buffer: &mut Buffer) {
            buffer.set_string(0, 0, "hi", Style::new());
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn test_app(config: AppConfig) -> App {
        let terminal = Box::new(RecordingTerminal::new(10, 3));
        App::with_terminal(config, terminal, false).unwrap()
    }

    #[test]
    fn first_tick_forces_full_redraw_and_paints() {
        let mut app = test_app(AppConfig::new());
        let mut root: Box<dyn Component> = Box::new(Counter { escapes: Arc::new(AtomicUsize::new(0)) });
        app.tick(root.as_mut());
        assert!(!app.full_redraw, "first render must clear the full-redraw flag");
        assert_eq!(app.buffer.cell(0, 0).rune, 'h');
    }

    #[test]
    fn dispatch_table_stop_handler_suppresses_focused_on_key() {
        let mut app = test_app(AppConfig::new());
        let escapes = Arc::new(AtomicUsize::new(0));
        let mut root: Box<dyn Component> = Box::new(Counter { escapes: Arc::clone(&escapes) });
        app.tick(root.as_mut());

        app.feed_input(b"\x1b");
        app.tick(root.as_mut());

        assert_eq!(escapes.load(std::sync::atomic::Ordering::SeqCst), 10, "only the Stop key-map handler should fire");
    }

    #[test]
    fn resize_marks_dirty_and_requests_full_redraw() {
        let mut app = test_app(AppConfig::new());
        app.full_redraw = false;
        app.apply_resize(20, 5);
        assert!(app.full_redraw);
        assert_eq!(app.buffer.dimensions(), (20, 5));
    }

    #[test]
    fn inline_mode_offsets_writes_below_history() {
        let mut app = test_app(AppConfig::inline(1));
        let mut root: Box<dyn Component> = Box::new(Counter { escapes: Arc::new(AtomicUsize::new(0)) });
        app.tick(root.as_mut());

        let out = {
            let term = &app.terminal;
            // Safety net for the test: downcast isn't available on the trait
            // object, so assert indirectly via the widget's known offset.
            let _ = term;
            app.inline.as_ref().unwrap().widget_start_row()
        };
        assert_eq!(out, 2, "a 1-row widget in a 3-row terminal starts at row 2");
    }

    #[test]
    fn mouse_hit_dispatches_to_registered_component() {
        let mut app = test_app(AppConfig::new());
        let hit_log = Arc::new(Mutex::new(Vec::new()));
        let hit_log2 = Arc::clone(&hit_log);

        struct Clickable {
            log: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Component for Clickable {
            fn render(&mut self, _app: &AppHandle, tree: &mut ElementTree) -> ElementId {
                let log = Arc::clone(&self.log);
                let id = ElementBuilder::new()
                    .on_mouse(move |_| {
                        log.lock().unwrap().push("clicked");
                        true
                    })
                    .build(tree);
                if let Some(node) = tree.get_mut(id) {
                    node.layout_cache = Some(Box::new((0u16, 0u16, 5u16, 1u16)));
                }
                id
            }
            fn init(&mut self, _app: &AppHandle) -> Option<Cleanup> {
                None
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let mut root: Box<dyn Component> = Box::new(Clickable { log: hit_log2 });
        app.tick(root.as_mut());
        app.dispatch_mouse(&MouseEvent {
            button: crate::input::MouseButton::Left,
            action: crate::input::MouseAction::Press,
            x: 2,
            y: 0,
            modifiers: Modifier::empty(),
        });
        assert_eq!(*hit_log.lock().unwrap(), vec!["clicked"]);
    }
}
