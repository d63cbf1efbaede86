//! # tuicore
//!
//! A double-buffered cell grid, an ANSI/VT input decoder, and a reactive
//! event-dispatch engine for building terminal UIs.
//!
//! ## Architecture Overview
//!
//! ```text
//!     ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//!     │ InputDecoder │────▶│ DispatchTable│────▶│  Component  │
//!     │ (ANSI bytes) │     │  (key_map)   │     │   ::render  │
//!     └─────────────┘     └──────────────┘     └─────────────┘
//!                                                      │
//!                                                      ▼
//!     ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//!     │   Terminal   │◀────│    Buffer    │◀────│ElementTree  │
//!     │ (flush diff) │     │ (double-buf) │     │  ::paint    │
//!     └─────────────┘     └──────────────┘     └─────────────┘
//! ```
//!
//! `State<T>` and `EventBus<T>` give components reactive values and fan-out
//! events; `Watcher` schedules background producers tied to the app's and the
//! current root's stop signals; `MountRegistry` keeps nested component
//! instances alive across re-renders. `InlineSession` lets an `App` run as a
//! bottom-anchored widget over scrolling history instead of taking the whole
//! alternate screen.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tuicore::{App, AppConfig};
//! use tuicore::element::{Component, ElementBuilder, ElementId, ElementTree};
//! use tuicore::state::AppHandle;
//! use std::any::Any;
//!
//! struct Hello;
//!
//! impl Component for Hello {
//!     fn render(&mut self, _app: &AppHandle, tree: &mut ElementTree) -> ElementId {
//!         ElementBuilder::new().build(tree)
//!     }
//!
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tuicore::Error> {
//!     let app = App::new(AppConfig::new())?;
//!     app.run(Box::new(Hello)).await
//! }
//! ```

//--------------------------------------------------------------------------------------------------
// Modules
//--------------------------------------------------------------------------------------------------

/// Error taxonomy for the crate.
pub mod error;

/// Styling primitives: colors, attributes, and the combined `Style`.
pub mod style;

/// Append-only ANSI/VT escape sequence byte builder.
pub mod escape;

/// Double buffering and cell-level diffing for flicker-free rendering.
pub mod buffer;

/// The `Terminal` abstraction and its `crossterm`/in-memory implementations.
pub mod terminal;

/// ANSI/VT input decoding: keyboard, SGR mouse, and debounced resize.
pub mod input;

/// Key dispatch: flattened, tree-ordered key bindings and their matching rules.
pub mod dispatch;

/// The retained element tree and the `Component` trait.
pub mod element;

/// Mount reconciliation: per-slot component identity across re-renders.
pub mod mount;

/// Reactive primitives: `State<T>`, `EventBus<T>`, `Watcher`, `AppHandle`.
pub mod state;

/// Inline-mode terminal surface management.
pub mod inline;

/// The application orchestrator: terminal setup and the event loop.
pub mod app;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use app::{App, AppConfig};
pub use buffer::{Buffer, Cell, CellChange};
pub use dispatch::{DispatchTable, KeyBinding, KeyPattern, Propagation};
pub use element::{Component, ElementBuilder, ElementId, ElementTree};
pub use error::Error;
pub use input::{InputDecoder, InputEvent, Key, KeyEvent, Modifier, MouseButton, MouseEvent};
pub use inline::{InlineSession, StartupPolicy};
pub use mount::MountRegistry;
pub use state::{AppHandle, EventBus, State, Watcher};
pub use style::{Attributes, Color, Style};
pub use terminal::{CrosstermTerminal, RecordingTerminal, Terminal};
