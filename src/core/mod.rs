//! # Core Data Model
//!
//! Slices, cuts, colors and the markup they render to. Nothing in here
//! does I/O or knows about threads; producers and the compositor build
//! on top of it.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │         CORE            │
//!                    │  (this module)          │
//!                    │                         │
//!                    │  • Slice / Cut          │
//!                    │  • Color                │
//!                    │  • markup (lemonbar)    │
//!                    │  • config               │
//!                    └───────────┬─────────────┘
//!                                │
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//!     ┌────────────┐      ┌────────────┐      ┌────────────┐
//!     │   slices   │      │    bar     │      │    ipc     │
//!     │ (producers)│      │(compositor)│      │ (i3 events)│
//!     └────────────┘      └────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`slice`]: `Slice`, `Cut`, output masks and truncation
//! - [`color`]: `#AARRGGBB` color parsing
//! - [`markup`]: lemonbar directive formatting
//! - [`config`]: TOML config loading and resolution

pub mod color;
pub mod config;
pub mod markup;
pub mod slice;

pub use color::{Color, ColorError};
pub use slice::{
    Alignment, Cut, CutError, CutId, CutStyle, CutUpdate, NewCut, OutputMask, Slice, SliceStyle,
    truncate,
};
