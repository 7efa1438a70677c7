//! # Bar Markup
//!
//! The lemonbar formatting dialect. Everything the renderer understands
//! is a `%{...}` directive; text between directives is drawn verbatim.
//!
//! ```text
//! %{S0}%{l}%{F#FFEEEEEE}%{B#FF1793D1}%{U#FFFFFFFF} 1 %{r} 12:00 %{F-}%{B-}%{U-}%{-u}%{-o}
//!  │    │   └─ colors of one cut ──────────────────┘ │        └─ frame reset
//!  │    └─ left bucket                               └─ right bucket
//!  └─ output selection (multi-output only)
//! ```

use crate::core::color::Color;
use crate::core::slice::{Alignment, Cut};

pub const COLOR_RESET: &str = "%{F-}%{B-}%{U-}";
pub const ATTR_RESET: &str = "%{-u}%{-o}";

/// Drawn between two cuts of the same slice.
pub const CUT_SEPARATOR: &str = "%{F#FFFFFFFF}%{B#FF000000}|";

/// Urgent cuts ignore their configured colors and use this palette.
pub const ALERT_FG: Color = Color::WHITE;
pub const ALERT_BG: Color = Color::RED;

pub fn align(alignment: Alignment) -> &'static str {
    match alignment {
        Alignment::Left => "%{l}",
        Alignment::Center => "%{c}",
        Alignment::Right => "%{r}",
    }
}

pub fn output(index: usize) -> String {
    format!("%{{S{index}}}")
}

pub fn frame_reset() -> String {
    format!("{COLOR_RESET}{ATTR_RESET}")
}

/// Formats a single cut: colors first, then paired attribute toggles
/// around the text.
pub fn cut(cut: &Cut) -> String {
    let style = cut.style();
    let (fg, bg) = if cut.is_urgent() {
        (ALERT_FG, ALERT_BG)
    } else {
        (style.fg, style.bg)
    };

    let mut out = format!("%{{F{fg}}}%{{B{bg}}}%{{U{}}}", style.hl);
    if style.underline {
        out.push_str("%{+u}");
    }
    if style.overline {
        out.push_str("%{+o}");
    }
    out.push_str(cut.text());
    if style.underline {
        out.push_str("%{-u}");
    }
    if style.overline {
        out.push_str("%{-o}");
    }
    out
}
