//! # Slices and Cuts
//!
//! A `Slice` is one independently updating piece of the status line.
//! It owns an ordered list of `Cut`s, the styled text spans it shows.
//!
//! ```text
//! Slice "i3ws" (align: left, outputs: all)
//! ├── Cut "94" order=1  " web "
//! ├── Cut "95" order=2  " code "   ← focused colors
//! └── Cut "97" order=5  " chat "   ← urgent, output 1 only
//! ```
//!
//! Cuts are kept sorted by `order`, ties broken by insertion order.
//! Only the owning slice ever mutates its cuts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::color::Color;
use crate::core::markup;

pub type CutId = String;

/// Highest number of physical outputs an `OutputMask` can address.
pub const MAX_OUTPUTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    pub const ALL: [Alignment; 3] = [Alignment::Left, Alignment::Center, Alignment::Right];
}

/// Bitset over physical outputs; bit `i` set means "shown on output `i`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputMask(u32);

impl OutputMask {
    pub const ALL: OutputMask = OutputMask(u32::MAX);
    pub const NONE: OutputMask = OutputMask(0);

    pub fn from_index(index: usize) -> Self {
        OutputMask(1u32.checked_shl(index as u32).unwrap_or(0))
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        indices
            .into_iter()
            .fold(OutputMask::NONE, |mask, i| mask.union(OutputMask::from_index(i)))
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_OUTPUTS && self.0 & (1 << index) != 0
    }

    pub fn intersect(self, other: OutputMask) -> Self {
        OutputMask(self.0 & other.0)
    }

    pub fn union(self, other: OutputMask) -> Self {
        OutputMask(self.0 | other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Default for OutputMask {
    fn default() -> Self {
        OutputMask::ALL
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Cut addressing errors. Both indicate a bug in the slice that raised
/// them, so the compositor treats them as fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutError {
    DuplicateId(CutId),
    NotFound(CutId),
}

impl fmt::Display for CutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutError::DuplicateId(id) => write!(f, "cut '{id}' already exists"),
            CutError::NotFound(id) => write!(f, "cannot find cut with id '{id}'"),
        }
    }
}

impl std::error::Error for CutError {}

// ============================================================================
// Styles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutStyle {
    pub fg: Color,
    pub bg: Color,
    pub hl: Color,
    pub underline: bool,
    pub overline: bool,
}

/// Per-slice defaults. Cuts inherit anything they don't override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceStyle {
    pub align: Alignment,
    pub outputs: OutputMask,
    pub fg: Color,
    pub bg: Color,
    pub hl: Color,
    pub underline: bool,
    pub overline: bool,
}

impl Default for SliceStyle {
    fn default() -> Self {
        Self {
            align: Alignment::Left,
            outputs: OutputMask::ALL,
            fg: Color::WHITE,
            bg: Color::BLACK,
            hl: Color::WHITE,
            underline: false,
            overline: false,
        }
    }
}

impl SliceStyle {
    pub fn cut_style(&self) -> CutStyle {
        CutStyle {
            fg: self.fg,
            bg: self.bg,
            hl: self.hl,
            underline: self.underline,
            overline: self.overline,
        }
    }
}

// ============================================================================
// Cut
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cut {
    id: CutId,
    text: String,
    style: CutStyle,
    urgent: bool,
    outputs: OutputMask,
    /// When set, `outputs` replaces the slice mask instead of narrowing it.
    override_outputs: bool,
    order: i64,
    seq: u64,
}

impl Cut {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stored text, including the one-space margin on each side.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn style(&self) -> &CutStyle {
        &self.style
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    pub fn outputs(&self) -> OutputMask {
        self.outputs
    }

    pub fn effective_outputs(&self, slice_mask: OutputMask) -> OutputMask {
        if self.override_outputs {
            self.outputs
        } else {
            self.outputs.intersect(slice_mask)
        }
    }

    fn sort_key(&self) -> (i64, u64) {
        (self.order, self.seq)
    }
}

fn pad(text: &str) -> String {
    format!(" {text} ")
}

/// Everything needed to create a cut; unset style fields fall back to
/// the owning slice's defaults.
#[derive(Debug, Clone)]
pub struct NewCut {
    id: CutId,
    text: String,
    fg: Option<Color>,
    bg: Option<Color>,
    hl: Option<Color>,
    underline: Option<bool>,
    overline: Option<bool>,
    urgent: bool,
    order: i64,
    outputs: Option<OutputMask>,
    override_outputs: bool,
    raw: bool,
}

impl NewCut {
    pub fn new(id: impl Into<CutId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            fg: None,
            bg: None,
            hl: None,
            underline: None,
            overline: None,
            urgent: false,
            order: 0,
            outputs: None,
            override_outputs: false,
            raw: false,
        }
    }

    pub fn fg(mut self, color: Color) -> Self {
        self.fg = Some(color);
        self
    }

    pub fn bg(mut self, color: Color) -> Self {
        self.bg = Some(color);
        self
    }

    pub fn hl(mut self, color: Color) -> Self {
        self.hl = Some(color);
        self
    }

    pub fn underline(mut self, on: bool) -> Self {
        self.underline = Some(on);
        self
    }

    pub fn overline(mut self, on: bool) -> Self {
        self.overline = Some(on);
        self
    }

    pub fn urgent(mut self, on: bool) -> Self {
        self.urgent = on;
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Narrows the cut to `mask` (intersected with the slice mask).
    pub fn outputs(mut self, mask: OutputMask) -> Self {
        self.outputs = Some(mask);
        self
    }

    /// Shows the cut on exactly `mask`, ignoring the slice mask.
    pub fn only_outputs(mut self, mask: OutputMask) -> Self {
        self.outputs = Some(mask);
        self.override_outputs = true;
        self
    }

    /// Stores the text as given, without margin or trimming.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }
}

/// Partial update: only the fields that are set change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutUpdate {
    text: Option<String>,
    fg: Option<Color>,
    bg: Option<Color>,
    hl: Option<Color>,
    underline: Option<bool>,
    overline: Option<bool>,
    urgent: Option<bool>,
    order: Option<i64>,
    outputs: Option<OutputMask>,
}

impl CutUpdate {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn fg(mut self, color: Color) -> Self {
        self.fg = Some(color);
        self
    }

    pub fn bg(mut self, color: Color) -> Self {
        self.bg = Some(color);
        self
    }

    pub fn hl(mut self, color: Color) -> Self {
        self.hl = Some(color);
        self
    }

    pub fn underline(mut self, on: bool) -> Self {
        self.underline = Some(on);
        self
    }

    pub fn overline(mut self, on: bool) -> Self {
        self.overline = Some(on);
        self
    }

    pub fn urgent(mut self, on: bool) -> Self {
        self.urgent = Some(on);
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn outputs(mut self, mask: OutputMask) -> Self {
        self.outputs = Some(mask);
        self
    }
}

// ============================================================================
// Slice
// ============================================================================

#[derive(Debug, Clone)]
pub struct Slice {
    name: String,
    style: SliceStyle,
    cuts: Vec<Cut>,
    next_seq: u64,
}

impl Slice {
    pub fn new(name: impl Into<String>, style: SliceStyle) -> Self {
        Self {
            name: name.into(),
            style,
            cuts: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn style(&self) -> &SliceStyle {
        &self.style
    }

    pub fn align(&self) -> Alignment {
        self.style.align
    }

    pub fn outputs(&self) -> OutputMask {
        self.style.outputs
    }

    /// Live cuts in render order.
    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    pub fn cut(&self, id: &str) -> Option<&Cut> {
        self.cuts.iter().find(|c| c.id == id)
    }

    pub fn has_cut(&self, id: &str) -> bool {
        self.cut(id).is_some()
    }

    pub fn add_cut(&mut self, new: NewCut) -> Result<(), CutError> {
        if self.has_cut(&new.id) {
            return Err(CutError::DuplicateId(new.id));
        }

        let defaults = self.style.cut_style();
        let text = if new.raw {
            new.text
        } else {
            pad(new.text.trim())
        };
        let cut = Cut {
            id: new.id,
            text,
            style: CutStyle {
                fg: new.fg.unwrap_or(defaults.fg),
                bg: new.bg.unwrap_or(defaults.bg),
                hl: new.hl.unwrap_or(defaults.hl),
                underline: new.underline.unwrap_or(defaults.underline),
                overline: new.overline.unwrap_or(defaults.overline),
            },
            urgent: new.urgent,
            outputs: new.outputs.unwrap_or(OutputMask::ALL),
            override_outputs: new.override_outputs,
            order: new.order,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.insert_sorted(cut);
        Ok(())
    }

    pub fn update_cut(&mut self, id: &str, update: CutUpdate) -> Result<(), CutError> {
        let index = self.position(id)?;

        let reorder = update.order.is_some_and(|o| o != self.cuts[index].order);
        let cut = &mut self.cuts[index];
        if let Some(text) = update.text {
            cut.text = pad(&text);
        }
        if let Some(fg) = update.fg {
            cut.style.fg = fg;
        }
        if let Some(bg) = update.bg {
            cut.style.bg = bg;
        }
        if let Some(hl) = update.hl {
            cut.style.hl = hl;
        }
        if let Some(underline) = update.underline {
            cut.style.underline = underline;
        }
        if let Some(overline) = update.overline {
            cut.style.overline = overline;
        }
        if let Some(urgent) = update.urgent {
            cut.urgent = urgent;
        }
        if let Some(outputs) = update.outputs {
            cut.outputs = outputs;
        }

        if reorder && let Some(order) = update.order {
            let mut cut = self.cuts.remove(index);
            cut.order = order;
            self.insert_sorted(cut);
        }
        Ok(())
    }

    pub fn delete_cut(&mut self, id: &str) -> Result<(), CutError> {
        let index = self.position(id)?;
        self.cuts.remove(index);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.cuts.clear();
    }

    /// Formatted spans of every cut visible on `output`, in order.
    pub fn render(&self, output: usize) -> Vec<String> {
        self.cuts
            .iter()
            .filter(|c| c.effective_outputs(self.style.outputs).contains(output))
            .map(markup::cut)
            .collect()
    }

    /// The slice's contribution to one output, cuts joined by the separator.
    pub fn render_joined(&self, output: usize) -> String {
        self.render(output).join(markup::CUT_SEPARATOR)
    }

    fn position(&self, id: &str) -> Result<usize, CutError> {
        self.cuts
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| CutError::NotFound(id.to_string()))
    }

    fn insert_sorted(&mut self, cut: Cut) {
        let key = cut.sort_key();
        let index = self.cuts.partition_point(|c| c.sort_key() < key);
        self.cuts.insert(index, cut);
    }
}

// ============================================================================
// Truncation
// ============================================================================

/// Shortens `text` to `max_length` characters, strips trailing whitespace
/// and appends `ellipsis`. Text within the limit is returned unchanged.
pub fn truncate(text: &str, max_length: Option<usize>, ellipsis: &str) -> String {
    match max_length {
        Some(max) if text.chars().count() > max => {
            let head: String = text.chars().take(max).collect();
            format!("{}{ellipsis}", head.trim_end())
        }
        _ => text.to_string(),
    }
}
