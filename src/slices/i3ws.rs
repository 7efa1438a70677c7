//! # i3 Workspaces
//!
//! One cut per workspace, keyed by the workspace's container id and
//! ordered by its number. Each cut is pinned to the output the workspace
//! lives on, with outputs indexed top-to-bottom then left-to-right.
//!
//! The full list is read once at startup; after that the slice follows
//! workspace events from the shared `EventHub`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Producer, SliceContext, SliceError};
use crate::core::config::SliceConfig;
use crate::core::{Color, CutError, CutUpdate, NewCut, OutputMask, Slice};
use crate::ipc::{ChangeKind, Entity, EventHub, Snapshot, Subject, WorkspaceInfo};

const EVENTS: &[ChangeKind] = &[
    ChangeKind::Focus,
    ChangeKind::Init,
    ChangeKind::Empty,
    ChangeKind::Move,
    ChangeKind::Urgent,
];

/// Output name to display index.
type OutputMap = HashMap<String, usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct WsStyle {
    strip_title: bool,
    fg_focused: Color,
    bg_focused: Color,
    underline_focused: bool,
}

/// A workspace reduced to what its cut needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Workspace {
    id: String,
    label: String,
    order: i64,
    outputs: OutputMask,
    focused: bool,
    urgent: bool,
}

impl Workspace {
    fn from_info(info: &WorkspaceInfo, style: &WsStyle, outputs: &OutputMap) -> Self {
        let (number, label) = strip_name(&info.name, style.strip_title);
        Self {
            id: info.id.to_string(),
            label,
            order: info.num.or(number).unwrap_or(i64::MAX),
            outputs: output_mask(outputs, Some(&info.output)),
            focused: info.focused,
            urgent: info.urgent,
        }
    }

    fn from_entity(entity: &Entity, style: &WsStyle, outputs: &OutputMap) -> Self {
        let (number, label) = strip_name(&entity.label, style.strip_title);
        Self {
            id: entity.id.to_string(),
            label,
            order: entity.order.or(number).unwrap_or(i64::MAX),
            outputs: output_mask(outputs, entity.output.as_deref()),
            focused: entity.focused,
            urgent: entity.urgent,
        }
    }
}

pub struct I3Workspaces {
    hub: Arc<EventHub>,
    style: Arc<WsStyle>,
    outputs: Arc<Mutex<OutputMap>>,
}

impl I3Workspaces {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self {
            hub,
            style: Arc::new(WsStyle {
                strip_title: true,
                fg_focused: Color::BLACK,
                bg_focused: Color::WHITE,
                underline_focused: false,
            }),
            outputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &SliceConfig, hub: Arc<EventHub>) -> Self {
        let mut slice = Self::new(hub);
        slice.style = Arc::new(WsStyle {
            strip_title: config.strip_title.unwrap_or(true),
            fg_focused: config.color_fg_focused.unwrap_or(Color::BLACK),
            bg_focused: config.color_bg_focused.unwrap_or(Color::WHITE),
            underline_focused: config.underline_focused.unwrap_or(false),
        });
        slice
    }

    fn populate(&self, slice: &mut Slice, snapshot: &Snapshot) -> Result<(), CutError> {
        let outputs = output_map(snapshot);
        slice.clear();
        for info in &snapshot.workspaces {
            add(slice, &Workspace::from_info(info, &self.style, &outputs), &self.style)?;
        }
        if let Ok(mut shared) = self.outputs.lock() {
            *shared = outputs;
        }
        Ok(())
    }
}

#[async_trait]
impl Producer for I3Workspaces {
    fn name(&self) -> &str {
        "i3ws"
    }

    async fn update(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        let snapshot = self.hub.snapshot().await?;
        self.populate(slice, &snapshot)?;
        Ok(())
    }

    fn start(&mut self, ctx: SliceContext) -> Result<(), SliceError> {
        let style = self.style.clone();
        let outputs = self.outputs.clone();
        let listener_ctx = ctx.clone();
        self.hub
            .register_listener(Subject::Workspace, EVENTS, move |event| {
                let Ok(map) = outputs.lock() else {
                    return;
                };
                let resolve = |e: &Entity| Workspace::from_entity(e, &style, &map);
                let current = event.current.as_ref().map(resolve);
                let old = event.old.as_ref().map(resolve);
                drop(map);

                let kind = event.kind;
                let style = style.clone();
                listener_ctx.edit(move |slice| apply(slice, kind, current, old, &style));
            });
        self.hub.ensure_started(ctx);
        Ok(())
    }

    async fn stop(&mut self) {
        self.hub.stop();
    }
}

fn apply(
    slice: &mut Slice,
    kind: ChangeKind,
    current: Option<Workspace>,
    old: Option<Workspace>,
    style: &WsStyle,
) -> Result<(), CutError> {
    let Some(mut ws) = current else {
        return Ok(());
    };

    match kind {
        ChangeKind::Focus => {
            ws.focused = true;
            if slice.has_cut(&ws.id) {
                let update = focus_update(slice, true, style);
                slice.update_cut(&ws.id, update)?;
            } else {
                add(slice, &ws, style)?;
            }
            // The previous workspace may already be gone (emptied on leave)
            if let Some(old) = old
                && old.id != ws.id
                && slice.has_cut(&old.id)
            {
                let update = focus_update(slice, false, style);
                slice.update_cut(&old.id, update)?;
            }
        }
        ChangeKind::Init if !slice.has_cut(&ws.id) => add(slice, &ws, style)?,
        ChangeKind::Empty if slice.has_cut(&ws.id) => slice.delete_cut(&ws.id)?,
        ChangeKind::Move if slice.has_cut(&ws.id) => {
            slice.update_cut(&ws.id, CutUpdate::default().outputs(ws.outputs))?
        }
        ChangeKind::Urgent if slice.has_cut(&ws.id) => {
            slice.update_cut(&ws.id, CutUpdate::default().urgent(ws.urgent))?
        }
        _ => {}
    }
    Ok(())
}

fn add(slice: &mut Slice, ws: &Workspace, style: &WsStyle) -> Result<(), CutError> {
    let mut cut = NewCut::new(ws.id.clone(), ws.label.clone())
        .order(ws.order)
        .outputs(ws.outputs)
        .urgent(ws.urgent);
    if ws.focused {
        cut = cut
            .fg(style.fg_focused)
            .bg(style.bg_focused)
            .underline(style.underline_focused);
    }
    slice.add_cut(cut)
}

fn focus_update(slice: &Slice, focused: bool, style: &WsStyle) -> CutUpdate {
    if focused {
        CutUpdate::default()
            .fg(style.fg_focused)
            .bg(style.bg_focused)
            .underline(style.underline_focused)
    } else {
        let base = slice.style().cut_style();
        CutUpdate::default()
            .fg(base.fg)
            .bg(base.bg)
            .underline(base.underline)
    }
}

fn output_map(snapshot: &Snapshot) -> OutputMap {
    snapshot
        .ordered_outputs()
        .into_iter()
        .enumerate()
        .map(|(index, output)| (output.name.clone(), index))
        .collect()
}

fn output_mask(outputs: &OutputMap, name: Option<&str>) -> OutputMask {
    name.and_then(|n| outputs.get(n))
        .map(|&index| OutputMask::from_index(index))
        .unwrap_or(OutputMask::ALL)
}

/// Splits `"3: web"` into `(Some(3), "web")`. A name with nothing after
/// the number is labeled by the number; one without a number keeps its
/// name.
fn strip_name(name: &str, strip: bool) -> (Option<i64>, String) {
    let trimmed = name.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, rest) = trimmed.split_at(digits_end);
    let number = digits.parse().ok();
    if !strip {
        return (number, trimmed.to_string());
    }

    let title = rest.strip_prefix(':').unwrap_or(rest).trim();
    let label = if !title.is_empty() {
        title
    } else if !digits.is_empty() {
        digits
    } else {
        trimmed
    };
    (number, label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SliceStyle;
    use crate::ipc::{ChangeEvent, OutputInfo, RetryPolicy};
    use crate::slices::Message;
    use crate::test_support::{ScriptedSource, workspace_event};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn style() -> WsStyle {
        WsStyle {
            strip_title: true,
            fg_focused: Color::BLACK,
            bg_focused: Color::WHITE,
            underline_focused: true,
        }
    }

    fn ws(id: i64, label: &str, order: i64) -> Workspace {
        Workspace {
            id: id.to_string(),
            label: label.into(),
            order,
            outputs: OutputMask::ALL,
            focused: false,
            urgent: false,
        }
    }

    fn snapshot() -> Snapshot {
        let info = |id, name: &str, num, output: &str, focused| WorkspaceInfo {
            id,
            name: name.into(),
            num,
            output: output.into(),
            focused,
            urgent: false,
        };
        Snapshot {
            workspaces: vec![
                info(12, "2:mail", Some(2), "HDMI-1", false),
                info(11, "1:web", Some(1), "eDP-1", true),
                info(13, "music", None, "eDP-1", false),
            ],
            outputs: vec![
                OutputInfo {
                    name: "HDMI-1".into(),
                    active: true,
                    x: 1920,
                    y: 0,
                },
                OutputInfo {
                    name: "eDP-1".into(),
                    active: true,
                    x: 0,
                    y: 0,
                },
                OutputInfo {
                    name: "xroot-0".into(),
                    active: false,
                    x: 0,
                    y: 0,
                },
            ],
            focused_title: None,
        }
    }

    fn hub(source: ScriptedSource) -> Arc<EventHub> {
        Arc::new(EventHub::new(
            Arc::new(source),
            RetryPolicy {
                attempts: 1,
                backoff: Duration::from_millis(1),
            },
        ))
    }

    fn labels(slice: &Slice) -> Vec<String> {
        slice.cuts().iter().map(|c| c.text().trim().to_string()).collect()
    }

    #[test]
    fn test_strip_name() {
        assert_eq!(strip_name("1:web", true), (Some(1), "web".into()));
        // Only a colon directly after the number is stripped
        assert_eq!(strip_name(" 3 : mail ", true), (Some(3), ": mail".into()));
        assert_eq!(strip_name("4", true), (Some(4), "4".into()));
        assert_eq!(strip_name("music", true), (None, "music".into()));
        assert_eq!(strip_name("1:web", false), (Some(1), "1:web".into()));
    }

    #[test]
    fn test_populate_orders_by_number_and_pins_outputs() {
        let workspaces = I3Workspaces::new(hub(ScriptedSource::new(vec![])));
        let mut slice = Slice::new("i3ws", SliceStyle::default());
        workspaces.populate(&mut slice, &snapshot()).unwrap();

        assert_eq!(labels(&slice), vec!["web", "mail", "music"]);
        // eDP-1 is leftmost, so it is output 0
        let web = slice.cut("11").unwrap();
        assert_eq!(web.outputs(), OutputMask::from_index(0));
        assert_eq!(web.style().fg, Color::BLACK);
        assert_eq!(web.style().bg, Color::WHITE);
        assert_eq!(slice.cut("12").unwrap().outputs(), OutputMask::from_index(1));

        assert_eq!(slice.render(0).len(), 2);
        assert_eq!(slice.render(1).len(), 1);
    }

    #[test]
    fn test_populate_replaces_previous_cuts() {
        let workspaces = I3Workspaces::new(hub(ScriptedSource::new(vec![])));
        let mut slice = Slice::new("i3ws", SliceStyle::default());
        slice.add_cut(NewCut::new("stale", "x")).unwrap();
        workspaces.populate(&mut slice, &snapshot()).unwrap();
        assert!(!slice.has_cut("stale"));
    }

    #[test]
    fn test_focus_moves_highlight() {
        let style = style();
        let mut slice = Slice::new("i3ws", SliceStyle::default());
        let mut one = ws(1, "one", 1);
        one.focused = true;
        add(&mut slice, &one, &style).unwrap();
        add(&mut slice, &ws(2, "two", 2), &style).unwrap();

        apply(
            &mut slice,
            ChangeKind::Focus,
            Some(ws(2, "two", 2)),
            Some(ws(1, "one", 1)),
            &style,
        )
        .unwrap();

        let two = slice.cut("2").unwrap();
        assert_eq!(two.style().fg, Color::BLACK);
        assert!(two.style().underline);
        let one = slice.cut("1").unwrap();
        assert_eq!(one.style().fg, Color::WHITE);
        assert_eq!(one.style().bg, Color::BLACK);
        assert!(!one.style().underline);
    }

    #[test]
    fn test_focus_with_destroyed_old_workspace() {
        let style = style();
        let mut slice = Slice::new("i3ws", SliceStyle::default());
        add(&mut slice, &ws(2, "two", 2), &style).unwrap();
        apply(
            &mut slice,
            ChangeKind::Focus,
            Some(ws(2, "two", 2)),
            Some(ws(9, "gone", 9)),
            &style,
        )
        .unwrap();
        assert_eq!(slice.cuts().len(), 1);
    }

    #[test]
    fn test_init_empty_move_urgent() {
        let style = style();
        let mut slice = Slice::new("i3ws", SliceStyle::default());

        apply(&mut slice, ChangeKind::Init, Some(ws(5, "five", 5)), None, &style).unwrap();
        apply(&mut slice, ChangeKind::Init, Some(ws(3, "three", 3)), None, &style).unwrap();
        // Repeated init is ignored
        apply(&mut slice, ChangeKind::Init, Some(ws(3, "three", 3)), None, &style).unwrap();
        assert_eq!(labels(&slice), vec!["three", "five"]);

        let mut moved = ws(5, "five", 5);
        moved.outputs = OutputMask::from_index(1);
        apply(&mut slice, ChangeKind::Move, Some(moved), None, &style).unwrap();
        assert_eq!(slice.cut("5").unwrap().outputs(), OutputMask::from_index(1));

        let mut urgent = ws(3, "three", 3);
        urgent.urgent = true;
        apply(&mut slice, ChangeKind::Urgent, Some(urgent), None, &style).unwrap();
        assert!(slice.cut("3").unwrap().is_urgent());

        apply(&mut slice, ChangeKind::Empty, Some(ws(3, "three", 3)), None, &style).unwrap();
        assert_eq!(labels(&slice), vec!["five"]);
        // Unknown workspaces are ignored
        apply(&mut slice, ChangeKind::Empty, Some(ws(8, "x", 8)), None, &style).unwrap();
    }

    #[tokio::test]
    async fn test_events_reach_slice_through_context() {
        let event: ChangeEvent = workspace_event(ChangeKind::Init, 42, "7:chat");
        let source = ScriptedSource::new(vec![vec![event]]).with_snapshot(snapshot());
        let mut producer = I3Workspaces::new(hub(source));
        let mut slice = Slice::new("i3ws", SliceStyle::default());
        producer.update(&mut slice).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        producer.start(SliceContext::new(0, "i3ws", &tx)).unwrap();
        match rx.recv().await {
            Some(Message::Edit { edit, .. }) => edit(&mut slice).unwrap(),
            other => panic!("expected edit, got {other:?}"),
        }
        assert_eq!(labels(&slice), vec!["web", "mail", "chat", "music"]);
        producer.stop().await;
    }
}
