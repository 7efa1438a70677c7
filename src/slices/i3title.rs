use async_trait::async_trait;
use std::sync::Arc;

use super::{Producer, SliceContext, SliceError};
use crate::core::config::SliceConfig;
use crate::core::{CutUpdate, NewCut, Slice, truncate};
use crate::ipc::{ChangeEvent, ChangeKind, EventHub, Subject};

const CUT_ID: &str = "title";

/// Title of the focused window.
pub struct I3Title {
    hub: Arc<EventHub>,
    max_length: Option<usize>,
    ellipsis: Arc<str>,
}

impl I3Title {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self {
            hub,
            max_length: None,
            ellipsis: Arc::from(""),
        }
    }

    pub fn from_config(config: &SliceConfig, hub: Arc<EventHub>) -> Self {
        Self {
            hub,
            max_length: config.max_length,
            ellipsis: Arc::from(config.ellipsis.as_deref().unwrap_or("")),
        }
    }
}

/// New title for the cut, or `None` when the event leaves it unchanged.
fn title_for(event: &ChangeEvent) -> Option<String> {
    let entity = event.current.as_ref()?;
    match (event.subject, event.kind) {
        (Subject::Workspace, ChangeKind::Focus) if entity.empty => Some(String::new()),
        (Subject::Window, ChangeKind::Focus) => Some(entity.label.clone()),
        (Subject::Window, ChangeKind::Title | ChangeKind::Move) if entity.focused => {
            Some(entity.label.clone())
        }
        (Subject::Window, ChangeKind::Close) if entity.focused => Some(String::new()),
        _ => None,
    }
}

#[async_trait]
impl Producer for I3Title {
    fn name(&self) -> &str {
        "i3title"
    }

    fn init(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        slice.add_cut(NewCut::new(CUT_ID, ""))?;
        Ok(())
    }

    async fn update(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        let snapshot = self.hub.snapshot().await?;
        let title = snapshot.focused_title.unwrap_or_default();
        let text = truncate(&title, self.max_length, &self.ellipsis);
        slice.update_cut(CUT_ID, CutUpdate::default().text(text))?;
        Ok(())
    }

    fn start(&mut self, ctx: SliceContext) -> Result<(), SliceError> {
        for (subject, kinds) in [
            (Subject::Workspace, &[ChangeKind::Focus][..]),
            (
                Subject::Window,
                &[
                    ChangeKind::Focus,
                    ChangeKind::Close,
                    ChangeKind::Move,
                    ChangeKind::Title,
                ][..],
            ),
        ] {
            let listener_ctx = ctx.clone();
            let max_length = self.max_length;
            let ellipsis = self.ellipsis.clone();
            self.hub.register_listener(subject, kinds, move |event| {
                if let Some(title) = title_for(event) {
                    let text = truncate(&title, max_length, &ellipsis);
                    listener_ctx
                        .edit(move |slice| slice.update_cut(CUT_ID, CutUpdate::default().text(text)));
                }
            });
        }
        self.hub.ensure_started(ctx);
        Ok(())
    }

    async fn stop(&mut self) {
        self.hub.stop();
    }
}
