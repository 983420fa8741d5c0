//! "Now playing" decoration, driven by the playback service.

use tracing::{debug, warn};

use super::MediaTreeView;
use crate::error::ViewResult;
use crate::tree::{NowPlaying, PlaybackEvent};

impl MediaTreeView {
    /// Starts listening when a grid is attached, stops when it goes away.
    pub(super) fn manage_playback_listener(&self, attached: bool) -> ViewResult<()> {
        let Some(playback) = self.playback.clone() else {
            return Ok(());
        };
        if !attached {
            self.stop_playback_listener();
            return Ok(());
        }
        if self.playback_listener.get().is_some() {
            warn!("Tree set but already listening to playback");
            return Ok(());
        }

        let id = playback.add_listener(self.playback_tx.clone());
        self.playback_listener.set(Some(id));
        debug!(?id, "Listening to playback");

        if let Some(now) = playback.now_playing() {
            self.on_track_change(&now)?;
        }
        Ok(())
    }

    pub(super) fn stop_playback_listener(&self) {
        let id = self.playback_listener.take();
        let (Some(playback), Some(id)) = (self.playback.as_ref(), id) else {
            return;
        };
        if !playback.remove_listener(id) {
            debug!(?id, "Playback listener was already gone");
        }
    }

    pub(super) fn handle_playback_event(&self, event: PlaybackEvent) -> ViewResult<()> {
        match event {
            PlaybackEvent::TrackChange(now) => self.on_track_change(&now),
            PlaybackEvent::Stop => {
                self.on_stop();
                Ok(())
            }
        }
    }

    /// Moves the indicator to `now`, or clears it when another list plays.
    pub fn on_track_change(&self, now: &NowPlaying) -> ViewResult<()> {
        let playing = if now.list_guid == self.list_guid {
            match self.host.index_for_view_item_uid(&now.view_item_uid) {
                Some(index) => Some(self.unique_id_for_index(index)?),
                None => None,
            }
        } else {
            None
        };

        debug!(?playing, "Track changed");
        self.playing_id.replace(playing);
        if let Some(tree) = self.tree() {
            tree.invalidate();
        }
        Ok(())
    }

    pub fn on_stop(&self) {
        self.playing_id.replace(None);
        if let Some(tree) = self.tree() {
            tree.invalidate();
        }
    }

    /// Stable identifier of the playing row.
    pub fn playing_id(&self) -> Option<String> {
        self.playing_id.borrow().clone()
    }

    pub(super) fn is_playing(&self, index: u32) -> ViewResult<bool> {
        let Some(playing) = self.playing_id() else {
            return Ok(false);
        };
        Ok(self.unique_id_for_index(index)? == playing)
    }
}
