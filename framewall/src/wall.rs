use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use frameloop::{DecodeService, FrameDecodeLoop, Player, PlayerState, SessionRegistry, SlotSnapshot};
use tracing::{info, warn};

use crate::snapshot;

/**
    Counts of players per state, taken on one refresh tick.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WallStatus {
    pub loading: usize,
    pub playing: usize,
    pub ended: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl WallStatus {
    /// True when no player will produce another frame.
    pub fn is_idle(&self) -> bool {
        self.loading == 0 && self.playing == 0
    }
}

/**
    A grid of players all showing the same source.

    The wall only reads player slots; it never touches decode sessions.
*/
pub struct Wall<S: DecodeService> {
    registry: SessionRegistry<S>,
    players: Vec<Arc<Player>>,
    columns: usize,
    last_states: Vec<PlayerState>,
}

impl<S: DecodeService> Wall<S> {
    pub fn start(
        decode_loop: FrameDecodeLoop<S>,
        source: &str,
        count: usize,
        columns: usize,
        looping: bool,
    ) -> Result<Self> {
        let registry = SessionRegistry::new(decode_loop);
        let players = (0..count)
            .map(|_| registry.spawn(source, looping))
            .collect::<Result<Vec<_>, _>>()?;
        info!(players = count, columns, source, "wall started");

        Ok(Self {
            registry,
            last_states: vec![PlayerState::Loading; players.len()],
            players,
            columns: columns.max(1),
        })
    }

    pub fn players(&self) -> &[Arc<Player>] {
        &self.players
    }

    /**
        Read every slot once, log state changes, and return the totals.
    */
    pub fn poll(&mut self) -> WallStatus {
        let mut status = WallStatus::default();
        for (player, last) in self.players.iter().zip(self.last_states.iter_mut()) {
            let snapshot = player.slot().snapshot();
            match &snapshot.state {
                PlayerState::Loading => status.loading += 1,
                PlayerState::Playing => status.playing += 1,
                PlayerState::Ended => status.ended += 1,
                PlayerState::Cancelled => status.cancelled += 1,
                PlayerState::Failed(_) => status.failed += 1,
            }
            if snapshot.state != *last {
                match &snapshot.state {
                    PlayerState::Failed(reason) => {
                        warn!(session = %player.id(), %reason, "player failed")
                    }
                    state => info!(session = %player.id(), ?state, frames = snapshot.generation, "player state"),
                }
                *last = snapshot.state;
            }
        }
        status
    }

    /**
        Render the grid as text, one line per row.
    */
    pub fn rows(&self) -> Vec<String> {
        self.players
            .chunks(self.columns)
            .map(|row| {
                row.iter()
                    .map(|player| cell_label(&player.slot().snapshot()))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /**
        Save the frame each player currently shows. Players showing a
        placeholder are skipped.
    */
    pub fn save_snapshots(&self, dir: &Path) -> Result<usize> {
        let mut saved = 0;
        for player in &self.players {
            let snapshot = player.slot().snapshot();
            if snapshot.shows_placeholder() {
                continue;
            }
            if let Some(frame) = &snapshot.frame {
                let path = snapshot::save_png(dir, player.id(), frame)?;
                info!(session = %player.id(), path = %path.display(), "snapshot saved");
                saved += 1;
            }
        }
        Ok(saved)
    }

    pub fn stop(&self) {
        self.registry.stop_all();
    }
}

fn cell_label(snapshot: &SlotSnapshot) -> String {
    let frame = snapshot
        .frame
        .as_ref()
        .map(|f| format!("{}x{} #{}", f.width, f.height, f.sequence));
    let state = match &snapshot.state {
        PlayerState::Loading => "loading",
        PlayerState::Playing => "playing",
        PlayerState::Ended => "ended",
        PlayerState::Cancelled => "stopped",
        PlayerState::Failed(_) => "failed",
    };
    match frame {
        Some(frame) if !snapshot.shows_placeholder() => format!("[{state:>7} {frame:>14}]"),
        _ => format!("[{state:>7} {:>14}]", "-"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use frameloop::{LoopConfig, SyntheticService};

    use super::*;

    fn new_loop() -> FrameDecodeLoop<SyntheticService> {
        FrameDecodeLoop::new(
            SyntheticService::new(),
            LoopConfig::default().with_min_frame_interval(Duration::ZERO),
        )
    }

    fn wait(wall: &Wall<SyntheticService>) {
        for player in wall.players() {
            player.join();
        }
    }

    #[test]
    fn grid_rows_follow_columns() {
        let mut wall = Wall::start(new_loop(), "testsrc://16x8?frames=4", 5, 2, false).unwrap();
        wait(&wall);

        let rows = wall.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].matches('[').count(), 2);
        assert_eq!(rows[2].matches('[').count(), 1);
        assert!(rows[0].contains("ended"));
        assert!(rows[0].contains("16x8 #3"));

        let status = wall.poll();
        assert_eq!(status.ended, 5);
        assert!(status.is_idle());
    }

    #[test]
    fn failed_players_show_placeholders() {
        let mut wall = Wall::start(new_loop(), "/missing/clip.mp4", 2, 3, true).unwrap();
        wait(&wall);

        let status = wall.poll();
        assert_eq!(status.failed, 2);
        assert!(status.is_idle());
        assert!(wall.rows()[0].contains("failed"));

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(wall.save_snapshots(dir.path()).unwrap(), 0);
    }

    #[test]
    fn saves_one_snapshot_per_player() {
        let wall = Wall::start(new_loop(), "testsrc://8x8?frames=2", 3, 3, false).unwrap();
        wait(&wall);

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(wall.save_snapshots(dir.path()).unwrap(), 3);
        assert!(dir.path().join("player-01.png").exists());
        assert!(dir.path().join("player-03.png").exists());
        wall.stop();
    }
}
