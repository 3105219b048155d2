use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

use crate::{DecodeService, FrameDecodeLoop, Player, SessionId, Source};

/**
    Owns the players of a wall and hands out their session ids.

    Ids are unique per registry and never reused, including across
    restarts of the same player.
*/
pub struct SessionRegistry<S: DecodeService> {
    decode_loop: FrameDecodeLoop<S>,
    next_id: AtomicU64,
    players: Mutex<Vec<Arc<Player>>>,
}

impl<S: DecodeService> SessionRegistry<S> {
    pub fn new(decode_loop: FrameDecodeLoop<S>) -> Self {
        Self::with_first_id(decode_loop, 1)
    }

    pub fn with_first_id(decode_loop: FrameDecodeLoop<S>, first: u64) -> Self {
        Self {
            decode_loop,
            next_id: AtomicU64::new(first),
            players: Mutex::new(Vec::new()),
        }
    }

    pub fn decode_loop(&self) -> &FrameDecodeLoop<S> {
        &self.decode_loop
    }

    /**
        Start a new player for `source` and keep track of it.
    */
    pub fn spawn(&self, source: impl Into<Source>, looping: bool) -> std::io::Result<Arc<Player>> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let source = source.into();
        info!(session = %id, %source, looping, "spawning player");

        let player = Arc::new(Player::spawn(
            self.decode_loop.clone(),
            id,
            source,
            looping,
        )?);
        self.players.lock().push(Arc::clone(&player));
        Ok(player)
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }

    /// True when every player thread has returned.
    pub fn all_finished(&self) -> bool {
        self.players.lock().iter().all(|player| player.is_finished())
    }

    /**
        Stop every player and wait for all of them.

        All players are signalled first so they wind down in parallel.
    */
    pub fn stop_all(&self) {
        let players = std::mem::take(&mut *self.players.lock());
        for player in &players {
            player.signal_stop();
        }
        for player in &players {
            player.join();
        }
        info!(count = players.len(), "all players stopped");
    }
}

impl<S: DecodeService> Drop for SessionRegistry<S> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::{LoopConfig, PlayerState, SyntheticService};

    fn registry(interval: Duration) -> SessionRegistry<SyntheticService> {
        SessionRegistry::new(FrameDecodeLoop::new(
            SyntheticService::new(),
            LoopConfig::default().with_min_frame_interval(interval),
        ))
    }

    #[test]
    fn ids_are_unique_and_sequential() {
        let registry = registry(Duration::ZERO);
        let ids: Vec<u64> = (0..4)
            .map(|_| {
                registry
                    .spawn("testsrc://4x4?frames=1", false)
                    .unwrap()
                    .id()
                    .get()
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(registry.len(), 4);
        registry.stop_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn custom_first_id() {
        let registry = SessionRegistry::with_first_id(
            FrameDecodeLoop::new(SyntheticService::new(), LoopConfig::default()),
            100,
        );
        let player = registry.spawn("testsrc://4x4?frames=1", false).unwrap();
        assert_eq!(player.id(), SessionId::new(100));
    }

    #[test]
    fn independent_players_share_a_service() {
        let registry = registry(Duration::ZERO);
        let players: Vec<_> = (0..6)
            .map(|i| {
                registry
                    .spawn(format!("testsrc://16x16?frames={}", 5 + i), false)
                    .unwrap()
            })
            .collect();
        for player in &players {
            player.join();
        }
        assert!(registry.all_finished());

        let ids: HashSet<_> = players.iter().map(|p| p.id()).collect();
        assert_eq!(ids.len(), 6);
        for (i, player) in players.iter().enumerate() {
            let snapshot = player.slot().snapshot();
            assert_eq!(snapshot.state, PlayerState::Ended);
            assert_eq!(snapshot.generation, 5 + i as u64);
        }
        assert_eq!(registry.decode_loop().service().live_handles().total(), 0);
    }

    #[test]
    fn stop_all_releases_every_session() {
        let registry = registry(Duration::from_secs(30));
        for _ in 0..4 {
            registry.spawn("testsrc://8x8?frames=50", true).unwrap();
        }
        registry.stop_all();

        let service = registry.decode_loop().service();
        assert_eq!(service.live_handles().total(), 0);
        assert_eq!(service.inputs_opened(), 4);
    }
}
