use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    DecodeService, FrameDecodeLoop, FrameSlot, PlayerState, SessionEnd, SessionId, Source,
    StopSignal,
};

/**
    One grid cell: a decode loop running on its own thread, feeding a
    [`FrameSlot`].

    Setup failures are reported once through the slot and never retried.
    With `looping` set, an exhausted source is started again from scratch.
    A panic on the decode thread fails the slot like any other error.
*/
pub struct Player {
    id: SessionId,
    source: Source,
    slot: Arc<FrameSlot>,
    stop: StopSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /**
        Start playing `source` on a new thread.
    */
    pub fn spawn<S: DecodeService>(
        decode_loop: FrameDecodeLoop<S>,
        id: SessionId,
        source: Source,
        looping: bool,
    ) -> std::io::Result<Self> {
        let slot = Arc::new(FrameSlot::new());
        let stop = StopSignal::new();

        let handle = {
            let slot = Arc::clone(&slot);
            let stop = stop.clone();
            let source = source.clone();
            thread::Builder::new()
                .name(format!("player-{}", id.get()))
                .spawn(move || {
                    let played = panic::catch_unwind(AssertUnwindSafe(|| {
                        run(decode_loop, id, source, looping, Arc::clone(&slot), stop)
                    }));
                    if played.is_err() {
                        warn!(session = %id, "player thread panicked");
                        slot.fail("player thread panicked");
                    }
                })?
        };

        Ok(Self {
            id,
            source,
            slot,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// True once the player thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    /**
        Ask the decode thread to stop without waiting for it.
    */
    pub fn signal_stop(&self) {
        self.stop.stop();
    }

    /**
        Stop the player and wait for its thread to finish.
    */
    pub fn stop(&self) {
        self.stop.stop();
        self.join();
    }

    /**
        Wait for the player thread to finish on its own.
    */
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(session = %self.id, "player thread panicked");
                self.slot.fail("player thread panicked");
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: DecodeService>(
    decode_loop: FrameDecodeLoop<S>,
    id: SessionId,
    source: Source,
    looping: bool,
    slot: Arc<FrameSlot>,
    stop: StopSignal,
) {
    let mut restarts = 0u64;
    loop {
        let session = match decode_loop.start(id, source.clone(), stop.clone()) {
            Ok(session) => session,
            Err(err) => {
                slot.fail(err.to_string());
                return;
            }
        };

        let report = session.drive(|frame| {
            slot.install(frame.clone());
            ControlFlow::Continue(())
        });

        match report {
            Ok(report) => match report.end {
                SessionEnd::Exhausted if looping && stop.is_stopped() => {
                    slot.set_state(PlayerState::Cancelled);
                    return;
                }
                SessionEnd::Exhausted if looping && report.stats.frames > 0 => {
                    restarts += 1;
                    info!(session = %id, restarts, "restarting");
                    slot.reset();
                }
                SessionEnd::Exhausted => {
                    slot.set_state(PlayerState::Ended);
                    return;
                }
                SessionEnd::Cancelled | SessionEnd::Failed => {
                    slot.set_state(PlayerState::Cancelled);
                    return;
                }
            },
            Err(err) => {
                slot.fail(err.to_string());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::{LoopConfig, SyntheticService};

    fn new_loop(interval: Duration) -> FrameDecodeLoop<SyntheticService> {
        FrameDecodeLoop::new(
            SyntheticService::new(),
            LoopConfig::default().with_min_frame_interval(interval),
        )
    }

    fn wait_until(player: &Player, mut done: impl FnMut(&Player) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(player) {
            assert!(Instant::now() < deadline, "player did not reach state");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn plays_to_the_end_and_keeps_last_frame() {
        let decode_loop = new_loop(Duration::ZERO);
        let player = Player::spawn(
            decode_loop.clone(),
            SessionId::new(1),
            Source::from("testsrc://32x32?frames=10"),
            false,
        )
        .unwrap();
        player.join();

        let snapshot = player.slot().snapshot();
        assert_eq!(snapshot.state, PlayerState::Ended);
        assert_eq!(snapshot.generation, 10);
        assert_eq!(snapshot.frame.unwrap().sequence, 9);
        assert!(player.is_finished());
        assert_eq!(decode_loop.service().live_handles().total(), 0);
    }

    #[test]
    fn setup_failure_shows_placeholder() {
        let decode_loop = new_loop(Duration::ZERO);
        let player = Player::spawn(
            decode_loop.clone(),
            SessionId::new(2),
            Source::from("/missing/clip.mp4"),
            true,
        )
        .unwrap();
        player.join();

        let snapshot = player.slot().snapshot();
        assert!(snapshot.shows_placeholder());
        assert!(matches!(snapshot.state, PlayerState::Failed(_)));
        assert_eq!(decode_loop.service().inputs_opened(), 0);
    }

    #[test]
    fn looping_restarts_the_source() {
        let decode_loop = new_loop(Duration::ZERO);
        let player = Player::spawn(
            decode_loop.clone(),
            SessionId::new(3),
            Source::from("testsrc://8x8?frames=3"),
            true,
        )
        .unwrap();
        wait_until(&player, |p| p.slot().generation() > 9);
        player.stop();

        assert!(decode_loop.service().inputs_opened() >= 4);
        assert_eq!(player.slot().state(), PlayerState::Cancelled);
        assert_eq!(decode_loop.service().live_handles().total(), 0);
    }

    #[test]
    fn stop_interrupts_a_slow_player() {
        let decode_loop = new_loop(Duration::from_secs(30));
        let player = Player::spawn(
            decode_loop.clone(),
            SessionId::new(4),
            Source::from("testsrc://8x8?frames=100"),
            false,
        )
        .unwrap();
        wait_until(&player, |p| p.slot().generation() >= 1);

        let started = Instant::now();
        player.stop();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(player.slot().generation(), 1);
        assert_eq!(player.slot().state(), PlayerState::Cancelled);
        assert_eq!(decode_loop.service().live_handles().total(), 0);
    }

    #[test]
    fn mid_stream_failure_is_reported() {
        let decode_loop = new_loop(Duration::ZERO);
        let player = Player::spawn(
            decode_loop.clone(),
            SessionId::new(5),
            Source::from("testsrc://8x8?frames=5&reconvert=3"),
            false,
        )
        .unwrap();
        player.join();

        let snapshot = player.slot().snapshot();
        assert_eq!(snapshot.generation, 3);
        assert!(matches!(snapshot.state, PlayerState::Failed(_)));
        assert!(snapshot.shows_placeholder());
    }

    #[test]
    fn panic_on_decode_thread_fails_the_slot() {
        let decode_loop = new_loop(Duration::ZERO);
        let player = Player::spawn(
            decode_loop.clone(),
            SessionId::new(6),
            Source::from("testsrc://8x8?frames=10&panic=4"),
            false,
        )
        .unwrap();
        // no join: the slot alone has to show the player is gone
        wait_until(&player, |p| p.is_finished());

        let snapshot = player.slot().snapshot();
        assert!(matches!(snapshot.state, PlayerState::Failed(_)));
        assert!(snapshot.shows_placeholder());
        assert_eq!(snapshot.generation, 4);
        assert_eq!(decode_loop.service().live_handles().total(), 0);
    }
}
