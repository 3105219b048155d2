/*!
    A running decode session and the native handles it owns.
*/

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
    DecodeService, Frame, LoopConfig, Source, StopSignal, StreamInfo,
    error::{DecodeError, DecodeResult, ServiceError},
};

/**
    Identifier of one decode session, used in logs and errors.

    Handed out by whoever starts sessions (usually a
    [`SessionRegistry`](crate::SessionRegistry)).
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/**
    Counters kept while a session runs.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames handed to the consumer.
    pub frames: u64,
    /// Packets read from the input, any stream.
    pub packets_read: u64,
    /// Packets dropped because they belong to another stream.
    pub packets_discarded: u64,
    /// Per-packet failures that were skipped.
    pub transient_errors: u64,
    /// Handles whose release reported an error during teardown.
    pub release_errors: u64,
}

/**
    How a session ended.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The source ran out of packets.
    Exhausted,
    /// The stop signal was raised or the consumer stopped early.
    Cancelled,
    /// A terminal error occurred mid-stream.
    Failed,
}

/**
    Final state of a session that was driven to completion.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    pub end: SessionEnd,
    pub stats: SessionStats,
}

/**
    Native handles owned by one session.

    Everything acquired is registered here as soon as it exists, so any
    early return releases it. Release happens in reverse acquisition order:
    scratch buffer, converter, decoder, input. Each step runs regardless of
    the previous ones failing.
*/
pub(crate) struct SessionResources<S: DecodeService> {
    service: Arc<S>,
    session: SessionId,
    pub(crate) input: Option<S::Input>,
    pub(crate) decoder: Option<S::Decoder>,
    pub(crate) converter: Option<S::Converter>,
    pub(crate) scratch: Option<Frame>,
    release_errors: u64,
}

impl<S: DecodeService> SessionResources<S> {
    pub(crate) fn new(service: Arc<S>, session: SessionId) -> Self {
        Self {
            service,
            session,
            input: None,
            decoder: None,
            converter: None,
            scratch: None,
            release_errors: 0,
        }
    }

    pub(crate) fn release_all(&mut self) {
        drop(self.scratch.take());
        if let Some(converter) = self.converter.take() {
            let result = self.service.close_converter(converter);
            self.record("converter", result);
        }
        if let Some(decoder) = self.decoder.take() {
            let result = self.service.close_decoder(decoder);
            self.record("decoder", result);
        }
        if let Some(input) = self.input.take() {
            let result = self.service.close_input(input);
            self.record("input", result);
        }
    }

    fn record(&mut self, resource: &'static str, result: Result<(), ServiceError>) {
        if let Err(reason) = result {
            self.release_errors += 1;
            let err = DecodeError::ResourceRelease {
                session: self.session,
                resource,
                reason,
            };
            warn!(session = %self.session, "{err}");
        }
    }
}

impl<S: DecodeService> Drop for SessionResources<S> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Outcome of one attempt to take a frame out of the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pull {
    /// The scratch buffer holds a new frame.
    Ready,
    /// The decoder has nothing more for now (or, after EOF, at all).
    Empty,
    /// A frame was lost to a transient failure; the decoder may hold more.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Reading,
    Draining,
    Finished,
}

/**
    One decode loop over one source.

    Created by [`FrameDecodeLoop::start`](crate::FrameDecodeLoop::start).
    Frames are pulled with [`next_frame`](Self::next_frame), which lends out
    the session's scratch buffer: the previous frame has to be released
    before the next one can be produced, so at most one frame per session is
    ever in flight.

    Teardown runs when the source is exhausted, on a terminal error, on
    cancellation, and on drop, whichever comes first.
*/
pub struct DecodeSession<S: DecodeService> {
    id: SessionId,
    source: Source,
    service: Arc<S>,
    config: LoopConfig,
    stop: StopSignal,
    stream: StreamInfo,
    resources: SessionResources<S>,
    phase: Phase,
    end: Option<SessionEnd>,
    stats: SessionStats,
    consecutive_skips: u32,
    next_sequence: u64,
    last_yield: Option<Instant>,
}

impl<S: DecodeService> DecodeSession<S> {
    pub(crate) fn new(
        id: SessionId,
        source: Source,
        service: Arc<S>,
        config: LoopConfig,
        stop: StopSignal,
        stream: StreamInfo,
        resources: SessionResources<S>,
    ) -> Self {
        Self {
            id,
            source,
            service,
            config,
            stop,
            stream,
            resources,
            phase: Phase::Reading,
            end: None,
            stats: SessionStats::default(),
            consecutive_skips: 0,
            next_sequence: 0,
            last_yield: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The video stream being decoded.
    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            release_errors: self.resources.release_errors,
            ..self.stats
        }
    }

    /// How the session ended, once it has.
    pub fn end(&self) -> Option<SessionEnd> {
        self.end
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /**
        Produce the next frame.

        Returns `Ok(None)` once the source is exhausted or the session was
        cancelled; resources are already released at that point. A terminal
        error also releases everything before it is returned.
    */
    pub fn next_frame(&mut self) -> DecodeResult<Option<&Frame>> {
        loop {
            if self.phase == Phase::Finished {
                return Ok(None);
            }
            if self.stop.is_stopped() {
                self.finish(SessionEnd::Cancelled);
                return Ok(None);
            }

            match self.pull_frame() {
                Ok(Pull::Ready) => {
                    if !self.pace() {
                        self.finish(SessionEnd::Cancelled);
                        return Ok(None);
                    }
                    self.stats.frames += 1;
                    return Ok(self.resources.scratch.as_ref());
                }
                // Only an empty decoder ends the drain.
                Ok(Pull::Skipped) if self.phase == Phase::Draining => continue,
                Ok(_) => {}
                Err(err) => return Err(self.fail(err)),
            }

            match self.phase {
                Phase::Reading => {
                    if let Err(err) = self.feed_packet() {
                        return Err(self.fail(err));
                    }
                }
                Phase::Draining => self.finish(SessionEnd::Exhausted),
                Phase::Finished => {}
            }
        }
    }

    /**
        Run the session to its end, handing every frame to `on_frame`.

        Returning `ControlFlow::Break` from the callback cancels the session.
    */
    pub fn drive<F>(mut self, mut on_frame: F) -> DecodeResult<SessionReport>
    where
        F: FnMut(&Frame) -> ControlFlow<()>,
    {
        while let Some(frame) = self.next_frame()? {
            if on_frame(frame).is_break() {
                self.finish(SessionEnd::Cancelled);
            }
        }
        Ok(self.report())
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id,
            end: self.end.unwrap_or(SessionEnd::Cancelled),
            stats: self.stats(),
        }
    }

    /**
        Stop decoding and release everything now.
    */
    pub fn cancel(&mut self) {
        self.finish(SessionEnd::Cancelled);
    }

    /**
        Try to take one decoded frame out of the decoder and convert it into
        the scratch buffer.
    */
    fn pull_frame(&mut self) -> DecodeResult<Pull> {
        let service = Arc::clone(&self.service);
        let Some(decoder) = self.resources.decoder.as_mut() else {
            return Ok(Pull::Empty);
        };

        let decoded = match service.receive_frame(decoder) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(Pull::Empty),
            Err(reason) => {
                self.skip("receive frame", reason)?;
                return Ok(Pull::Skipped);
            }
        };

        let (Some(converter), Some(scratch)) = (
            self.resources.converter.as_mut(),
            self.resources.scratch.as_mut(),
        ) else {
            service.release_frame(decoded);
            return Ok(Pull::Empty);
        };
        let result = service.convert(converter, &decoded, scratch);
        service.release_frame(decoded);

        match result {
            Ok(()) => {
                scratch.sequence = self.next_sequence;
                self.next_sequence += 1;
                self.consecutive_skips = 0;
                debug!(session = %self.id, sequence = scratch.sequence, "frame ready");
                Ok(Pull::Ready)
            }
            Err(reason) if reason.is_converter_setup() => Err(DecodeError::ConversionSetup {
                session: self.id,
                from: self.stream.format_name(),
                to: self.config.target_format.to_string(),
                reason,
            }),
            Err(reason) => {
                self.skip("convert", reason)?;
                Ok(Pull::Skipped)
            }
        }
    }

    /**
        Read one packet and, if it belongs to our stream, submit it.
    */
    fn feed_packet(&mut self) -> DecodeResult<()> {
        let service = Arc::clone(&self.service);
        let Some(input) = self.resources.input.as_mut() else {
            self.phase = Phase::Draining;
            return Ok(());
        };

        let packet = match service.read_packet(input) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                self.end_of_stream();
                return Ok(());
            }
            Err(reason) => return self.skip("read packet", reason),
        };
        self.stats.packets_read += 1;

        if service.packet_stream(&packet) != self.stream.index {
            self.stats.packets_discarded += 1;
            service.release_packet(packet);
            return Ok(());
        }

        let sent = match self.resources.decoder.as_mut() {
            Some(decoder) => service.send_packet(decoder, &packet),
            None => Ok(()),
        };
        service.release_packet(packet);

        match sent {
            Ok(()) => Ok(()),
            Err(reason) => self.skip("send packet", reason),
        }
    }

    fn end_of_stream(&mut self) {
        debug!(
            session = %self.id,
            packets = self.stats.packets_read,
            "end of stream"
        );
        if !self.config.flush_on_eof {
            self.finish(SessionEnd::Exhausted);
            return;
        }
        if let Some(decoder) = self.resources.decoder.as_mut() {
            if let Err(reason) = self.service.send_eof(decoder) {
                warn!(session = %self.id, "flushing decoder failed: {reason}");
                self.stats.transient_errors += 1;
            }
        }
        self.phase = Phase::Draining;
    }

    /**
        Log and count a transient failure, escalating once too many happen
        in a row.
    */
    fn skip(&mut self, stage: &'static str, reason: ServiceError) -> DecodeResult<()> {
        self.stats.transient_errors += 1;
        self.consecutive_skips += 1;

        let err = DecodeError::TransientDecode {
            session: self.id,
            stage,
            reason,
        };
        warn!(session = %self.id, skipped = self.consecutive_skips, "{err}");

        match self.config.max_consecutive_skips {
            Some(limit) if self.consecutive_skips >= limit => Err(DecodeError::StalledStream {
                session: self.id,
                skipped: self.consecutive_skips,
            }),
            _ => Ok(()),
        }
    }

    /**
        Wait out the rest of the minimum frame interval.
        Returns false if the session was cancelled meanwhile.
    */
    fn pace(&mut self) -> bool {
        let interval = self.config.min_frame_interval();
        if let Some(last) = self.last_yield {
            let elapsed = last.elapsed();
            if elapsed < interval && self.stop.wait_timeout(interval - elapsed) {
                return false;
            }
        }
        self.last_yield = Some(Instant::now());
        true
    }

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        warn!(session = %self.id, source = %self.source, "{err}");
        self.finish(SessionEnd::Failed);
        err
    }

    fn finish(&mut self, end: SessionEnd) {
        if self.phase == Phase::Finished {
            return;
        }
        self.phase = Phase::Finished;
        self.end = Some(end);
        self.resources.release_all();
        let stats = self.stats();
        info!(
            session = %self.id,
            source = %self.source,
            ?end,
            frames = stats.frames,
            skipped = stats.transient_errors,
            "closed"
        );
    }
}

impl<S: DecodeService> Drop for DecodeSession<S> {
    fn drop(&mut self) {
        self.finish(SessionEnd::Cancelled);
    }
}

impl<S: DecodeService> fmt::Debug for DecodeSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSession")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("stream", &self.stream)
            .field("phase", &self.phase)
            .field("stats", &self.stats())
            .finish()
    }
}
