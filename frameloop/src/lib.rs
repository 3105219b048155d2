/*!
    Decode loop and frame-buffer lifecycle for video walls.

    A [`FrameDecodeLoop`] opens a source through a [`DecodeService`], picks its
    first video stream, and hands out converted frames one at a time through
    a [`DecodeSession`]. Every native handle a session acquires is owned by
    the session and released exactly once, whichever way the session ends:
    exhaustion, cancellation, a terminal error, or being dropped.

    [`Player`] and [`SessionRegistry`] run sessions on background threads and
    publish the most recent frame into a [`FrameSlot`] for the display side.

    The [`SyntheticService`] backend generates test patterns and counts live
    handles, which is what the tests here run against. A real backend built
    on FFmpeg is available behind the `ffmpeg` feature.
*/

mod config;
mod decode_loop;
mod error;
mod format;
mod frame;
mod player;
mod registry;
mod service;
mod session;
mod slot;
mod source;
mod stop;
mod synthetic;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

pub use self::config::LoopConfig;
pub use self::decode_loop::FrameDecodeLoop;
pub use self::error::{ConfigError, DecodeError, DecodeResult, ServiceError};
pub use self::format::{PixelFormat, UnknownPixelFormat};
pub use self::frame::Frame;
pub use self::player::Player;
pub use self::registry::SessionRegistry;
pub use self::service::{DecodeService, MediaKind, StreamInfo};
pub use self::session::{DecodeSession, SessionEnd, SessionId, SessionReport, SessionStats};
pub use self::slot::{FrameSlot, PlayerState, SlotSnapshot};
pub use self::source::Source;
pub use self::stop::StopSignal;
pub use self::synthetic::{LiveHandles, SyntheticService, TestPattern};

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegService;
