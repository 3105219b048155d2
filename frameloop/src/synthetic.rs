/*!
    In-process test pattern decode service.

    Sources look like `testsrc://64x64?frames=10&audio=1`. Every handle the
    service gives out is counted until it is dropped, so callers can check
    that a session released everything it acquired.

    Query parameters:

    - `frames=N` - video frames in the clip (default 10)
    - `video=0|1`, `audio=0|1` - which streams exist (default video only)
    - `codec=NAME` - only `raw` has a decoder (default `raw`)
    - `delay=N` - frames the decoder holds back until flushed (default 0)
    - `corrupt=A,B` - packet numbers the decoder rejects
    - `drain_errors=N` - the first N receives after end of stream fail
    - `convert=fail` - the conversion context cannot be created
    - `reconvert=N` - rebuilding the conversion context fails at frame N
    - `fail_close=input,decoder,converter` - closing these reports an error
    - `panic=N` - reading packet N panics

    Decoded frame `n` has red = `n % 256`, green = `x % 256`, blue = `y % 256`.
*/

use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    DecodeService, Frame, MediaKind, PixelFormat, Source, StreamInfo, error::ServiceError,
};

pub const SCHEME: &str = "testsrc";

const DEFAULT_FRAMES: u32 = 10;
const RAW_CODEC: &str = "raw";

/**
    Description of a synthetic clip, parsed from a `testsrc://` source.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestPattern {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub video: bool,
    pub audio: bool,
    pub codec: String,
    pub delay: usize,
    pub corrupt: Vec<u32>,
    pub drain_errors: u32,
    pub convert_fails: bool,
    pub reconvert_fails_at: Option<u32>,
    pub fail_close: Vec<String>,
    pub panic_at: Option<u32>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, frames: u32) -> Self {
        Self {
            width,
            height,
            frames,
            video: true,
            audio: false,
            codec: RAW_CODEC.to_string(),
            delay: 0,
            corrupt: Vec::new(),
            drain_errors: 0,
            convert_fails: false,
            reconvert_fails_at: None,
            fail_close: Vec::new(),
            panic_at: None,
        }
    }

    pub fn parse(source: &Source) -> Result<Self, ServiceError> {
        let location = source.as_str();
        let rest = location
            .strip_prefix(SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| ServiceError::NotFound(location.to_string()))?;

        let (dims, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (width, height) = dims
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
            .ok_or_else(|| ServiceError::InvalidData(format!("bad dimensions '{dims}'")))?;

        let mut pattern = Self::new(width, height, DEFAULT_FRAMES);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
            match key {
                "frames" => pattern.frames = parse_number(key, value)?,
                "video" => pattern.video = parse_flag(key, value)?,
                "audio" => pattern.audio = parse_flag(key, value)?,
                "codec" => pattern.codec = value.to_string(),
                "delay" => pattern.delay = parse_number(key, value)?,
                "corrupt" => {
                    pattern.corrupt = value
                        .split(',')
                        .map(|n| parse_number(key, n))
                        .collect::<Result<_, _>>()?
                }
                "drain_errors" => pattern.drain_errors = parse_number(key, value)?,
                "convert" => pattern.convert_fails = value == "fail",
                "reconvert" => pattern.reconvert_fails_at = Some(parse_number(key, value)?),
                "fail_close" => {
                    pattern.fail_close = value.split(',').map(str::to_string).collect()
                }
                "panic" => pattern.panic_at = Some(parse_number(key, value)?),
                _ => {
                    return Err(ServiceError::InvalidData(format!(
                        "unknown parameter '{key}'"
                    )));
                }
            }
        }
        Ok(pattern)
    }

    fn fails_close(&self, resource: &str) -> bool {
        self.fail_close.iter().any(|r| r == resource)
    }

    fn video_index(&self) -> Option<usize> {
        self.video.then_some(0)
    }

    fn audio_index(&self) -> Option<usize> {
        self.audio.then_some(usize::from(self.video))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ServiceError> {
    value
        .parse()
        .map_err(|_| ServiceError::InvalidData(format!("bad value '{value}' for '{key}'")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ServiceError> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ServiceError::InvalidData(format!(
            "bad value '{value}' for '{key}'"
        ))),
    }
}

/**
    Number of handles of each kind that are currently alive.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveHandles {
    pub inputs: usize,
    pub decoders: usize,
    pub converters: usize,
    pub packets: usize,
    pub frames: usize,
}

impl LiveHandles {
    pub fn total(&self) -> usize {
        self.inputs + self.decoders + self.converters + self.packets + self.frames
    }
}

#[derive(Clone, Copy)]
enum HandleKind {
    Input,
    Decoder,
    Converter,
    Packet,
    Frame,
}

#[derive(Default)]
struct Counters {
    inputs: AtomicUsize,
    decoders: AtomicUsize,
    converters: AtomicUsize,
    packets: AtomicUsize,
    frames: AtomicUsize,
    opened: AtomicUsize,
}

impl Counters {
    fn counter(&self, kind: HandleKind) -> &AtomicUsize {
        match kind {
            HandleKind::Input => &self.inputs,
            HandleKind::Decoder => &self.decoders,
            HandleKind::Converter => &self.converters,
            HandleKind::Packet => &self.packets,
            HandleKind::Frame => &self.frames,
        }
    }
}

/// Counts one live handle until dropped.
struct Tracked {
    counters: Arc<Counters>,
    kind: HandleKind,
}

impl Tracked {
    fn new(counters: &Arc<Counters>, kind: HandleKind) -> Self {
        counters.counter(kind).fetch_add(1, Ordering::SeqCst);
        Self {
            counters: Arc::clone(counters),
            kind,
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counters.counter(self.kind).fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SyntheticInput {
    pattern: TestPattern,
    next: u32,
    audio_due: bool,
    _live: Tracked,
}

pub struct SyntheticCodec;

pub struct SyntheticDecoder {
    width: u32,
    height: u32,
    delay: usize,
    corrupt: Vec<u32>,
    drain_errors: u32,
    convert_fails: bool,
    reconvert_fails_at: Option<u32>,
    fail_close: bool,
    fail_close_converter: bool,
    queue: VecDeque<u32>,
    eof: bool,
    _live: Tracked,
}

pub struct SyntheticConverter {
    reconvert_fails_at: Option<u32>,
    fail_close: bool,
    _live: Tracked,
}

pub struct SyntheticPacket {
    stream: usize,
    number: u32,
    _live: Tracked,
}

pub struct SyntheticFrame {
    number: u32,
    width: u32,
    height: u32,
    _live: Tracked,
}

/**
    Decode service producing generated test patterns.
*/
#[derive(Clone, Default)]
pub struct SyntheticService {
    counters: Arc<Counters>,
}

impl SyntheticService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently alive across all sessions.
    pub fn live_handles(&self) -> LiveHandles {
        let c = &self.counters;
        LiveHandles {
            inputs: c.inputs.load(Ordering::SeqCst),
            decoders: c.decoders.load(Ordering::SeqCst),
            converters: c.converters.load(Ordering::SeqCst),
            packets: c.packets.load(Ordering::SeqCst),
            frames: c.frames.load(Ordering::SeqCst),
        }
    }

    /// True for `testsrc://` locations.
    pub fn handles(source: &Source) -> bool {
        source.scheme() == Some(SCHEME)
    }

    /// Inputs successfully opened since creation.
    pub fn inputs_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    fn track(&self, kind: HandleKind) -> Tracked {
        Tracked::new(&self.counters, kind)
    }
}

impl DecodeService for SyntheticService {
    type Input = SyntheticInput;
    type Codec = SyntheticCodec;
    type Decoder = SyntheticDecoder;
    type Converter = SyntheticConverter;
    type Packet = SyntheticPacket;
    type DecodedFrame = SyntheticFrame;

    fn open(&self, source: &Source) -> Result<Self::Input, ServiceError> {
        let pattern = TestPattern::parse(source)?;
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticInput {
            pattern,
            next: 0,
            audio_due: false,
            _live: self.track(HandleKind::Input),
        })
    }

    fn probe_streams(&self, input: &mut Self::Input) -> Result<Vec<StreamInfo>, ServiceError> {
        let pattern = &input.pattern;
        let mut streams = Vec::new();
        if let Some(index) = pattern.video_index() {
            streams.push(StreamInfo {
                index,
                kind: MediaKind::Video,
                codec: pattern.codec.clone(),
                width: pattern.width,
                height: pattern.height,
                pixel_format: Some(PixelFormat::Yuv420p),
            });
        }
        if let Some(index) = pattern.audio_index() {
            streams.push(StreamInfo {
                index,
                kind: MediaKind::Audio,
                codec: "pcm".to_string(),
                width: 0,
                height: 0,
                pixel_format: None,
            });
        }
        Ok(streams)
    }

    fn find_decoder(&self, _input: &Self::Input, stream: &StreamInfo) -> Option<Self::Codec> {
        (stream.codec == RAW_CODEC).then_some(SyntheticCodec)
    }

    fn open_decoder(
        &self,
        input: &Self::Input,
        stream: &StreamInfo,
        _codec: Self::Codec,
    ) -> Result<Self::Decoder, ServiceError> {
        let pattern = &input.pattern;
        Ok(SyntheticDecoder {
            width: stream.width,
            height: stream.height,
            delay: pattern.delay,
            corrupt: pattern.corrupt.clone(),
            drain_errors: pattern.drain_errors,
            convert_fails: pattern.convert_fails,
            reconvert_fails_at: pattern.reconvert_fails_at,
            fail_close: pattern.fails_close("decoder"),
            fail_close_converter: pattern.fails_close("converter"),
            queue: VecDeque::new(),
            eof: false,
            _live: self.track(HandleKind::Decoder),
        })
    }

    fn open_converter(
        &self,
        decoder: &Self::Decoder,
        _stream: &StreamInfo,
        target: PixelFormat,
    ) -> Result<Self::Converter, ServiceError> {
        if decoder.convert_fails || !target.is_packed() {
            return Err(ServiceError::ConverterSetup(format!(
                "no conversion path to {target}"
            )));
        }
        Ok(SyntheticConverter {
            reconvert_fails_at: decoder.reconvert_fails_at,
            fail_close: decoder.fail_close_converter,
            _live: self.track(HandleKind::Converter),
        })
    }

    fn read_packet(&self, input: &mut Self::Input) -> Result<Option<Self::Packet>, ServiceError> {
        if input.audio_due {
            input.audio_due = false;
            return Ok(Some(SyntheticPacket {
                stream: input.pattern.audio_index().unwrap_or_default(),
                number: input.next.saturating_sub(1),
                _live: self.track(HandleKind::Packet),
            }));
        }
        if input.next >= input.pattern.frames {
            return Ok(None);
        }

        let number = input.next;
        if input.pattern.panic_at == Some(number) {
            panic!("test pattern panics at packet {number}");
        }
        input.next += 1;
        let stream = match input.pattern.video_index() {
            Some(index) => {
                input.audio_due = input.pattern.audio;
                index
            }
            None => input.pattern.audio_index().unwrap_or_default(),
        };
        Ok(Some(SyntheticPacket {
            stream,
            number,
            _live: self.track(HandleKind::Packet),
        }))
    }

    fn packet_stream(&self, packet: &Self::Packet) -> usize {
        packet.stream
    }

    fn send_packet(
        &self,
        decoder: &mut Self::Decoder,
        packet: &Self::Packet,
    ) -> Result<(), ServiceError> {
        if decoder.eof {
            return Err(ServiceError::InvalidData("packet after end of stream".into()));
        }
        if decoder.corrupt.contains(&packet.number) {
            return Err(ServiceError::InvalidData(format!(
                "corrupt packet {}",
                packet.number
            )));
        }
        decoder.queue.push_back(packet.number);
        Ok(())
    }

    fn send_eof(&self, decoder: &mut Self::Decoder) -> Result<(), ServiceError> {
        decoder.eof = true;
        Ok(())
    }

    fn receive_frame(
        &self,
        decoder: &mut Self::Decoder,
    ) -> Result<Option<Self::DecodedFrame>, ServiceError> {
        if decoder.eof && decoder.drain_errors > 0 {
            decoder.drain_errors -= 1;
            return Err(ServiceError::InvalidData("decoder error while draining".into()));
        }
        let buffered = decoder.queue.len();
        let ready = buffered > decoder.delay || (decoder.eof && buffered > 0);
        if !ready {
            return Ok(None);
        }
        Ok(decoder.queue.pop_front().map(|number| SyntheticFrame {
            number,
            width: decoder.width,
            height: decoder.height,
            _live: self.track(HandleKind::Frame),
        }))
    }

    fn convert(
        &self,
        converter: &mut Self::Converter,
        frame: &Self::DecodedFrame,
        target: &mut Frame,
    ) -> Result<(), ServiceError> {
        if converter.reconvert_fails_at == Some(frame.number) {
            return Err(ServiceError::ConverterSetup(format!(
                "cannot rebuild scaler at frame {}",
                frame.number
            )));
        }
        if frame.width != target.width || frame.height != target.height {
            return Err(ServiceError::InvalidData(format!(
                "frame is {}x{}, target is {}x{}",
                frame.width, frame.height, target.width, target.height
            )));
        }
        let offsets = target
            .format
            .channel_offsets()
            .ok_or_else(|| ServiceError::Unsupported(target.format.to_string()))?;
        let bpp = target.format.bytes_per_pixel().unwrap_or(4);

        for y in 0..target.height {
            let row = target.row_mut(y);
            for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
                let rgba = [frame.number as u8, x as u8, y as u8, 255];
                for (channel, offset) in offsets.iter().enumerate() {
                    if let Some(offset) = offset {
                        px[*offset] = rgba[channel];
                    }
                }
            }
        }
        Ok(())
    }

    fn close_converter(&self, converter: Self::Converter) -> Result<(), ServiceError> {
        closed(converter.fail_close, "converter")
    }

    fn close_decoder(&self, decoder: Self::Decoder) -> Result<(), ServiceError> {
        closed(decoder.fail_close, "decoder")
    }

    fn close_input(&self, input: Self::Input) -> Result<(), ServiceError> {
        closed(input.pattern.fails_close("input"), "input")
    }
}

fn closed(fail: bool, resource: &str) -> Result<(), ServiceError> {
    if fail {
        Err(ServiceError::backend(format!("simulated {resource} close failure")))
    } else {
        Ok(())
    }
}
