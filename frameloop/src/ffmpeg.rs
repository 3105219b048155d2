/*!
    Decode service backed by FFmpeg.

    Opens files and network URLs through libavformat, decodes with
    libavcodec and converts with libswscale. Decoding is software only.
*/

use std::sync::Once;

use ffmpeg_next::{
    Error as FfmpegError, Packet, codec, decoder, ffi,
    format::{self, Pixel, context::Input},
    media::Type,
    software::scaling::{context::Context as ScalerContext, flag::Flags as ScalerFlags},
    util::frame::video::Video as VideoFrame,
};
use tracing::{debug, warn};

use crate::{DecodeService, Frame, MediaKind, PixelFormat, Source, StreamInfo, error::ServiceError};

fn pixel_to_ffmpeg(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Yuv422p => Pixel::YUV422P,
        PixelFormat::Yuv444p => Pixel::YUV444P,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgr24 => Pixel::BGR24,
    }
}

fn pixel_from_ffmpeg(format: Pixel) -> Option<PixelFormat> {
    match format {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::YUV422P => Some(PixelFormat::Yuv422p),
        Pixel::YUV444P => Some(PixelFormat::Yuv444p),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        Pixel::BGRA => Some(PixelFormat::Bgra),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::BGR24 => Some(PixelFormat::Bgr24),
        _ => None,
    }
}

fn media_kind(kind: Type) -> MediaKind {
    match kind {
        Type::Video => MediaKind::Video,
        Type::Audio => MediaKind::Audio,
        Type::Subtitle => MediaKind::Subtitle,
        Type::Data => MediaKind::Data,
        _ => MediaKind::Other,
    }
}

fn backend(err: FfmpegError) -> ServiceError {
    ServiceError::backend(err.to_string())
}

fn is_would_block(err: &FfmpegError) -> bool {
    matches!(err, FfmpegError::Other { errno } if *errno == ffi::EAGAIN)
}

/**
    Classify a failed `avcodec_send_packet`.

    EAGAIN means the decoder still holds output that was not received. The
    session always drains the decoder before feeding it, so this only
    happens with decoders that produce more than they report; the packet is
    dropped and counted as a skipped frame rather than retried.
*/
fn send_error(err: FfmpegError) -> ServiceError {
    match err {
        FfmpegError::InvalidData => ServiceError::InvalidData("corrupt packet".into()),
        e if is_would_block(&e) => {
            ServiceError::InvalidData("decoder input full, packet dropped".into())
        }
        e => backend(e),
    }
}

/**
    An opened video decoder.
*/
pub struct FfmpegDecoder {
    decoder: decoder::Video,
}

/**
    Scaling context from the decoder's native format into the target.

    Rebuilt whenever the decoded frames change format or size mid-stream.
*/
pub struct FfmpegConverter {
    scaler: Option<ScalerContext>,
    source: (Pixel, u32, u32),
    target: Pixel,
    width: u32,
    height: u32,
    scaled: VideoFrame,
}

impl FfmpegConverter {
    fn rebuild(&mut self, format: Pixel, width: u32, height: u32) -> Result<(), ServiceError> {
        let scaler = ScalerContext::get(
            format,
            width,
            height,
            self.target,
            self.width,
            self.height,
            ScalerFlags::BILINEAR,
        )
        .map_err(|e| {
            ServiceError::ConverterSetup(format!("{format:?} {width}x{height}: {e}"))
        })?;
        debug!(?format, width, height, "scaler rebuilt");
        self.scaler = Some(scaler);
        self.source = (format, width, height);
        Ok(())
    }
}

/**
    [`DecodeService`] on top of `ffmpeg-next`.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegService;

impl FfmpegService {
    pub fn new() -> Result<Self, ServiceError> {
        static INIT: Once = Once::new();
        let mut result = Ok(());
        INIT.call_once(|| result = ffmpeg_next::init());
        result.map_err(backend)?;
        Ok(Self)
    }
}

impl DecodeService for FfmpegService {
    type Input = Input;
    type Codec = codec::Codec;
    type Decoder = FfmpegDecoder;
    type Converter = FfmpegConverter;
    type Packet = Packet;
    type DecodedFrame = VideoFrame;

    fn open(&self, source: &Source) -> Result<Input, ServiceError> {
        format::input(&source.as_str()).map_err(|e| {
            if e.to_string().contains("No such file") {
                ServiceError::NotFound(source.to_string())
            } else {
                backend(e)
            }
        })
    }

    fn probe_streams(&self, input: &mut Input) -> Result<Vec<StreamInfo>, ServiceError> {
        let mut streams = Vec::new();
        for stream in input.streams() {
            let parameters = stream.parameters();
            let kind = media_kind(parameters.medium());
            let codec = parameters.id().name().to_string();

            let (width, height, pixel_format) = if kind == MediaKind::Video {
                let video = codec::context::Context::from_parameters(parameters)
                    .and_then(|ctx| ctx.decoder().video());
                match video {
                    Ok(video) => (video.width(), video.height(), pixel_from_ffmpeg(video.format())),
                    Err(e) => {
                        warn!(stream = stream.index(), error = %e, "cannot read video parameters");
                        (0, 0, None)
                    }
                }
            } else {
                (0, 0, None)
            };

            streams.push(StreamInfo {
                index: stream.index(),
                kind,
                codec,
                width,
                height,
                pixel_format,
            });
        }
        Ok(streams)
    }

    fn find_decoder(&self, input: &Input, stream: &StreamInfo) -> Option<codec::Codec> {
        let parameters = input.stream(stream.index)?.parameters();
        decoder::find(parameters.id())
    }

    fn open_decoder(
        &self,
        input: &Input,
        stream: &StreamInfo,
        codec: codec::Codec,
    ) -> Result<FfmpegDecoder, ServiceError> {
        let parameters = input
            .stream(stream.index)
            .ok_or_else(|| ServiceError::NotFound(format!("stream {}", stream.index)))?
            .parameters();
        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().open_as(codec))
            .and_then(|opened| opened.video())
            .map_err(backend)?;
        Ok(FfmpegDecoder { decoder })
    }

    fn open_converter(
        &self,
        decoder: &FfmpegDecoder,
        stream: &StreamInfo,
        target: PixelFormat,
    ) -> Result<FfmpegConverter, ServiceError> {
        let decoder = &decoder.decoder;
        let mut converter = FfmpegConverter {
            scaler: None,
            source: (Pixel::None, 0, 0),
            target: pixel_to_ffmpeg(target),
            width: stream.width,
            height: stream.height,
            scaled: VideoFrame::empty(),
        };
        // Some decoders only learn their output format from the first frame.
        if decoder.format() != Pixel::None {
            converter.rebuild(decoder.format(), decoder.width(), decoder.height())?;
        }
        Ok(converter)
    }

    fn read_packet(&self, input: &mut Input) -> Result<Option<Packet>, ServiceError> {
        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => Ok(Some(packet)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }

    fn packet_stream(&self, packet: &Packet) -> usize {
        packet.stream()
    }

    fn send_packet(&self, decoder: &mut FfmpegDecoder, packet: &Packet) -> Result<(), ServiceError> {
        decoder.decoder.send_packet(packet).map_err(send_error)
    }

    fn send_eof(&self, decoder: &mut FfmpegDecoder) -> Result<(), ServiceError> {
        match decoder.decoder.send_eof() {
            Ok(()) | Err(FfmpegError::Eof) => Ok(()),
            Err(e) => Err(backend(e)),
        }
    }

    fn receive_frame(&self, decoder: &mut FfmpegDecoder) -> Result<Option<VideoFrame>, ServiceError> {
        let mut frame = VideoFrame::empty();
        match decoder.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(e) if is_would_block(&e) => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }

    fn convert(
        &self,
        converter: &mut FfmpegConverter,
        frame: &VideoFrame,
        target: &mut Frame,
    ) -> Result<(), ServiceError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        if width == 0 || height == 0 || format == Pixel::None {
            return Err(ServiceError::InvalidData(format!(
                "unusable frame {format:?} {width}x{height}"
            )));
        }

        if converter.scaler.is_none() || converter.source != (format, width, height) {
            converter.rebuild(format, width, height)?;
        }
        let Some(scaler) = converter.scaler.as_mut() else {
            return Err(ServiceError::ConverterSetup("no scaler".into()));
        };

        scaler.run(frame, &mut converter.scaled).map_err(backend)?;
        let scaled = &converter.scaled;
        if !target.copy_from_strided(scaled.data(0), scaled.stride(0)) {
            return Err(ServiceError::InvalidData(format!(
                "scaled plane too short for {}x{} {}",
                target.width, target.height, target.format
            )));
        }
        Ok(())
    }

    fn close_converter(&self, converter: FfmpegConverter) -> Result<(), ServiceError> {
        drop(converter);
        Ok(())
    }

    fn close_decoder(&self, decoder: FfmpegDecoder) -> Result<(), ServiceError> {
        drop(decoder);
        Ok(())
    }

    fn close_input(&self, input: Input) -> Result<(), ServiceError> {
        drop(input);
        Ok(())
    }
}

#[cfg(all(test, feature = "ffmpeg"))]
mod tests {
    use std::path::{Path, PathBuf};

    use ffmpeg_next::{Rational, encoder};

    use super::*;
    use crate::{DecodeError, FrameDecodeLoop, LoopConfig, SessionId, StopSignal};

    const FRAMES: i64 = 10;
    const SIZE: u32 = 64;

    fn new_loop() -> FrameDecodeLoop<FfmpegService> {
        let config = LoopConfig::default().with_min_frame_interval(std::time::Duration::ZERO);
        FrameDecodeLoop::new(FfmpegService::new().unwrap(), config)
    }

    fn drain(
        encoder: &mut encoder::Video,
        output: &mut format::context::Output,
        from: Rational,
        to: Rational,
    ) {
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(from, to);
            packet.write_interleaved(output).unwrap();
        }
    }

    /// Encode a short MPEG-4 clip whose luma ramps up frame by frame.
    fn write_clip(dir: &Path) -> PathBuf {
        let path = dir.join("clip.avi");
        let mut output = format::output(&path).unwrap();
        let codec = encoder::find(codec::Id::MPEG4).unwrap();
        let time_base = Rational::new(1, 25);

        let mut setup = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .unwrap();
        setup.set_width(SIZE);
        setup.set_height(SIZE);
        setup.set_format(Pixel::YUV420P);
        setup.set_time_base(time_base);
        setup.set_frame_rate(Some(Rational::new(25, 1)));
        let mut encoder = setup.open_as(codec).unwrap();

        output.add_stream(codec).unwrap().set_parameters(&encoder);
        output.write_header().unwrap();
        let stream_time_base = output.stream(0).unwrap().time_base();

        for n in 0..FRAMES {
            let mut frame = VideoFrame::new(Pixel::YUV420P, SIZE, SIZE);
            frame.data_mut(0).fill(16 + n as u8 * 20);
            frame.data_mut(1).fill(128);
            frame.data_mut(2).fill(128);
            frame.set_pts(Some(n));
            encoder.send_frame(&frame).unwrap();
            drain(&mut encoder, &mut output, time_base, stream_time_base);
        }
        encoder.send_eof().unwrap();
        drain(&mut encoder, &mut output, time_base, stream_time_base);
        output.write_trailer().unwrap();
        path
    }

    /// One second of 8 kHz mono silence as a canonical WAV file.
    fn write_wav(dir: &Path) -> PathBuf {
        let path = dir.join("tone.wav");
        let samples = 8000u32;
        let data_len = samples * 2;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&16000u32.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(44 + data_len as usize, 0);
        std::fs::write(&path, wav).unwrap();
        path
    }

    #[test]
    fn decodes_every_frame_of_a_clip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_clip(dir.path());

        let decode_loop = new_loop();
        let session = decode_loop
            .start(SessionId::new(1), Source::from(path), StopSignal::new())
            .unwrap();

        let mut frames = Vec::new();
        let report = session
            .drive(|frame| {
                assert_eq!((frame.width, frame.height), (SIZE, SIZE));
                assert_eq!(frame.format, PixelFormat::Rgba);
                frames.push((frame.sequence, frame.data.len(), frame.rgba_at(0, 0)));
                std::ops::ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(frames.len(), FRAMES as usize);
        assert_eq!(report.stats.frames, FRAMES as u64);
        for (n, (sequence, len, pixel)) in frames.iter().enumerate() {
            assert_eq!(*sequence, n as u64);
            assert_eq!(*len, (SIZE * SIZE * 4) as usize);
            assert_eq!(pixel.unwrap()[3], 255);
        }
        // the ramp survives the round trip through the encoder
        let first = frames[0].2.unwrap()[0];
        let last = frames[FRAMES as usize - 1].2.unwrap()[0];
        assert!(last > first);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let decode_loop = new_loop();
        let result = decode_loop.start(
            SessionId::new(2),
            Source::from(dir.path().join("missing.avi")),
            StopSignal::new(),
        );
        assert!(matches!(result, Err(DecodeError::Open { .. })));
    }

    #[test]
    fn audio_only_file_has_no_video_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path());

        let decode_loop = new_loop();
        let result = decode_loop.start(SessionId::new(3), Source::from(path), StopSignal::new());
        assert!(matches!(result, Err(DecodeError::StreamNotFound { .. })));
    }

    #[test]
    fn send_errors_are_classified() {
        assert!(matches!(
            send_error(FfmpegError::InvalidData),
            ServiceError::InvalidData(_)
        ));
        let full = send_error(FfmpegError::Other { errno: ffi::EAGAIN });
        assert!(matches!(full, ServiceError::InvalidData(ref msg) if msg.contains("dropped")));
        assert!(matches!(
            send_error(FfmpegError::Bug),
            ServiceError::Backend(_)
        ));
    }

    #[test]
    fn pixel_formats_map_both_ways() {
        let formats = [
            PixelFormat::Yuv420p,
            PixelFormat::Nv12,
            PixelFormat::Rgba,
            PixelFormat::Bgr24,
        ];
        for format in formats {
            assert_eq!(pixel_from_ffmpeg(pixel_to_ffmpeg(format)), Some(format));
        }
        assert_eq!(pixel_from_ffmpeg(Pixel::GRAY8), None);
    }
}
