/*!
    The capability surface a decode loop needs from a media library.

    Everything codec-specific (demuxing, decoding, pixel conversion) lives
    behind [`DecodeService`]. Handles are associated types so each backend can
    use its native objects directly; the session owns them and gives them back
    to the service for release.
*/

use crate::{Frame, PixelFormat, Source, error::ServiceError};

/**
    Kind of elementary stream in a container.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Other,
}

/**
    Information about one stream, as probed by the service.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// Index of the stream within its container.
    pub index: usize,
    pub kind: MediaKind,
    /// Codec name as reported by the service (e.g. "h264").
    pub codec: String,
    /// Frame width in pixels (0 for non-video streams).
    pub width: u32,
    /// Frame height in pixels (0 for non-video streams).
    pub height: u32,
    /// Native pixel format, if the service can express it.
    pub pixel_format: Option<PixelFormat>,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Native format name for log and error messages.
    pub fn format_name(&self) -> String {
        match self.pixel_format {
            Some(format) => format!("{} {}x{}", format, self.width, self.height),
            None => format!("{} {}x{}", self.codec, self.width, self.height),
        }
    }
}

/**
    A media decoding library, seen from the decode loop.

    Implementations must tolerate many independent sessions at once, one
    per thread. Handles of one session are never shared with another.
*/
pub trait DecodeService: Send + Sync + 'static {
    /// Open container / demuxer.
    type Input;
    /// A decoder implementation found for a stream, not yet opened.
    type Codec;
    /// Opened decoder context.
    type Decoder;
    /// Pixel format conversion context.
    type Converter;
    /// One compressed packet.
    type Packet;
    /// One decoded frame in the stream's native format.
    type DecodedFrame;

    /**
        Open and probe a source.
    */
    fn open(&self, source: &Source) -> Result<Self::Input, ServiceError>;

    /**
        List the streams of an opened input.
    */
    fn probe_streams(&self, input: &mut Self::Input) -> Result<Vec<StreamInfo>, ServiceError>;

    /**
        Look up a decoder for the stream's encoding.
    */
    fn find_decoder(&self, input: &Self::Input, stream: &StreamInfo) -> Option<Self::Codec>;

    /**
        Create and open a decoder context for the stream.
    */
    fn open_decoder(
        &self,
        input: &Self::Input,
        stream: &StreamInfo,
        codec: Self::Codec,
    ) -> Result<Self::Decoder, ServiceError>;

    /**
        Create a conversion context from the decoder's native format to
        `target`, keeping the stream dimensions.
    */
    fn open_converter(
        &self,
        decoder: &Self::Decoder,
        stream: &StreamInfo,
        target: PixelFormat,
    ) -> Result<Self::Converter, ServiceError>;

    /**
        Read the next packet of any stream. `Ok(None)` is end of stream.
    */
    fn read_packet(&self, input: &mut Self::Input) -> Result<Option<Self::Packet>, ServiceError>;

    /// Index of the stream a packet belongs to.
    fn packet_stream(&self, packet: &Self::Packet) -> usize;

    fn send_packet(
        &self,
        decoder: &mut Self::Decoder,
        packet: &Self::Packet,
    ) -> Result<(), ServiceError>;

    /**
        Signal end of input so buffered frames can be drained.
    */
    fn send_eof(&self, decoder: &mut Self::Decoder) -> Result<(), ServiceError>;

    /**
        Take the next decoded frame. `Ok(None)` means the decoder needs more
        input (or is fully drained after EOF).
    */
    fn receive_frame(
        &self,
        decoder: &mut Self::Decoder,
    ) -> Result<Option<Self::DecodedFrame>, ServiceError>;

    /**
        Convert a decoded frame into `target`, whose dimensions and format
        were fixed when the session started.

        Return [`ServiceError::ConverterSetup`] if the conversion context had
        to be rebuilt and could not be; any other error only skips the frame.
    */
    fn convert(
        &self,
        converter: &mut Self::Converter,
        frame: &Self::DecodedFrame,
        target: &mut Frame,
    ) -> Result<(), ServiceError>;

    fn release_packet(&self, packet: Self::Packet) {
        drop(packet);
    }

    fn release_frame(&self, frame: Self::DecodedFrame) {
        drop(frame);
    }

    fn close_converter(&self, converter: Self::Converter) -> Result<(), ServiceError>;

    fn close_decoder(&self, decoder: Self::Decoder) -> Result<(), ServiceError>;

    fn close_input(&self, input: Self::Input) -> Result<(), ServiceError>;
}
