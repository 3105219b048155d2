/*!
    Session setup: open, probe, pick a decoder, build the conversion path.
*/

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    DecodeService, Frame, LoopConfig, Source, StopSignal, StreamInfo,
    error::{DecodeError, DecodeResult, ServiceError},
    session::{DecodeSession, SessionId, SessionResources},
};

/**
    Starts decode sessions against one decode service.

    Cheap to clone; every player holds its own copy and starts as many
    sessions as it needs. Sessions started from the same loop share nothing
    but the service.
*/
pub struct FrameDecodeLoop<S: DecodeService> {
    service: Arc<S>,
    config: LoopConfig,
}

impl<S: DecodeService> Clone for FrameDecodeLoop<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            config: self.config.clone(),
        }
    }
}

impl<S: DecodeService> FrameDecodeLoop<S> {
    pub fn new(service: S, config: LoopConfig) -> Self {
        Self::with_shared(Arc::new(service), config)
    }

    pub fn with_shared(service: Arc<S>, config: LoopConfig) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /**
        Open `source` and prepare a session that yields frames from its first
        video stream.

        On any failure everything acquired so far is released before the
        error is returned. Calling this again with the same source starts an
        independent session.
    */
    pub fn start(
        &self,
        id: SessionId,
        source: Source,
        stop: StopSignal,
    ) -> DecodeResult<DecodeSession<S>> {
        let service = &*self.service;
        let target = self.config.target_format;
        let mut resources = SessionResources::new(Arc::clone(&self.service), id);

        info!(session = %id, source = %source, "opening");
        let open_error = |reason| DecodeError::Open {
            session: id,
            location: source.to_string(),
            reason,
        };
        let input = resources
            .input
            .insert(service.open(&source).map_err(open_error)?);
        let streams = service.probe_streams(input).map_err(open_error)?;
        debug!(session = %id, streams = streams.len(), "probed");

        let stream = streams
            .into_iter()
            .find(StreamInfo::is_video)
            .ok_or_else(|| DecodeError::StreamNotFound {
                session: id,
                location: source.to_string(),
            })?;

        let codec =
            service
                .find_decoder(input, &stream)
                .ok_or_else(|| DecodeError::DecoderUnavailable {
                    session: id,
                    codec: stream.codec.clone(),
                    reason: None,
                })?;
        let decoder = service.open_decoder(input, &stream, codec).map_err(|reason| {
            DecodeError::DecoderUnavailable {
                session: id,
                codec: stream.codec.clone(),
                reason: Some(reason),
            }
        })?;
        let decoder = resources.decoder.insert(decoder);

        let conversion_error = |reason| DecodeError::ConversionSetup {
            session: id,
            from: stream.format_name(),
            to: target.to_string(),
            reason,
        };
        if stream.width == 0 || stream.height == 0 {
            return Err(conversion_error(ServiceError::Unsupported(
                "stream has no dimensions".into(),
            )));
        }
        let scratch = Frame::alloc(stream.width, stream.height, target).ok_or_else(|| {
            conversion_error(ServiceError::Unsupported(format!(
                "{target} is not a packed format"
            )))
        })?;
        let converter = service
            .open_converter(decoder, &stream, target)
            .map_err(conversion_error)?;
        resources.converter = Some(converter);
        resources.scratch = Some(scratch);

        info!(
            session = %id,
            stream = stream.index,
            codec = %stream.codec,
            width = stream.width,
            height = stream.height,
            target = %target,
            "decoding"
        );

        Ok(DecodeSession::new(
            id,
            source,
            Arc::clone(&self.service),
            self.config.clone(),
            stop,
            stream,
            resources,
        ))
    }
}
