//! Codec selection by format tag
//!
//! The factory is consulted once per voice, right after the header has been
//! parsed.

use super::{Codec, HardwareCodec, PcmCodec};
use crate::error::Result;
use crate::header::MediaHeader;
use crate::hw::SharedScheduler;
use crate::types::FormatTag;
use svd_common::config::HardwareConfig;
use tracing::debug;

/// Builds the codec for a parsed header
pub trait CodecFactory {
    fn create(&self, header: &MediaHeader) -> Result<Box<dyn Codec>>;
}

impl<F> CodecFactory for F
where
    F: Fn(&MediaHeader) -> Result<Box<dyn Codec>>,
{
    fn create(&self, header: &MediaHeader) -> Result<Box<dyn Codec>> {
        self(header)
    }
}

/// PCM decodes in software; IMA ADPCM goes to the hardware scheduler
pub struct DefaultCodecFactory {
    scheduler: SharedScheduler,
    config: HardwareConfig,
}

impl DefaultCodecFactory {
    pub fn new(scheduler: SharedScheduler, config: HardwareConfig) -> Self {
        Self { scheduler, config }
    }
}

impl CodecFactory for DefaultCodecFactory {
    fn create(&self, header: &MediaHeader) -> Result<Box<dyn Codec>> {
        debug!("Selecting codec for {:?}", header.format.tag);
        match header.format.tag {
            FormatTag::Pcm16 => Ok(Box::new(PcmCodec::new())),
            FormatTag::ImaAdpcm => Ok(Box::new(HardwareCodec::new(
                self.scheduler.clone(),
                &self.config,
                header.format.channels,
            )?)),
        }
    }
}
