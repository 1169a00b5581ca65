// Encoding engine - independent of the CLI

pub mod core;
pub mod worker;

pub use core::*;
pub use worker::{ChannelFactory, EncoderChannel, FfmpegChannel, FfmpegChannelFactory, Outbox};
