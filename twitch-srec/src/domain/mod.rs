//! Domain types shared by the recorder components.

pub mod channel;
pub mod job;

pub use channel::{
    ChannelSource, ChannelTarget, FileChannelSource, StaticChannelSource, parse_channel_list,
};
pub use job::RecordingJob;
