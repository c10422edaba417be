pub mod media;
pub mod timeline;

pub use media::MediaInfo;
pub use timeline::{
    Interpolation, Keyframe, SequenceProperties, Timeline, TimelineClip, TrackType,
};
