use ffmpeg_next::{Rational, codec::Parameters, format::stream};

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

impl From<ffmpeg_next::media::Type> for MediaKind {
    fn from(value: ffmpeg_next::media::Type) -> Self {
        match value {
            ffmpeg_next::media::Type::Video => MediaKind::Video,
            ffmpeg_next::media::Type::Audio => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }
}

impl MediaKind {
    pub fn is_av(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }
}

/// Metadata of one elementary stream of the input: codec parameters and
/// the time base its packets are stamped in.
pub struct AvStream {
    index: usize,
    kind: MediaKind,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
}

impl AvStream {
    pub fn new(index: usize, kind: MediaKind, parameters: Parameters, time_base: Rational) -> Self {
        Self {
            index,
            kind,
            parameters,
            time_base,
            rate: Rational::new(0, 1),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
    pub fn kind(&self) -> MediaKind {
        self.kind
    }
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Advertised average frame rate, 0 when the container doesn't say.
    pub fn fps(&self) -> f32 {
        if self.rate.denominator() == 0 {
            return 0.0;
        }
        self.rate.numerator() as f32 / self.rate.denominator() as f32
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let parameters = stream.parameters();
        Self {
            index: stream.index(),
            kind: MediaKind::from(parameters.medium()),
            parameters,
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            kind: self.kind,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
        }
    }
}
