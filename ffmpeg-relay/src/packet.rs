use ffmpeg_next::Rational;

/// A compressed packet as read from the input, tagged with the time base
/// of the stream it belongs to. Cloning takes a new reference on the
/// payload buffer instead of copying it.
#[derive(Clone)]
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn duration(&self) -> i64 {
        self.packet.duration()
    }

    /// True when the packet carries no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.packet.data().is_none_or(|data| data.is_empty())
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }

    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}
