use num_complex::Complex32;

/// A single complex IQ sample. 32-bit float I and Q, matching the RTP
/// payload's wire representation exactly so archival is lossless.
pub type Sample = Complex32;

/// One RTP packet as delivered by the ingress thread, already stripped of
/// header bytes other than the three fields the resequencer consumes.
///
/// Per §6, no other RTP/AVP framing detail is interpreted; the source is a
/// trusted local SDR daemon, not an arbitrary network peer.
#[derive(Debug, Clone)]
pub struct Packet {
    pub seq: u16,
    pub rtp_ts: u32,
    pub ssrc: u32,
    pub payload: Vec<Sample>,
}

/// Why a gap in the sample stream was filled with zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GapCause {
    /// Missing packet(s) inside the resequencer window, filled in place.
    PacketLoss,
    /// Resync after a jump too large to bridge; queue was flushed.
    Resync,
    /// Source silence exceeded the configured outage bound.
    SourceUnavailable,
    /// Back-pressure forced the oldest queued packets to be dropped.
    QueueOverflow,
}

/// One entry in a `RawArchiveSegment`'s gap manifest: `n_zeros` synthetic
/// samples were inserted starting at `start_index` within the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GapEntry {
    pub start_index: u64,
    pub n_zeros: u64,
    pub cause: GapCause,
}
