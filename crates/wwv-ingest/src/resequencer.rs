//! Packet resequencer (C1).
//!
//! Accepts RTP packets in arrival order and emits samples in strict,
//! monotonically increasing `rtp_ts` order with no gaps: missing ranges
//! are filled with zero samples and recorded in a gap manifest rather
//! than represented as an index jump. See spec.md §4.1.

use tracing::warn;
use wwv_core::{GapCause, GapEntry, Packet, Sample};
use wwv_core::wrap::{signed_wrap_u16, signed_wrap_u32};

/// Circular buffer size in packet slots, per §4.1.
const WINDOW: usize = 64;

/// Maximum gap, in seconds at the channel sample rate, before the source
/// is declared offline. Configurable; spec default is 10s (§4.1, §5).
#[derive(Debug, Clone, Copy)]
pub struct ResequencerConfig {
    pub sample_rate_hz: u32,
    pub max_gap_secs: f64,
}

impl ResequencerConfig {
    pub fn max_gap_samples(&self) -> i64 {
        (self.max_gap_secs * self.sample_rate_hz as f64) as i64
    }
}

/// One drained unit of work: either real samples or a synthetic zero-fill
/// run, always in strictly increasing `rtp_ts` order.
#[derive(Debug, Clone)]
pub enum Emission {
    Samples { rtp_ts: u32, samples: Vec<Sample> },
    Gap(GapEntry),
    Discontinuity { cause: GapCause },
}

/// Outcome of feeding one packet into the resequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Buffered,
    Duplicate,
    TooOld,
    ResyncRequired,
}

struct Slot {
    packet: Packet,
}

/// Reorders out-of-order RTP packets into a dense, gap-filled sample
/// stream. Owned exclusively by one channel worker (§3 "Ownership").
pub struct Resequencer {
    config: ResequencerConfig,
    slots: Vec<Option<Slot>>,
    expected_seq: u16,
    expected_rtp_ts: u32,
    resynced: bool,
    /// Running sample index within the channel, used as `start_index` in
    /// gap manifests — advances by exactly the number of samples emitted,
    /// satisfying property 1 (sample-count conservation).
    emitted_samples: u64,
}

impl Resequencer {
    pub fn new(config: ResequencerConfig) -> Self {
        Self {
            config,
            slots: (0..WINDOW).map(|_| None).collect(),
            expected_seq: 0,
            expected_rtp_ts: 0,
            resynced: false,
            emitted_samples: 0,
        }
    }

    /// Re-anchors the resequencer to a fresh `(seq, rtp_ts)` pair, as
    /// required after a `ResyncRequired` outcome or at startup once the
    /// first packet has been observed.
    pub fn resync(&mut self, seq: u16, rtp_ts: u32) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.expected_seq = seq;
        self.expected_rtp_ts = rtp_ts;
        self.resynced = true;
    }

    fn slot_index(seq: u16) -> usize {
        (seq as usize) % WINDOW
    }

    /// Feeds one packet. Does not itself produce output; call [`Self::drain`]
    /// afterward to pull any now-contiguous emissions.
    ///
    /// A seq behind `expected_seq` but still inside the circular buffer's
    /// window is a `Duplicate` (its slot may still hold genuinely newer
    /// data). One that has fallen further behind than the window spans is
    /// `TooOld`: the window has long since cycled past it, so it counts as
    /// loss rather than a harmless repeat. A seq far enough ahead that it
    /// can never be reached by draining is `ResyncRequired`; the resync
    /// happens immediately so the triggering packet is not itself dropped.
    pub fn ingest(&mut self, packet: Packet) -> IngestOutcome {
        if !self.resynced {
            let seq = packet.seq;
            let rtp_ts = packet.rtp_ts;
            self.resync(seq, rtp_ts);
        }

        let seq_delta = signed_wrap_u16(packet.seq, self.expected_seq);
        if seq_delta < 0 {
            if (-seq_delta) as usize > WINDOW {
                return IngestOutcome::TooOld;
            }
            return IngestOutcome::Duplicate;
        }
        if seq_delta as usize >= WINDOW {
            let seq = packet.seq;
            let rtp_ts = packet.rtp_ts;
            self.resync(seq, rtp_ts);
            let idx = Self::slot_index(seq);
            self.slots[idx] = Some(Slot { packet });
            return IngestOutcome::ResyncRequired;
        }

        let idx = Self::slot_index(packet.seq);
        self.slots[idx] = Some(Slot { packet });
        IngestOutcome::Buffered
    }

    /// Forces the next `ingest` call to re-anchor from scratch, used when
    /// the source has been silent longer than `max_gap_secs` and there is
    /// no next packet yet to anchor to (§4.1).
    pub fn mark_unsynced(&mut self) {
        self.resynced = false;
    }

    pub fn max_gap_secs(&self) -> f64 {
        self.config.max_gap_secs
    }

    /// Drains every packet now reachable in expected-seq order, producing
    /// zero-fill gaps where the drain encountered a `rtp_ts` jump.
    pub fn drain(&mut self) -> Vec<Emission> {
        let mut out = Vec::new();
        loop {
            let idx = Self::slot_index(self.expected_seq);
            let Some(slot) = self.slots[idx].take() else {
                break;
            };
            let packet = slot.packet;

            let jump = signed_wrap_u32(packet.rtp_ts, self.expected_rtp_ts);
            if jump > 0 {
                let n_zeros = jump as u64;
                if jump as i64 > self.config.max_gap_samples() {
                    out.push(Emission::Discontinuity {
                        cause: GapCause::SourceUnavailable,
                    });
                    self.emitted_samples += n_zeros;
                    self.expected_rtp_ts = packet.rtp_ts;
                } else {
                    out.push(Emission::Gap(GapEntry {
                        start_index: self.emitted_samples,
                        n_zeros,
                        cause: GapCause::PacketLoss,
                    }));
                    self.emitted_samples += n_zeros;
                    self.expected_rtp_ts = packet.rtp_ts;
                }
            } else if jump < 0 {
                warn!(jump, "resequencer: packet rtp_ts behind expected, discarding");
                self.expected_seq = self.expected_seq.wrapping_add(1);
                continue;
            }

            let len = packet.payload.len() as u64;
            self.emitted_samples += len;
            self.expected_rtp_ts = self.expected_rtp_ts.wrapping_add(len as u32);
            self.expected_seq = self.expected_seq.wrapping_add(1);

            out.push(Emission::Samples {
                rtp_ts: packet.rtp_ts,
                samples: packet.payload,
            });
        }
        out
    }

    /// Forces a resync after a `ResyncRequired`/oversized-gap condition,
    /// recording the discontinuity. Caller supplies the triggering packet
    /// so the new anchor reflects it.
    pub fn force_resync(&mut self, seq: u16, rtp_ts: u32, cause: GapCause) -> Emission {
        self.resync(seq, rtp_ts);
        Emission::Discontinuity { cause }
    }

    pub fn emitted_samples(&self) -> u64 {
        self.emitted_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16, rtp_ts: u32, n: usize) -> Packet {
        Packet {
            seq,
            rtp_ts,
            ssrc: 1,
            payload: vec![Sample::new(0.0, 0.0); n],
        }
    }

    fn cfg() -> ResequencerConfig {
        ResequencerConfig {
            sample_rate_hz: 16_000,
            max_gap_secs: 10.0,
        }
    }

    #[test]
    fn in_order_emits_immediately() {
        let mut r = Resequencer::new(cfg());
        r.ingest(packet(0, 0, 320));
        let emissions = r.drain();
        assert_eq!(emissions.len(), 1);
        matches!(emissions[0], Emission::Samples { .. });
        assert_eq!(r.emitted_samples(), 320);
    }

    #[test]
    fn out_of_order_reassembles() {
        let mut r = Resequencer::new(cfg());
        r.ingest(packet(1, 320, 320));
        assert!(r.drain().is_empty());
        r.ingest(packet(0, 0, 320));
        let emissions = r.drain();
        // both packets now drain, in order
        assert_eq!(emissions.len(), 2);
        assert_eq!(r.emitted_samples(), 640);
    }

    #[test]
    fn packet_loss_burst_zero_fills_exact_count() {
        // Scenario S4: 5 packets (1600 samples) lost mid-stream.
        let mut r = Resequencer::new(cfg());
        r.ingest(packet(0, 0, 320));
        r.drain();
        // seq 1..5 lost; seq 6 arrives with rtp_ts jumped by 1600+320*1
        r.ingest(packet(6, 320 + 1600, 320));
        let emissions = r.drain();
        let gap = emissions
            .iter()
            .find_map(|e| match e {
                Emission::Gap(g) => Some(*g),
                _ => None,
            })
            .expect("expected a gap emission");
        assert_eq!(gap.n_zeros, 1600);
        assert_eq!(r.emitted_samples(), 320 + 1600 + 320);
    }

    #[test]
    fn duplicate_is_discarded() {
        let mut r = Resequencer::new(cfg());
        r.ingest(packet(0, 0, 320));
        r.drain();
        assert_eq!(r.ingest(packet(0, 0, 320)), IngestOutcome::Duplicate);
    }

    #[test]
    fn large_jump_requires_resync() {
        let mut r = Resequencer::new(cfg());
        r.ingest(packet(0, 0, 320));
        r.drain();
        assert_eq!(
            r.ingest(packet(200, 200 * 320, 320)),
            IngestOutcome::ResyncRequired
        );
    }

    #[test]
    fn rtp_ts_wrap_places_sample_512_later_not_earlier() {
        // Property 10 exercised through the resequencer drain path.
        let mut r = Resequencer::new(cfg());
        r.resync(0, 0xFFFF_FE00);
        r.ingest(packet(0, 0xFFFF_FE00, 512));
        r.drain();
        r.ingest(packet(1, 0, 320));
        let emissions = r.drain();
        // no gap should have been inserted: 0 is exactly 512 samples after
        // 0xFFFFFE00, matching the prior packet's length.
        assert!(emissions
            .iter()
            .all(|e| !matches!(e, Emission::Gap(_))));
    }
}
