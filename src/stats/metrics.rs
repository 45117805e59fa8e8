//! Statistics for ingested streams

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-stream packet and byte counters
///
/// Updated from the media path without locking.
#[derive(Debug)]
pub struct StreamCounters {
    audio_packets: AtomicU64,
    video_packets: AtomicU64,
    bytes_received: AtomicU64,
    bitrate: Mutex<BitrateMeter>,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self {
            audio_packets: AtomicU64::new(0),
            video_packets: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bitrate: Mutex::new(BitrateMeter::new()),
        }
    }

    /// Count an audio packet of `bytes` bytes
    pub fn record_audio(&self, bytes: usize) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count a video packet of `bytes` bytes
    pub fn record_video(&self, bytes: usize) {
        self.video_packets.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            video_packets: self.video_packets.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Bitrate since the previous call, in bits per second
    pub fn sample_bitrate(&self) -> u64 {
        let total = self.bytes_received.load(Ordering::Relaxed);
        self.bitrate.lock().sample(total, Instant::now())
    }
}

impl Default for StreamCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`StreamCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub audio_packets: u64,
    pub video_packets: u64,
    pub bytes_received: u64,
}

impl CounterSnapshot {
    pub fn total_packets(&self) -> u64 {
        self.audio_packets + self.video_packets
    }
}

/// Computes bitrate from the growth of a byte counter between samples
#[derive(Debug)]
pub struct BitrateMeter {
    last_bytes: u64,
    last_at: Instant,
}

impl BitrateMeter {
    pub fn new() -> Self {
        Self {
            last_bytes: 0,
            last_at: Instant::now(),
        }
    }

    /// Record a new counter value and return bits per second since the last one
    pub fn sample(&mut self, total_bytes: u64, now: Instant) -> u64 {
        let delta = total_bytes.saturating_sub(self.last_bytes);
        let elapsed = now.saturating_duration_since(self.last_at);

        self.last_bytes = total_bytes;
        self.last_at = now;

        bitrate(delta, elapsed)
    }
}

impl Default for BitrateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bits per second for `bytes` transferred over `elapsed`
pub fn bitrate(bytes: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis() as u64;
    if millis == 0 {
        return 0;
    }
    bytes.saturating_mul(8_000) / millis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = StreamCounters::new();
        counters.record_audio(100);
        counters.record_video(1000);
        counters.record_video(500);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.audio_packets, 1);
        assert_eq!(snapshot.video_packets, 2);
        assert_eq!(snapshot.bytes_received, 1600);
        assert_eq!(snapshot.total_packets(), 3);
    }

    #[test]
    fn test_bitrate_calculation() {
        // 1,000,000 bytes * 8 bits / 10 seconds = 800,000 bps
        assert_eq!(bitrate(1_000_000, Duration::from_secs(10)), 800_000);
        assert_eq!(bitrate(1_000_000, Duration::ZERO), 0);
    }

    #[test]
    fn test_bitrate_meter_uses_deltas() {
        let start = Instant::now();
        let mut meter = BitrateMeter {
            last_bytes: 0,
            last_at: start,
        };

        assert_eq!(meter.sample(10_000, start + Duration::from_secs(1)), 80_000);
        // Only the 5,000 new bytes count for the second window
        assert_eq!(meter.sample(15_000, start + Duration::from_secs(2)), 40_000);
    }
}
