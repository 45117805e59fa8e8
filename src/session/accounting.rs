//! Per-connection media accounting
//!
//! Written by the connection's media path, read and reset by its sampler.
//! Unlike [`StreamCounters`](crate::stats::StreamCounters) these counters are
//! per sampling window and drive the bandwidth cutoff.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::media::FrameKind;

/// Counter values for one sampling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub audio_frames: u64,
    pub key_frames: u64,
    pub inter_frames: u64,
    pub unknown_frames: u64,
    pub packets: u64,
    pub bytes: u64,
}

impl WindowSnapshot {
    pub fn video_frames(&self) -> u64 {
        self.key_frames + self.inter_frames + self.unknown_frames
    }
}

#[derive(Debug, Default)]
pub struct MediaAccounting {
    audio_frames: AtomicU64,
    key_frames: AtomicU64,
    inter_frames: AtomicU64,
    unknown_frames: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
    errored: AtomicBool,
    delivery_failures: AtomicU32,
}

impl MediaAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_audio_frame(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video_frame(&self, kind: FrameKind) {
        let counter = match kind {
            FrameKind::Key => &self.key_frames,
            FrameKind::Inter => &self.inter_frames,
            FrameKind::Unknown => &self.unknown_frames,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one outgoing RTP packet of `bytes` payload bytes
    pub fn record_packet(&self, bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Read and reset the window counters
    pub fn take_window(&self) -> WindowSnapshot {
        WindowSnapshot {
            audio_frames: self.audio_frames.swap(0, Ordering::Relaxed),
            key_frames: self.key_frames.swap(0, Ordering::Relaxed),
            inter_frames: self.inter_frames.swap(0, Ordering::Relaxed),
            unknown_frames: self.unknown_frames.swap(0, Ordering::Relaxed),
            packets: self.packets.swap(0, Ordering::Relaxed),
            bytes: self.bytes.swap(0, Ordering::Relaxed),
        }
    }

    pub fn mark_errored(&self) {
        self.errored.store(true, Ordering::Release);
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Record the outcome of a metadata delivery
    ///
    /// Marks the connection errored once more than `limit` consecutive
    /// deliveries have failed; returns whether it did so.
    pub fn record_delivery(&self, ok: bool, limit: u32) -> bool {
        if ok {
            self.delivery_failures.store(0, Ordering::Relaxed);
            return false;
        }

        let failures = self.delivery_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures > limit {
            self.mark_errored();
            return true;
        }
        false
    }

    pub fn delivery_failures(&self) -> u32 {
        self.delivery_failures.load(Ordering::Relaxed)
    }
}
