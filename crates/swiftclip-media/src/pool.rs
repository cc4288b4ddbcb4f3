// crates/swiftclip-media/src/pool.rs
//
// EncoderPool: idle HardwareEncoders keyed by output resolution.
//
//   acquire(dest, w, h)  pop an idle encoder for the key and reset it onto
//                        `dest`; if the reset fails the instance is released
//                        and a fresh encoder is built instead.
//   release(encoder)     park the encoder if fewer than `max_idle` are idle
//                        for its key, otherwise destroy it.
//
// Both run entirely inside one parking_lot critical section. An encoder
// popped from the map is owned by exactly one caller, so no session can ever
// see an instance another session holds.
//
// The pool is passed explicitly (Arc) to whoever needs it; there is no global.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use swiftclip_core::config::{EncoderConfig, PoolConfig};
use swiftclip_core::error::Result;

use crate::encoder::{settings_for, HardwareEncoder};
use crate::platform::MediaPlatform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub width:  u32,
    pub height: u32,
}

impl PoolKey {
    /// Key for a requested output size, after the encoder's even rounding.
    pub fn for_size(config: &EncoderConfig, width: u32, height: u32) -> Self {
        let s = settings_for(config, width, height);
        Self { width: s.width, height: s.height }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

pub struct EncoderPool {
    platform: Arc<dyn MediaPlatform>,
    config:   EncoderConfig,
    max_idle: usize,
    idle:     Mutex<HashMap<PoolKey, VecDeque<HardwareEncoder>>>,
    created:  AtomicU64,
    reused:   AtomicU64,
}

impl EncoderPool {
    pub fn new(platform: Arc<dyn MediaPlatform>, encoder: EncoderConfig, pool: &PoolConfig) -> Self {
        Self {
            platform,
            config:   encoder,
            max_idle: pool.max_idle_per_resolution,
            idle:     Mutex::new(HashMap::new()),
            created:  AtomicU64::new(0),
            reused:   AtomicU64::new(0),
        }
    }

    /// An encoder in the Configured state, writing to `destination`.
    pub fn acquire(&self, destination: &Path, width: u32, height: u32) -> Result<HardwareEncoder> {
        let key = PoolKey::for_size(&self.config, width, height);
        let mut idle = self.idle.lock();

        if let Some(mut encoder) = idle.get_mut(&key).and_then(VecDeque::pop_front) {
            match encoder.reset(destination) {
                Ok(()) => {
                    self.reused.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, dest = %destination.display(), "encoder reused from pool");
                    return Ok(encoder);
                }
                Err(e) => {
                    warn!(%key, "pooled encoder failed to reset, building a new one: {e}");
                    encoder.release();
                }
            }
        }

        let encoder = HardwareEncoder::new(Arc::clone(&self.platform), &self.config, destination, width, height)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(%key, dest = %destination.display(), "encoder created");
        Ok(encoder)
    }

    /// Return an encoder after its job, whatever state it is in.
    pub fn release(&self, mut encoder: HardwareEncoder) {
        let (width, height) = encoder.size();
        let key = PoolKey { width, height };
        let mut idle = self.idle.lock();
        let slot = idle.entry(key).or_default();
        if slot.len() < self.max_idle {
            slot.push_back(encoder);
            debug!(%key, idle = slot.len(), "encoder parked");
        } else {
            encoder.release();
            debug!(%key, "pool full, encoder destroyed");
        }
    }

    /// Destroy every idle encoder.
    pub fn clear(&self) {
        let drained: Vec<HardwareEncoder> = self.idle.lock().drain().flat_map(|(_, q)| q).collect();
        let n = drained.len();
        for mut encoder in drained {
            encoder.release();
        }
        if n > 0 {
            debug!(count = n, "encoder pool cleared");
        }
    }

    pub fn idle_count(&self, width: u32, height: u32) -> usize {
        let key = PoolKey::for_size(&self.config, width, height);
        self.idle.lock().get(&key).map_or(0, VecDeque::len)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }
}

impl Drop for EncoderPool {
    fn drop(&mut self) {
        self.clear();
    }
}
