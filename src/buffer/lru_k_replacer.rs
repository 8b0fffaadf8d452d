use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Result, StrataError, Timestamp};

/// Access history for a single tracked frame
#[derive(Debug)]
struct FrameHistory {
    /// Up to k access timestamps, oldest first
    history: VecDeque<Timestamp>,
    /// Whether this frame may currently be chosen as a victim
    is_evictable: bool,
}

impl FrameHistory {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }
}

#[derive(Debug)]
struct ReplacerState {
    frames: HashMap<FrameId, FrameHistory>,
    /// Monotonic logical clock, advanced on every recorded access
    current_timestamp: Timestamp,
    num_evictable: usize,
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// the difference between the current timestamp and the frame's kth most
/// recent access. Frames with fewer than k recorded accesses count as
/// infinitely distant and are evicted first, ordered by their earliest
/// recorded access.
pub struct LruKReplacer {
    k: usize,
    /// Frame ids must lie in `[0, num_frames)`
    num_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            k,
            num_frames,
            state: Mutex::new(ReplacerState {
                frames: HashMap::new(),
                current_timestamp: 0,
                num_evictable: 0,
            }),
        }
    }

    fn check_frame_id(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.num_frames {
            return Err(StrataError::InvalidFrameId(frame_id));
        }
        Ok(())
    }

    /// Selects and removes a victim frame. Returns `None` when no frame is
    /// evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let mut victim: Option<FrameId> = None;
        let mut victim_deficient = false;
        // Earliest access for k-deficient candidates, kth-previous
        // timestamp for k-sufficient ones. Smaller wins in both tiers:
        // the smallest kth-previous timestamp is the largest k-distance.
        let mut victim_key = Timestamp::MAX;

        for (&frame_id, info) in &state.frames {
            if !info.is_evictable {
                continue;
            }
            let deficient = info.history.len() < self.k;
            let key = if deficient {
                info.history.front().copied().unwrap_or(0)
            } else {
                info.history[info.history.len() - self.k]
            };
            let better = match (victim_deficient, deficient) {
                (true, false) => false,
                (false, true) => true,
                _ => victim.is_none() || key < victim_key,
            };
            if better {
                victim = Some(frame_id);
                victim_deficient = deficient;
                victim_key = key;
            }
        }

        if let Some(frame_id) = victim {
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
        }
        victim
    }

    /// Records an access to `frame_id` at the next clock tick. Unknown
    /// frames are inserted as non-evictable.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame_id(frame_id)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.current_timestamp += 1;

        let info = state.frames.entry(frame_id).or_insert_with(FrameHistory::new);
        info.history.push_back(state.current_timestamp);
        while info.history.len() > self.k {
            info.history.pop_front();
        }
        Ok(())
    }

    /// Marks a frame evictable or pinned. No-op for unknown frames and for
    /// unchanged flags.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) -> Result<()> {
        self.check_frame_id(frame_id)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(info) = state.frames.get_mut(&frame_id) else {
            return Ok(());
        };
        if info.is_evictable != is_evictable {
            info.is_evictable = is_evictable;
            if is_evictable {
                state.num_evictable += 1;
            } else {
                state.num_evictable -= 1;
            }
        }
        Ok(())
    }

    /// Drops a frame from tracking. Unknown frames are a no-op; removing a
    /// frame that is not evictable is a caller error.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame_id(frame_id)?;

        let mut state = self.state.lock();
        let is_evictable = match state.frames.get(&frame_id) {
            None => return Ok(()),
            Some(info) => info.is_evictable,
        };
        if !is_evictable {
            return Err(StrataError::FrameNotEvictable(frame_id));
        }
        state.frames.remove(&frame_id);
        state.num_evictable -= 1;
        Ok(())
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
