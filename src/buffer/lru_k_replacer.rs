use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{CairnError, FrameId, Result};

/// Book-keeping for a single tracked frame.
#[derive(Debug)]
struct FrameEntry {
    /// Number of recorded accesses
    access_count: usize,
    /// Whether this frame may currently be evicted
    is_evictable: bool,
}

struct Inner {
    entries: HashMap<FrameId, FrameEntry>,
    /// Frames with fewer than k accesses, most recent *first* access at
    /// the front. These have infinite backward k-distance.
    history: VecDeque<FrameId>,
    /// Frames with at least k accesses, most recent k-th access at the
    /// front. The back of each list is the eviction candidate.
    kth: VecDeque<FrameId>,
    /// Count of evictable entries
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// Evicts the frame with the largest backward k-distance: the age of its
/// k-th most recent access. A frame with fewer than k accesses counts as
/// infinitely distant and is preferred as a victim; ties among those are
/// broken by least recent first access.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    inner: Mutex<Inner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `num_frames` frames with the
    /// given k.
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k > 0, "k must be non-zero");
        Self {
            k,
            num_frames,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                history: VecDeque::new(),
                kth: VecDeque::new(),
                curr_size: 0,
            }),
        }
    }

    fn check_frame(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.num_frames {
            return Err(CairnError::InvalidFrameId(frame_id));
        }
        Ok(())
    }

    /// Records an access to `frame_id`. A first access inserts the frame
    /// at the head of the history list (non-evictable by default); the
    /// k-th access promotes it to the head of the kth list; later
    /// accesses move it back to the kth head. Accesses between the first
    /// and the k-th leave the history position unchanged: history orders
    /// by first access, kth by k-th-most-recent access.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;
        let mut inner = self.inner.lock();

        let entry = inner.entries.entry(frame_id).or_insert(FrameEntry {
            access_count: 0,
            is_evictable: false,
        });
        entry.access_count += 1;
        let count = entry.access_count;

        if count == 1 {
            inner.history.push_front(frame_id);
        } else if count == self.k {
            remove_from(&mut inner.history, frame_id);
            inner.kth.push_front(frame_id);
        } else if count > self.k {
            remove_from(&mut inner.kth, frame_id);
            inner.kth.push_front(frame_id);
        }
        Ok(())
    }

    /// Marks a tracked frame evictable or not, adjusting the evictable
    /// count when the state actually changes.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.check_frame(frame_id)?;
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get_mut(&frame_id) else {
            return Ok(());
        };
        if entry.is_evictable == evictable {
            return Ok(());
        }
        entry.is_evictable = evictable;
        if evictable {
            inner.curr_size += 1;
        } else {
            inner.curr_size -= 1;
        }
        Ok(())
    }

    /// Evicts the frame with the largest backward k-distance: the
    /// tail-most evictable entry of the history list, or failing that,
    /// of the kth list. The victim's access history is dropped.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        if inner.curr_size == 0 {
            return None;
        }

        let victim = pick_victim(&inner.entries, &inner.history)
            .or_else(|| pick_victim(&inner.entries, &inner.kth))?;

        let entry = inner.entries.remove(&victim)?;
        if entry.access_count < self.k {
            remove_from(&mut inner.history, victim);
        } else {
            remove_from(&mut inner.kth, victim);
        }
        inner.curr_size -= 1;
        Some(victim)
    }

    /// Drops a tracked, evictable frame from the replacer. Untracked or
    /// non-evictable frames are ignored; the buffer pool only removes
    /// frames whose pin count has reached zero.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;
        let mut inner = self.inner.lock();

        match inner.entries.get(&frame_id) {
            Some(entry) if entry.is_evictable => {}
            _ => return Ok(()),
        }
        let entry = inner
            .entries
            .remove(&frame_id)
            .expect("entry checked above");
        if entry.access_count < self.k {
            remove_from(&mut inner.history, frame_id);
        } else {
            remove_from(&mut inner.kth, frame_id);
        }
        inner.curr_size -= 1;
        Ok(())
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

fn remove_from(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
    if let Some(pos) = list.iter().position(|&f| f == frame_id) {
        list.remove(pos);
    }
}

fn pick_victim(entries: &HashMap<FrameId, FrameEntry>, list: &VecDeque<FrameId>) -> Option<FrameId> {
    list.iter()
        .rev()
        .find(|f| entries.get(*f).is_some_and(|e| e.is_evictable))
        .copied()
}
