// Bounded, frame-expiring combo buffer
//
// Each frame runs expire → admit → trim. Expired entries never count against
// the capacity trim.

use super::{ComboPriority, InputCombo};
use crate::errors::BufferError;
use tracing::debug;

/// Combo stamped with the frame it was admitted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedCombo {
    combo: InputCombo,
    frame: u64,
    seq: u64,
}

impl BufferedCombo {
    pub fn combo(&self) -> &InputCombo {
        &self.combo
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn priority(&self) -> ComboPriority {
        self.combo.priority()
    }

    fn expired_at(&self, frame: u64) -> bool {
        frame.saturating_sub(self.frame) >= u64::from(self.combo.active_frames())
    }

    /// Smallest key is evicted first: lowest priority, then oldest
    fn eviction_key(&self) -> (ComboPriority, u64, u64) {
        (self.combo.priority(), self.frame, self.seq)
    }
}

/// What one `next_frame` call changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub expired: usize,
    pub evicted: Vec<BufferedCombo>,
    /// Combos admitted this frame that survived the capacity trim
    pub admitted: Vec<InputCombo>,
}

/// Single-writer buffer; advance it from one thread only
#[derive(Debug)]
pub struct InputComboBuffer {
    capacity: usize,
    entries: Vec<BufferedCombo>,
    last_frame: Option<u64>,
    next_seq: u64,
}

impl InputComboBuffer {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            entries: Vec::with_capacity(capacity + 1),
            last_frame: None,
            next_seq: 0,
        })
    }

    /// Advance to `frame`, admitting `new_combos`.
    ///
    /// A frame lower than the previous one is rejected and leaves the buffer
    /// untouched; repeating the same frame is allowed.
    pub fn next_frame<I>(&mut self, frame: u64, new_combos: I) -> Result<FrameReport, BufferError>
    where
        I: IntoIterator<Item = InputCombo>,
    {
        if let Some(last) = self.last_frame {
            if frame < last {
                return Err(BufferError::NonMonotonicFrame { last, frame });
            }
        }
        self.last_frame = Some(frame);

        let before = self.entries.len();
        self.entries.retain(|entry| !entry.expired_at(frame));
        let expired = before - self.entries.len();

        let first_new = self.next_seq;
        for combo in new_combos {
            self.entries.push(BufferedCombo {
                combo,
                frame,
                seq: self.next_seq,
            });
            self.next_seq += 1;
        }

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.eviction_key())
                .map(|(index, _)| index);
            match victim {
                Some(index) => evicted.push(self.entries.remove(index)),
                None => break,
            }
        }

        let admitted = self
            .entries
            .iter()
            .filter(|entry| entry.seq >= first_new)
            .map(|entry| entry.combo.clone())
            .collect();

        if expired > 0 || !evicted.is_empty() {
            debug!(
                frame = frame,
                expired = expired,
                evicted = evicted.len(),
                size = self.entries.len(),
                "Combo buffer trimmed"
            );
        }

        Ok(FrameReport {
            expired,
            evicted,
            admitted,
        })
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// Live combos, oldest first
    pub fn combos(&self) -> impl Iterator<Item = &InputCombo> {
        self.entries.iter().map(|entry| &entry.combo)
    }

    pub fn entries(&self) -> &[BufferedCombo] {
        &self.entries
    }

    pub fn peek_oldest(&self) -> Option<&InputCombo> {
        self.entries.first().map(|entry| &entry.combo)
    }

    /// Drop up to `count` of the oldest entries, returning how many were removed
    pub fn discard(&mut self, count: usize) -> usize {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
        count
    }
}
