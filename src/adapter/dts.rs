// DTS extraction for H.264/H.265 sources that only expose presentation
// order: holds a bounded window of access units and releases the earliest
// one once enough later units have arrived to know its decode timestamp.
//
// Kept independent of the Track Writer so an adapter can swap in a
// different extraction strategy (e.g. one that reads B-frame counts out
// of the bitstream instead of inferring them from a sliding window).

use std::collections::VecDeque;

/// Reorders presentation-timestamped access units into decode order.
///
/// Drops every access unit until the first key frame arrives, then accepts
/// everything. Access units are held in a window of `reorder_window + 1`
/// before the earliest one is released, so later, lower-PTS B-frames have
/// had a chance to arrive and be accounted for.
pub struct H26xDtsExtractor<T> {
    reorder_window: usize,
    started: bool,
    last_dts: Option<u32>,
    pending: VecDeque<(u32, T)>,
}

impl<T> H26xDtsExtractor<T> {
    pub fn new(reorder_window: usize) -> H26xDtsExtractor<T> {
        H26xDtsExtractor { reorder_window, started: false, last_dts: None, pending: VecDeque::new() }
    }

    /// Feeds one presentation-ordered access unit in. Returns the next
    /// `(dts, pts_delta, payload)` in decode order once the window has
    /// filled, or `None` while still waiting for the first key frame or for
    /// the window to fill.
    pub fn push(&mut self, pts: u32, key_frame: bool, payload: T) -> Option<(u32, u32, T)> {
        if !self.started {
            if !key_frame {
                return None;
            }
            self.started = true;
        }

        self.pending.push_back((pts, payload));
        if self.pending.len() <= self.reorder_window {
            return None;
        }

        self.release_earliest()
    }

    /// Releases any access units still held once the source has ended, in
    /// the order they were pushed.
    pub fn flush(&mut self) -> Vec<(u32, u32, T)> {
        let mut out = Vec::new();
        while let Some(unit) = self.release_earliest() {
            out.push(unit);
        }
        out
    }

    fn release_earliest(&mut self) -> Option<(u32, u32, T)> {
        let (earliest_pts, payload) = self.pending.pop_front()?;
        let window_min = self.pending.iter().map(|(p, _)| *p).min().unwrap_or(earliest_pts).min(earliest_pts);

        // Never goes below the last emitted DTS (monotonic) and never above
        // this unit's own PTS (DTS <= PTS), in that preference order.
        let dts = match self.last_dts {
            Some(last) => window_min.max(last).min(earliest_pts),
            None => window_min,
        };
        self.last_dts = Some(dts);
        let pts_delta = earliest_pts.saturating_sub(dts);
        Some((dts, pts_delta, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_frames_before_first_key_frame() {
        let mut extractor: H26xDtsExtractor<()> = H26xDtsExtractor::new(0);
        assert_eq!(extractor.push(100, false, ()), None);
        assert_eq!(extractor.push(200, false, ()), None);
        assert_eq!(extractor.push(300, true, ()), Some((300, 0, ())));
    }

    #[test]
    fn test_zero_window_passes_through_immediately() {
        let mut extractor: H26xDtsExtractor<u32> = H26xDtsExtractor::new(0);
        assert_eq!(extractor.push(0, true, 0), Some((0, 0, 0)));
        assert_eq!(extractor.push(40, false, 1), Some((40, 0, 1)));
        assert_eq!(extractor.push(80, false, 2), Some((80, 0, 2)));
    }

    #[test]
    fn test_reordered_frames_are_monotonic_and_dts_le_pts() {
        // Classic IBBP pattern: pts arrival order 0, 120, 40, 80, ...
        let mut extractor: H26xDtsExtractor<u32> = H26xDtsExtractor::new(2);
        let mut out = Vec::new();
        for pts in [0u32, 120, 40, 80, 240, 160, 200] {
            if let Some((dts, pts_delta, pts_in)) = extractor.push(pts, true, pts) {
                out.push((dts, pts_delta, pts_in));
            }
        }
        out.extend(extractor.flush());

        let mut last_dts = 0u32;
        for (dts, _, pts) in &out {
            assert!(*dts <= *pts, "dts {} must not exceed pts {}", dts, pts);
            assert!(*dts >= last_dts, "dts must be monotonic non-decreasing");
            last_dts = *dts;
        }
    }
}
