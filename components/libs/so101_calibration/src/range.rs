//! Range-of-motion tracking while an operator sweeps a joint by hand.

use crate::offset::{ENCODER_RESOLUTION, wrap_offset};
use std::collections::BTreeMap;

/// Running min/max over the positions seen during a sweep.
///
/// Both bounds start at the first sample rather than at sentinel extremes, so
/// a sweep stopped before anything moved yields a zero-width range instead of
/// a spurious full-width one.
///
/// A recorder built with [`RangeRecorder::around`] follows travel across the
/// 0/4095 wrap: every sample is taken the short way round from the anchor, so
/// `4000 -> 4095 -> 0 -> 100` records `(4000, 100)` instead of `(0, 4095)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeRecorder {
    /// Unwrapped; leaves `0..=4095` only when anchored.
    bounds: Option<(i32, i32)>,
    anchor: Option<u16>,
    samples: u64,
}

impl RangeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap samples around `anchor`, usually the joint's natural middle.
    /// Travel up to half a turn either side of it is tracked.
    pub fn around(anchor: u16) -> Self {
        Self {
            anchor: Some(anchor),
            ..Self::default()
        }
    }

    fn unwrapped(&self, pos: u16) -> i32 {
        match self.anchor {
            Some(anchor) => anchor as i32 + wrap_offset(pos as i32 - anchor as i32) as i32,
            None => pos as i32,
        }
    }

    pub fn observe(&mut self, pos: u16) {
        let pos = self.unwrapped(pos);
        self.bounds = Some(match self.bounds {
            None => (pos, pos),
            Some((min, max)) => (min.min(pos), max.max(pos)),
        });
        self.samples += 1;
    }

    /// `(min, max)` seen so far as encoder readings, `None` before the first
    /// sample. For an anchored recorder `min > max` means the travel wraps.
    pub fn bounds(&self) -> Option<(u16, u16)> {
        let wrap = |p: i32| p.rem_euclid(ENCODER_RESOLUTION) as u16;
        self.bounds.map(|(min, max)| (wrap(min), wrap(max)))
    }

    /// Travel covered so far, in ticks.
    pub fn width(&self) -> u16 {
        self.bounds.map(|(min, max)| (max - min) as u16).unwrap_or(0)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl Extend<u16> for RangeRecorder {
    fn extend<I: IntoIterator<Item = u16>>(&mut self, iter: I) {
        for pos in iter {
            self.observe(pos);
        }
    }
}

impl FromIterator<u16> for RangeRecorder {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut recorder = Self::new();
        recorder.extend(iter);
        recorder
    }
}

/// One recorder per motor name, for sweeping every joint at once.
#[derive(Debug, Clone, Default)]
pub struct RangeRecorders {
    recorders: BTreeMap<String, RangeRecorder>,
}

impl RangeRecorders {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            recorders: names
                .into_iter()
                .map(|name| (name.to_string(), RangeRecorder::new()))
                .collect(),
        }
    }

    /// One [`RangeRecorder::around`] per `(name, anchor)`.
    pub fn anchored<'a>(anchors: impl IntoIterator<Item = (&'a str, u16)>) -> Self {
        Self {
            recorders: anchors
                .into_iter()
                .map(|(name, anchor)| (name.to_string(), RangeRecorder::around(anchor)))
                .collect(),
        }
    }

    /// Record a sample. Names that were not registered are ignored.
    pub fn observe(&mut self, name: &str, pos: u16) {
        if let Some(recorder) = self.recorders.get_mut(name) {
            recorder.observe(pos);
        }
    }

    pub fn get(&self, name: &str) -> Option<&RangeRecorder> {
        self.recorders.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_recorder_has_no_bounds() {
        let recorder = RangeRecorder::new();
        assert_eq!(recorder.bounds(), None);
        assert_eq!(recorder.width(), 0);
    }

    #[test]
    fn first_sample_initializes_both_bounds() {
        let mut recorder = RangeRecorder::new();
        recorder.observe(2048);
        assert_eq!(recorder.bounds(), Some((2048, 2048)));
        assert_eq!(recorder.width(), 0);
    }

    #[test]
    fn order_does_not_matter() {
        let orders: [[u16; 4]; 4] = [
            [10, 4000, 7, 4090],
            [4090, 7, 4000, 10],
            [7, 10, 4000, 4090],
            [4000, 4090, 10, 7],
        ];
        for samples in orders {
            let recorder: RangeRecorder = samples.into_iter().collect();
            assert_eq!(recorder.bounds(), Some((7, 4090)), "{samples:?}");
            assert_eq!(recorder.samples(), 4);
        }
    }

    #[test]
    fn anchored_recorder_follows_the_wrap() {
        let path = [4050, 4000, 4040, 4095, 0, 50, 100];
        let mut recorder = RangeRecorder::around(4050);
        recorder.extend(path);
        assert_eq!(recorder.bounds(), Some((4000, 100)));
        assert_eq!(recorder.width(), 196);

        let plain: RangeRecorder = path.into_iter().collect();
        assert_eq!(plain.bounds(), Some((0, 4095)));
    }

    #[test]
    fn anchored_recorder_matches_plain_away_from_the_wrap() {
        let path = [2010, 900, 3100, 2000];
        let mut anchored = RangeRecorder::around(2010);
        anchored.extend(path);
        let plain: RangeRecorder = path.into_iter().collect();
        assert_eq!(anchored.bounds(), plain.bounds());
        assert_eq!(anchored.width(), 2200);
    }

    #[test]
    fn batch_recorders_are_independent() {
        let mut recorders = RangeRecorders::new(["gripper", "elbow_flex"]);
        recorders.observe("gripper", 1500);
        recorders.observe("gripper", 2600);
        recorders.observe("elbow_flex", 900);
        recorders.observe("not_a_motor", 1);

        assert_eq!(recorders.get("gripper").and_then(|r| r.bounds()), Some((1500, 2600)));
        assert_eq!(recorders.get("elbow_flex").and_then(|r| r.bounds()), Some((900, 900)));
        assert!(recorders.get("not_a_motor").is_none());
    }
}
