//! Request priority for tiles that need content.
//!
//! Independent criteria are normalised against the range observed this
//! frame and packed into separate decimal digit groups of one number, so a
//! more significant criterion always dominates a less significant one.
//! Lower values are more urgent.

/// Digits per packed criterion.
const DIGITS_PER_CRITERION: i32 = 4;
/// Digit shift of the preferred-sorting group.
const PREFERRED_SORTING_SHIFT: i32 = 0;
/// Digit shift of the depth group.
const DEPTH_SHIFT: i32 = PREFERRED_SORTING_SHIFT + DIGITS_PER_CRITERION;

/// Values of each priority criterion for one tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriorityKey {
    /// Camera distance of the tile's priority holder.
    pub distance: f64,
    pub depth: f64,
    /// Root error minus the tile's (or parent's) error; small means coarse.
    pub reverse_screen_space_error: f64,
}

/// Minimum and maximum of every criterion over the tiles visited this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriorityBounds {
    pub minimum: PriorityKey,
    pub maximum: PriorityKey,
}

impl Default for PriorityBounds {
    fn default() -> Self {
        Self {
            minimum: PriorityKey {
                distance: f64::MAX,
                depth: f64::MAX,
                reverse_screen_space_error: f64::MAX,
            },
            maximum: PriorityKey {
                distance: -f64::MAX,
                depth: -f64::MAX,
                reverse_screen_space_error: -f64::MAX,
            },
        }
    }
}

impl PriorityBounds {
    /// Forget the previous frame's range.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Widen the range to include `key`.
    pub fn include(&mut self, key: &PriorityKey) {
        let (min, max) = (&mut self.minimum, &mut self.maximum);
        min.distance = min.distance.min(key.distance);
        max.distance = max.distance.max(key.distance);
        min.depth = min.depth.min(key.depth);
        max.depth = max.depth.max(key.depth);
        min.reverse_screen_space_error = min
            .reverse_screen_space_error
            .min(key.reverse_screen_space_error);
        max.reverse_screen_space_error = max
            .reverse_screen_space_error
            .max(key.reverse_screen_space_error);
    }
}

/// How the preferred-sorting digits are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreferredSorting {
    /// Nearest sibling group first; used for replacement refinement
    /// without skipping levels.
    Distance,
    /// Coarsest error first.
    ReverseScreenSpaceError,
}

/// Pack a tile's criteria into one priority value.
#[must_use]
pub fn compute_priority(
    key: &PriorityKey,
    bounds: &PriorityBounds,
    sorting: PreferredSorting,
    prefer_leaves: bool,
) -> f64 {
    let preferred = match sorting {
        PreferredSorting::Distance => {
            normalize_and_clamp(key.distance, bounds.minimum.distance, bounds.maximum.distance)
        }
        PreferredSorting::ReverseScreenSpaceError => normalize_and_clamp(
            key.reverse_screen_space_error,
            bounds.minimum.reverse_screen_space_error,
            bounds.maximum.reverse_screen_space_error,
        ),
    };

    let mut depth = normalize_and_clamp(key.depth, bounds.minimum.depth, bounds.maximum.depth);
    if prefer_leaves {
        depth = 1.0 - depth;
    }

    isolate_digits(depth, DIGITS_PER_CRITERION, DEPTH_SHIFT)
        + isolate_digits(preferred, DIGITS_PER_CRITERION, PREFERRED_SORTING_SHIFT)
}

/// Map `value` into `[0, 1)` relative to `[minimum, maximum]`.
fn normalize_and_clamp(value: f64, minimum: f64, maximum: f64) -> f64 {
    let range = (maximum - minimum).max(0.0);
    let normalized = if range == 0.0 || !range.is_finite() {
        0.0
    } else {
        ((value - minimum) / range).clamp(0.0, 1.0)
    };
    // Keep 1.0 from overflowing into the next digit group.
    (normalized - 1e-7).max(0.0)
}

fn isolate_digits(normalized: f64, digits: i32, shift: i32) -> f64 {
    let scaled = (normalized * 10f64.powi(digits)).trunc();
    scaled * 10f64.powi(shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> PriorityBounds {
        let mut bounds = PriorityBounds::default();
        bounds.include(&PriorityKey {
            distance: 0.0,
            depth: 0.0,
            reverse_screen_space_error: 0.0,
        });
        bounds.include(&PriorityKey {
            distance: 1000.0,
            depth: 10.0,
            reverse_screen_space_error: 500.0,
        });
        bounds
    }

    fn key(distance: f64, depth: f64) -> PriorityKey {
        PriorityKey {
            distance,
            depth,
            reverse_screen_space_error: 0.0,
        }
    }

    /// Nearer tiles at the same depth sort first.
    #[test]
    fn test_closer_tile_is_more_urgent() {
        let b = bounds();
        let near = compute_priority(&key(100.0, 2.0), &b, PreferredSorting::Distance, false);
        let far = compute_priority(&key(900.0, 2.0), &b, PreferredSorting::Distance, false);
        assert!(near < far, "near {near} should sort before far {far}");
    }

    /// Depth dominates distance: a shallow far tile beats a deep near one.
    #[test]
    fn test_depth_dominates_distance() {
        let b = bounds();
        let shallow_far = compute_priority(&key(999.0, 1.0), &b, PreferredSorting::Distance, false);
        let deep_near = compute_priority(&key(0.0, 9.0), &b, PreferredSorting::Distance, false);
        assert!(shallow_far < deep_near);
    }

    /// Preferring leaves inverts the depth ordering.
    #[test]
    fn test_prefer_leaves_inverts_depth() {
        let b = bounds();
        let shallow = compute_priority(&key(0.0, 1.0), &b, PreferredSorting::Distance, true);
        let deep = compute_priority(&key(0.0, 9.0), &b, PreferredSorting::Distance, true);
        assert!(deep < shallow);
    }

    /// A degenerate range normalises to zero instead of dividing by zero.
    #[test]
    fn test_degenerate_range() {
        assert_eq!(normalize_and_clamp(5.0, 5.0, 5.0), 0.0);
        assert_eq!(normalize_and_clamp(5.0, f64::MAX, -f64::MAX), 0.0);
    }

    /// The maximum value stays within its digit group.
    #[test]
    fn test_digits_do_not_overflow() {
        let b = bounds();
        let p = compute_priority(
            &PriorityKey {
                distance: 1000.0,
                depth: 0.0,
                reverse_screen_space_error: 0.0,
            },
            &b,
            PreferredSorting::Distance,
            false,
        );
        assert!(p < 10_000.0);
    }
}
