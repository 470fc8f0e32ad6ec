use serde::Serialize;

/// Rank ladder used by the gamification screens. Thresholds are minimum
/// accumulated points and must stay strictly ascending; the last entry is
/// terminal (no further progress past it).
const LEVEL_THRESHOLDS: &[(i64, &str)] = &[
    (0, "ÇAYLAK"),
    (20, "ÇAYLAK"),
    (60, "ÇAYLAK"),
    (100, "ÇAYLAK"),
    (180, "ÇAYLAK"),
    (260, "KALFA"),
    (360, "KALFA"),
    (480, "KALFA"),
    (620, "USTA"),
    (800, "USTA"),
    (1000, "USTA"),
    (1250, "ÜSTAT"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelInfo {
    pub level: i64,
    pub title: String,
    pub points_for_next_level: Option<i64>,
    pub progress: i64,
}

/// Maps an accumulated point total to its level, title and progress toward
/// the next level. Total over all inputs; negative totals (not a defined
/// domain) are treated as 0.
pub fn level_info(points: i64) -> LevelInfo {
    let points = points.max(0);

    let mut idx = 0;
    for (i, (min, _)) in LEVEL_THRESHOLDS.iter().enumerate() {
        if points >= *min {
            idx = i;
        } else {
            break;
        }
    }

    let (cur_min, title) = LEVEL_THRESHOLDS[idx];
    let level = (idx + 1) as i64;

    if idx + 1 >= LEVEL_THRESHOLDS.len() {
        return LevelInfo {
            level,
            title: title.to_string(),
            points_for_next_level: None,
            progress: 100,
        };
    }

    let next_min = LEVEL_THRESHOLDS[idx + 1].0;
    let progress = (100 * (points - cur_min) / (next_min - cur_min)).clamp(0, 100);
    LevelInfo {
        level,
        title: title.to_string(),
        points_for_next_level: Some(next_min),
        progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_points_is_level_one_with_no_progress() {
        let info = level_info(0);
        assert_eq!(info.level, 1);
        assert_eq!(info.title, "ÇAYLAK");
        assert_eq!(info.points_for_next_level, Some(20));
        assert_eq!(info.progress, 0);
    }

    #[test]
    fn threshold_boundaries_advance_exactly_at_minimum() {
        assert_eq!(level_info(19).level, 1);
        assert_eq!(level_info(20).level, 2);
        let pre = level_info(259);
        assert_eq!(pre.level, 5);
        assert_eq!(pre.title, "ÇAYLAK");
        let post = level_info(260);
        assert_eq!(post.level, 6);
        assert_eq!(post.title, "KALFA");
    }

    #[test]
    fn terminal_band_has_no_next_level() {
        let at = level_info(1250);
        assert_eq!(at.points_for_next_level, None);
        assert_eq!(at.progress, 100);
        assert_eq!(at.title, "ÜSTAT");
        let beyond = level_info(99_999);
        assert_eq!(beyond.level, at.level);
        assert_eq!(beyond.progress, 100);
    }

    #[test]
    fn progress_stays_in_bounds_and_level_is_monotone() {
        let mut last_level = 0;
        for points in 0..2000 {
            let info = level_info(points);
            assert!((0..=100).contains(&info.progress), "points={}", points);
            assert!(info.level >= last_level, "points={}", points);
            last_level = info.level;
        }
    }

    #[test]
    fn negative_points_normalize_to_zero() {
        assert_eq!(level_info(-42), level_info(0));
    }

    #[test]
    fn progress_is_floored_fraction_between_thresholds() {
        // Level 2 spans 20..60; 30 points is 25% of the way.
        let info = level_info(30);
        assert_eq!(info.level, 2);
        assert_eq!(info.progress, 25);
        assert_eq!(info.points_for_next_level, Some(60));
    }
}
