use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{GradeError, Result};

pub const PERIOD_COUNT: usize = 4;
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Half-up rounding to 2 decimals.
///
/// A scaled value within a few ulps of a `.5` tie counts as the tie, so
/// halves such as 1.005 round up even though their binary form sits just
/// below. Values genuinely below the tie round down.
pub fn round_half_up_2(x: f64) -> f64 {
    let scaled = 100.0 * x;
    let floor = scaled.floor();
    let tolerance = scaled.abs().max(1.0) * f64::EPSILON * 4.0;
    let rounded = if (scaled - floor - 0.5).abs() <= tolerance {
        floor + 1.0
    } else {
        scaled.round()
    };
    rounded / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Period,
    Recovery,
}

/// One of `p1..p4` or `rp1..rp4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slot {
    kind: SlotKind,
    period: usize,
}

impl Slot {
    pub fn new(kind: SlotKind, period: usize) -> Option<Self> {
        if (1..=PERIOD_COUNT).contains(&period) {
            Some(Self { kind, period })
        } else {
            None
        }
    }

    pub fn period(period: usize) -> Option<Self> {
        Self::new(SlotKind::Period, period)
    }

    pub fn recovery(period: usize) -> Option<Self> {
        Self::new(SlotKind::Recovery, period)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (kind, digits) = if let Some(rest) = s.strip_prefix("rp") {
            (SlotKind::Recovery, rest)
        } else if let Some(rest) = s.strip_prefix('p') {
            (SlotKind::Period, rest)
        } else {
            return None;
        };
        let n: usize = digits.parse().ok()?;
        Self::new(kind, n)
    }

    /// Every slot, periods first: `p1..p4`, then `rp1..rp4`.
    pub fn all() -> impl Iterator<Item = Slot> {
        [SlotKind::Period, SlotKind::Recovery]
            .into_iter()
            .flat_map(|kind| (1..=PERIOD_COUNT).map(move |period| Slot { kind, period }))
    }

    fn index(self) -> usize {
        self.period - 1
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SlotKind::Period => write!(f, "p{}", self.period),
            SlotKind::Recovery => write!(f, "rp{}", self.period),
        }
    }
}

impl TryFrom<String> for Slot {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Slot::parse(&s).ok_or_else(|| format!("unknown slot: {}", s))
    }
}

impl From<Slot> for String {
    fn from(slot: Slot) -> Self {
        slot.to_string()
    }
}

pub fn validate_score(value: f64) -> Result<f64> {
    if !value.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(&value) {
        return Err(GradeError::validation_with(
            format!("scores must be between {} and {}", SCORE_MIN, SCORE_MAX),
            json!({ "value": if value.is_finite() { json!(value) } else { json!(value.to_string()) } }),
        ));
    }
    Ok(value)
}

/// Raw period and recovery scores of one student in one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodScoreSet {
    periods: [Option<f64>; PERIOD_COUNT],
    recoveries: [Option<f64>; PERIOD_COUNT],
}

impl PeriodScoreSet {
    pub fn from_periods(periods: [Option<f64>; PERIOD_COUNT]) -> Result<Self> {
        let mut set = Self::default();
        for (i, v) in periods.into_iter().enumerate() {
            if let Some(slot) = Slot::period(i + 1) {
                set.set(slot, v)?;
            }
        }
        Ok(set)
    }

    pub fn get(&self, slot: Slot) -> Option<f64> {
        match slot.kind {
            SlotKind::Period => self.periods[slot.index()],
            SlotKind::Recovery => self.recoveries[slot.index()],
        }
    }

    /// Sets or clears a slot. Out-of-range values leave the set untouched.
    pub fn set(&mut self, slot: Slot, value: Option<f64>) -> Result<()> {
        let value = value.map(validate_score).transpose()?;
        match slot.kind {
            SlotKind::Period => self.periods[slot.index()] = value,
            SlotKind::Recovery => self.recoveries[slot.index()] = value,
        }
        Ok(())
    }

    pub fn effective(&self, period: usize) -> Option<f64> {
        let i = period.checked_sub(1)?;
        if i >= PERIOD_COUNT {
            return None;
        }
        effective_score(self.periods[i], self.recoveries[i])
    }
}

/// A recovery replaces the period score only when it is higher; a lone recovery counts on its own.
pub fn effective_score(period: Option<f64>, recovery: Option<f64>) -> Option<f64> {
    match (period, recovery) {
        (Some(p), Some(r)) => Some(p.max(r)),
        (Some(p), None) => Some(p),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAverage {
    pub average: f64,
    pub graded_slots: usize,
}

pub fn block_average(scores: &PeriodScoreSet) -> BlockAverage {
    let mut sum = 0.0_f64;
    let mut graded_slots = 0_usize;
    for period in 1..=PERIOD_COUNT {
        if let Some(v) = scores.effective(period) {
            sum += v;
            graded_slots += 1;
        }
    }

    let average = if graded_slots > 0 {
        round_half_up_2(sum / (graded_slots as f64))
    } else {
        0.0
    };
    BlockAverage {
        average,
        graded_slots,
    }
}

/// Mean of the non-zero block averages; blocks still at 0 are treated as ungraded.
pub fn final_grade<I>(block_averages: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for avg in block_averages {
        if avg > 0.0 {
            sum += avg;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        round_half_up_2(sum / (count as f64))
    }
}

fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStats {
    pub average: f64,
    pub median: f64,
    pub graded_count: usize,
    pub ungraded_count: usize,
}

/// Class-level average and median over a column of averages, ignoring zeros.
pub fn distribution<I>(values: I) -> DistributionStats
where
    I: IntoIterator<Item = f64>,
{
    let mut graded: Vec<f64> = Vec::new();
    let mut ungraded_count = 0_usize;
    for v in values {
        if v > 0.0 {
            graded.push(v);
        } else {
            ungraded_count += 1;
        }
    }

    let average = if graded.is_empty() {
        0.0
    } else {
        round_half_up_2(graded.iter().sum::<f64>() / (graded.len() as f64))
    };
    DistributionStats {
        average,
        median: round_half_up_2(compute_median(&graded)),
        graded_count: graded.len(),
        ungraded_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn periods(p: [f64; 4]) -> PeriodScoreSet {
        PeriodScoreSet::from_periods(p.map(Some)).expect("valid scores")
    }

    #[test]
    fn round_half_up_matches_reference_values() {
        assert_eq!(round_half_up_2(0.0), 0.0);
        assert_eq!(round_half_up_2(85.75), 85.75);
        assert_eq!(round_half_up_2(87.1875), 87.19);
        assert_eq!(round_half_up_2(87.184), 87.18);
        assert_eq!(round_half_up_2(2.0 / 3.0), 0.67);
    }

    #[test]
    fn round_half_up_only_lifts_true_ties() {
        // 1.005 is stored just below the tie; it still rounds up.
        assert_eq!(round_half_up_2(1.005), 1.01);
        assert_eq!(round_half_up_2(0.125), 0.13);
        // Just below a tie by far more than representation error.
        assert_eq!(round_half_up_2(0.004999999995), 0.0);
        assert_eq!(round_half_up_2(87.18499999), 87.18);
        assert_eq!(round_half_up_2(100.0), 100.0);
    }

    #[test]
    fn effective_score_law() {
        assert_eq!(effective_score(None, None), None);
        assert_eq!(effective_score(Some(70.0), None), Some(70.0));
        assert_eq!(effective_score(None, Some(65.0)), Some(65.0));
        assert_eq!(effective_score(Some(70.0), Some(90.0)), Some(90.0));
        assert_eq!(effective_score(Some(70.0), Some(50.0)), Some(70.0));
        assert_eq!(effective_score(Some(70.0), Some(70.0)), Some(70.0));
    }

    #[test]
    fn reference_scenario_block_and_final() {
        let blocks = [
            periods([85.0, 78.0, 92.0, 88.0]),
            periods([80.0, 85.0, 88.0, 90.0]),
            periods([90.0, 87.0, 85.0, 92.0]),
            periods([88.0, 90.0, 92.0, 85.0]),
        ];
        let avgs: Vec<f64> = blocks.iter().map(|b| block_average(b).average).collect();
        assert_eq!(avgs, vec![85.75, 85.75, 88.5, 88.75]);
        assert_eq!(final_grade(avgs), 87.19);
    }

    #[test]
    fn absent_slots_are_excluded_from_block_mean() {
        let mut set = PeriodScoreSet::default();
        assert_eq!(block_average(&set).average, 0.0);
        assert_eq!(block_average(&set).graded_slots, 0);

        set.set(Slot::period(1).expect("p1"), Some(80.0)).expect("set");
        set.set(Slot::period(3).expect("p3"), Some(91.0)).expect("set");
        let avg = block_average(&set);
        assert_eq!(avg.graded_slots, 2);
        assert_eq!(avg.average, 85.5);
    }

    #[test]
    fn recovery_only_slot_counts() {
        let mut set = PeriodScoreSet::default();
        set.set(Slot::period(1).expect("p1"), Some(60.0)).expect("set");
        set.set(Slot::recovery(2).expect("rp2"), Some(80.0)).expect("set");
        assert_eq!(block_average(&set).average, 70.0);
    }

    #[test]
    fn lower_recovery_never_changes_average() {
        let mut set = periods([85.0, 78.0, 92.0, 88.0]);
        let before = block_average(&set);
        set.set(Slot::recovery(2).expect("rp2"), Some(40.0)).expect("set");
        assert_eq!(block_average(&set), before);

        set.set(Slot::recovery(2).expect("rp2"), Some(98.0)).expect("set");
        assert_eq!(block_average(&set).average, 90.75);
    }

    #[test]
    fn out_of_range_scores_rejected_without_mutation() {
        let mut set = periods([85.0, 78.0, 92.0, 88.0]);
        let before = set;
        let p1 = Slot::period(1).expect("p1");
        assert!(set.set(p1, Some(100.5)).is_err());
        assert!(set.set(p1, Some(-0.01)).is_err());
        assert!(set.set(p1, Some(f64::NAN)).is_err());
        assert_eq!(set, before);

        set.set(p1, Some(100.0)).expect("upper bound inclusive");
        set.set(p1, Some(0.0)).expect("lower bound inclusive");
    }

    #[test]
    fn final_grade_excludes_ungraded_blocks() {
        assert_eq!(final_grade([0.0, 0.0, 0.0, 0.0]), 0.0);
        assert_eq!(final_grade([85.75, 0.0, 88.5, 0.0]), 87.13);
        assert_eq!(final_grade(Vec::<f64>::new()), 0.0);
    }

    #[test]
    fn compounded_rounding_is_kept() {
        // 3 slots: 70+71+71 = 70.666.. -> 70.67; final from rounded blocks, not raw.
        let a = PeriodScoreSet::from_periods([Some(70.0), Some(71.0), Some(71.0), None])
            .expect("valid");
        let b = PeriodScoreSet::from_periods([Some(80.0), Some(80.0), Some(81.0), None])
            .expect("valid");
        let avgs = [block_average(&a).average, block_average(&b).average];
        assert_eq!(avgs, [70.67, 80.33]);
        assert_eq!(final_grade(avgs), 75.5);
    }

    #[test]
    fn slot_parse_and_display() {
        assert_eq!(Slot::parse("P2"), Slot::period(2));
        assert_eq!(Slot::parse("rp4"), Slot::recovery(4));
        assert_eq!(Slot::parse("p0"), None);
        assert_eq!(Slot::parse("p5"), None);
        assert_eq!(Slot::parse("x1"), None);
        assert_eq!(Slot::recovery(3).map(|s| s.to_string()), Some("rp3".to_string()));
        let names: Vec<String> = Slot::all().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["p1", "p2", "p3", "p4", "rp1", "rp2", "rp3", "rp4"]);
    }

    #[test]
    fn distribution_ignores_zero_averages() {
        let stats = distribution([85.0, 0.0, 90.0, 70.0]);
        assert_eq!(stats.graded_count, 3);
        assert_eq!(stats.ungraded_count, 1);
        assert_eq!(stats.average, 81.67);
        assert_eq!(stats.median, 85.0);

        let empty = distribution(Vec::<f64>::new());
        assert_eq!(empty.average, 0.0);
        assert_eq!(empty.median, 0.0);
    }
}
