//! Human-like daily send schedules.
//!
//! Business day 09:00–18:00 in the account's timezone, split into activity
//! windows:
//!
//! ```text
//! peak   60%  09:00–11:00, 14:00–16:00
//! normal 30%  11:00–12:00, 16:00–18:00
//! low    10%  12:00–14:00  (takes the rounding remainder)
//! ```
//!
//! Every slot gets a random minute and second inside a randomly picked
//! range of its window, then independent jitter, then the set is sorted and
//! spaced at least `min_gap_secs` apart.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use inboxwarm_core::config::TimingConfig;
use inboxwarm_core::types::ActivityPeriod;
use rand::Rng;

const PEAK_RANGES: &[(u32, u32)] = &[(9, 11), (14, 16)];
const NORMAL_RANGES: &[(u32, u32)] = &[(11, 12), (16, 18)];
const LOW_RANGES: &[(u32, u32)] = &[(12, 14)];

/// A generated send instant and the window it was drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedSlot {
    pub at: DateTime<Utc>,
    pub period: ActivityPeriod,
}

/// Split a quota into peak / normal / low counts.
pub fn split_quota(quota: u32) -> (u32, u32, u32) {
    let peak = (quota as f64 * 0.6).floor() as u32;
    let normal = (quota as f64 * 0.3).floor() as u32;
    (peak, normal, quota - peak - normal)
}

/// Schedule generator bound to one timezone.
#[derive(Debug, Clone)]
pub struct HumanTiming {
    tz: Tz,
    config: TimingConfig,
}

impl HumanTiming {
    pub fn new(tz: Tz, config: TimingConfig) -> Self {
        Self { tz, config }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn is_weekend(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !(self.config.skip_weekends && self.is_weekend(date))
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    /// Inside business hours on a business day, in local time.
    pub fn is_business_hours(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz);
        self.is_business_day(local.date_naive())
            && local.hour() >= self.config.business_start_hour
            && local.hour() < self.config.business_end_hour
    }

    /// Activity window a local instant falls in, if any.
    pub fn activity_period(&self, at: DateTime<Utc>) -> Option<ActivityPeriod> {
        let hour = at.with_timezone(&self.tz).hour();
        let inside = |ranges: &[(u32, u32)]| ranges.iter().any(|&(s, e)| hour >= s && hour < e);
        if inside(PEAK_RANGES) {
            Some(ActivityPeriod::Peak)
        } else if inside(NORMAL_RANGES) {
            Some(ActivityPeriod::Normal)
        } else if inside(LOW_RANGES) {
            Some(ActivityPeriod::Low)
        } else {
            None
        }
    }

    /// Start and end of the business day in UTC.
    pub fn business_window(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.localize(date, self.config.business_start_hour * 3600)?;
        let end = self.localize(date, self.config.business_end_hour * 3600)?;
        Some((start, end))
    }

    pub fn next_business_day(&self, date: NaiveDate) -> NaiveDate {
        let mut next = date + Duration::days(1);
        while !self.is_business_day(next) {
            next += Duration::days(1);
        }
        next
    }

    /// Generate `quota` send instants for `date`; empty on non-business days.
    pub fn generate_daily_schedule<R: Rng + ?Sized>(
        &self,
        quota: u32,
        date: NaiveDate,
        rng: &mut R,
    ) -> Vec<PlannedSlot> {
        if quota == 0 || !self.is_business_day(date) {
            return Vec::new();
        }

        let (peak, normal, low) = split_quota(quota);
        let mut drawn: Vec<(i64, ActivityPeriod)> = Vec::with_capacity(quota as usize);
        for (count, ranges, period) in [
            (peak, PEAK_RANGES, ActivityPeriod::Peak),
            (normal, NORMAL_RANGES, ActivityPeriod::Normal),
            (low, LOW_RANGES, ActivityPeriod::Low),
        ] {
            for _ in 0..count {
                drawn.push((self.draw_second(ranges, rng), period));
            }
        }

        let (lower, upper) = self.bounds();
        let jm = self.config.jitter_minutes.abs();
        let js = self.config.jitter_seconds.abs();
        for (secs, _) in drawn.iter_mut() {
            let jitter = rng.gen_range(-jm..=jm) * 60 + rng.gen_range(-js..=js);
            *secs = (*secs + jitter).clamp(lower, upper);
        }
        drawn.sort_by_key(|(secs, _)| *secs);
        space_out(&mut drawn, self.config.min_gap_secs, lower, upper + 59);

        drawn
            .into_iter()
            .filter_map(|(secs, period)| {
                self.localize(date, secs as u32)
                    .map(|at| PlannedSlot { at, period })
            })
            .collect()
    }

    /// Seconds-of-day bounds a generated slot may land on.
    fn bounds(&self) -> (i64, i64) {
        let lower = self.config.business_start_hour as i64 * 3600;
        let upper = self.config.business_end_hour as i64 * 3600 - 60;
        (lower, upper)
    }

    fn draw_second<R: Rng + ?Sized>(&self, ranges: &[(u32, u32)], rng: &mut R) -> i64 {
        let (start, end) = ranges[rng.gen_range(0..ranges.len())];
        let minute = rng.gen_range(start as i64 * 60..end as i64 * 60);
        minute * 60 + rng.gen_range(0..60)
    }

    /// Local wall-clock seconds on `date` as a UTC instant. A time inside a DST
    /// gap resolves to the same wall time one hour later.
    fn localize(&self, date: NaiveDate, secs: u32) -> Option<DateTime<Utc>> {
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs.min(86_399), 0)?;
        let naive = date.and_time(time);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Push sorted instants forward so neighbors are `gap` apart, then pull back
/// from `max` if the tail overflowed. Best effort when the window is too small.
pub(crate) fn space_out<T>(items: &mut [(i64, T)], gap: i64, min: i64, max: i64) {
    if gap <= 0 || items.is_empty() {
        return;
    }
    for i in 1..items.len() {
        let floor = items[i - 1].0 + gap;
        if items[i].0 < floor {
            items[i].0 = floor;
        }
    }
    let last = items.len() - 1;
    if items[last].0 > max {
        items[last].0 = max;
        for i in (0..last).rev() {
            let ceiling = items[i + 1].0 - gap;
            if items[i].0 > ceiling {
                items[i].0 = ceiling.max(min);
            }
        }
    }
}

/// Summary of a generated day, for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleStats {
    pub total: usize,
    pub peak: usize,
    pub normal: usize,
    pub low: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub min_gap_secs: Option<i64>,
    pub avg_gap_secs: Option<f64>,
    pub max_gap_secs: Option<i64>,
}

pub fn schedule_stats(slots: &[PlannedSlot]) -> ScheduleStats {
    let count = |p: ActivityPeriod| slots.iter().filter(|s| s.period == p).count();
    let gaps: Vec<i64> = slots
        .windows(2)
        .map(|w| (w[1].at - w[0].at).num_seconds())
        .collect();
    ScheduleStats {
        total: slots.len(),
        peak: count(ActivityPeriod::Peak),
        normal: count(ActivityPeriod::Normal),
        low: count(ActivityPeriod::Low),
        first: slots.first().map(|s| s.at),
        last: slots.last().map(|s| s.at),
        min_gap_secs: gaps.iter().min().copied(),
        avg_gap_secs: (!gaps.is_empty()).then(|| gaps.iter().sum::<i64>() as f64 / gaps.len() as f64),
        max_gap_secs: gaps.iter().max().copied(),
    }
}
