//! Intraday job schedule.

use crate::config::SessionConfig;
use chrono::NaiveTime;

/// Jobs of one trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Entry,
    Fallback,
    Monitor,
    Eod,
}

/// Decides which jobs are due at a given local time.
///
/// Entry, fallback and EOD fire once each. Monitor fires on every tick
/// inside the trading window until EOD has run.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    entry_time: NaiveTime,
    fallback_time: NaiveTime,
    eod_time: NaiveTime,
    trading_start: NaiveTime,
    trading_end: NaiveTime,
    entry_done: bool,
    fallback_done: bool,
    eod_done: bool,
}

impl JobSchedule {
    pub fn new(session: &SessionConfig) -> Self {
        Self {
            entry_time: session.entry_time,
            fallback_time: session.fallback_time,
            eod_time: session.eod_exit_time,
            trading_start: session.trading_start,
            trading_end: session.trading_end,
            entry_done: false,
            fallback_done: false,
            eod_done: false,
        }
    }

    /// Jobs due at `time`, in execution order.
    pub fn due(&mut self, time: NaiveTime) -> Vec<Job> {
        if self.eod_done {
            return Vec::new();
        }
        if time >= self.eod_time {
            self.eod_done = true;
            return vec![Job::Eod];
        }

        let mut jobs = Vec::new();
        if !self.entry_done && time >= self.entry_time {
            self.entry_done = true;
            jobs.push(Job::Entry);
        }
        if !self.fallback_done && time >= self.fallback_time {
            self.fallback_done = true;
            jobs.push(Job::Fallback);
        }
        if time >= self.trading_start && time <= self.trading_end {
            jobs.push(Job::Monitor);
        }
        jobs
    }

    pub fn is_finished(&self) -> bool {
        self.eod_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_day_sequence() {
        let mut schedule = JobSchedule::new(&SessionConfig::default());

        assert!(schedule.due(t(9, 20)).is_empty());
        assert_eq!(schedule.due(t(9, 31)), vec![Job::Entry, Job::Monitor]);
        assert_eq!(schedule.due(t(9, 45)), vec![Job::Monitor]);
        assert_eq!(schedule.due(t(10, 0)), vec![Job::Fallback, Job::Monitor]);
        assert_eq!(schedule.due(t(15, 13)), vec![Job::Monitor]);
        assert_eq!(schedule.due(t(15, 14)), vec![Job::Eod]);
        assert!(schedule.is_finished());
        assert!(schedule.due(t(15, 15)).is_empty());
    }

    #[test]
    fn test_late_start_catches_up() {
        let mut schedule = JobSchedule::new(&SessionConfig::default());
        assert_eq!(
            schedule.due(t(11, 0)),
            vec![Job::Entry, Job::Fallback, Job::Monitor]
        );

        let mut after_close = JobSchedule::new(&SessionConfig::default());
        assert_eq!(after_close.due(t(16, 0)), vec![Job::Eod]);
    }
}
