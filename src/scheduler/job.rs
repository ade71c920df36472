use super::cadence::{Cadence, Eta};
use crate::error::DcaError;
use crate::Result;
use chrono::{DateTime, Utc};

/// Tag of the single purchase job
pub const PURCHASE_TAG: &str = "purchase";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Purchase,
    Report,
}

/// Static description of a job, built from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub tag: String,
    pub kind: JobKind,
    pub cadence: Cadence,
}

impl JobSpec {
    pub fn purchase(cadence: Cadence) -> Self {
        Self {
            tag: PURCHASE_TAG.to_string(),
            kind: JobKind::Purchase,
            cadence,
        }
    }

    /// Daily summary report at HH:MM UTC, tagged `report@HH:MM`
    pub fn report(hour: u32, minute: u32) -> Result<Self> {
        Ok(Self {
            tag: format!("report@{:02}:{:02}", hour, minute),
            kind: JobKind::Report,
            cadence: Cadence::daily_at(hour, minute)?,
        })
    }
}

/// A registered job and its scheduling state
#[derive(Debug, Clone)]
pub struct Job {
    pub spec: JobSpec,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Job {
    pub fn tag(&self) -> &str {
        &self.spec.tag
    }
}

/// One dispatch of a job for a logical slot
#[derive(Debug, Clone, PartialEq)]
pub struct FiredJob {
    pub tag: String,
    pub kind: JobKind,
    pub cadence: Cadence,
    /// Logical slot this dispatch stands for
    pub slot: DateTime<Utc>,
    /// When the scheduler noticed the slot was due
    pub fired_at: DateTime<Utc>,
}

/// Typed registry of scheduled jobs, owned by the scheduler
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job. Tags must be unique.
    pub fn register(&mut self, spec: JobSpec) -> Result<()> {
        if self.get(&spec.tag).is_some() {
            return Err(DcaError::Config(format!("duplicate job tag '{}'", spec.tag)));
        }

        tracing::debug!("Registered job {} ({})", spec.tag, spec.cadence);
        self.jobs.push(Job {
            spec,
            next_fire_at: None,
            active: false,
        });
        Ok(())
    }

    /// Activate every job and compute its first fire time
    pub fn arm(&mut self, now: DateTime<Utc>) {
        for job in &mut self.jobs {
            let next = job.spec.cadence.next_after(now);
            job.next_fire_at = Some(next);
            job.active = true;
            tracing::info!("⏰ Job {} ({}) first fires at {}", job.spec.tag, job.spec.cadence, next);
        }
    }

    /// Drop all jobs
    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    /// Collect every job whose slot has arrived and move its next fire time
    /// strictly past `now` before returning.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<FiredJob> {
        let mut fired = Vec::new();

        for job in self.jobs.iter_mut().filter(|j| j.active) {
            let slot = match job.next_fire_at {
                Some(t) if t <= now => t,
                _ => continue,
            };

            let next = job.spec.cadence.next_after(now);
            let skipped = ((now - slot).num_seconds() / job.spec.cadence.period().num_seconds()).max(0);
            if skipped > 0 {
                tracing::warn!(
                    "Job {} was {} slot(s) late; firing once for {} and resuming at {}",
                    job.spec.tag,
                    skipped,
                    slot,
                    next
                );
            }
            job.next_fire_at = Some(next);

            fired.push(FiredJob {
                tag: job.spec.tag.clone(),
                kind: job.spec.kind,
                cadence: job.spec.cadence,
                slot,
                fired_at: now,
            });
        }

        fired
    }

    /// Fire a job outside its schedule (startup "run immediately").
    /// The regular next fire time is left untouched.
    pub fn fire_now(&self, tag: &str, now: DateTime<Utc>) -> Option<FiredJob> {
        self.get(tag).map(|job| FiredJob {
            tag: job.spec.tag.clone(),
            kind: job.spec.kind,
            cadence: job.spec.cadence,
            slot: now,
            fired_at: now,
        })
    }

    pub fn get(&self, tag: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.spec.tag == tag)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Time until `tag` next fires.
    ///
    /// Unknown tags and jobs without a next fire time get the cadence's
    /// full-period estimate (a daily period for unknown tags).
    pub fn time_until_next(&self, tag: &str, now: DateTime<Utc>) -> Eta {
        let job = match self.get(tag) {
            Some(job) => job,
            None => {
                tracing::debug!("time_until_next: no job tagged {}", tag);
                return Eta::new(23, 59);
            }
        };

        let next = match job.next_fire_at {
            Some(next) if job.active => next,
            _ => return job.spec.cadence.fallback_eta(),
        };

        match Eta::from_duration(next - now) {
            Some(eta) => eta,
            None => {
                tracing::warn!(
                    "Job {} has next fire time {} in the past (now {}); reporting full period",
                    tag,
                    next,
                    now
                );
                job.spec.cadence.fallback_eta()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn table_with(specs: Vec<JobSpec>) -> JobTable {
        let mut table = JobTable::new();
        for spec in specs {
            table.register(spec).unwrap();
        }
        table
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let mut table = JobTable::new();
        table.register(JobSpec::purchase(Cadence::hourly())).unwrap();
        let err = table
            .register(JobSpec::purchase(Cadence::every_minute()))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_report_tag_format() {
        let spec = JobSpec::report(8, 5).unwrap();
        assert_eq!(spec.tag, "report@08:05");
        assert_eq!(spec.kind, JobKind::Report);
        assert!(JobSpec::report(24, 0).is_err());
    }

    #[test]
    fn test_nothing_due_before_arm() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::every_minute())]);
        assert!(table.take_due(at(12, 0, 0)).is_empty());
    }

    #[test]
    fn test_take_due_fires_once_per_slot() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::daily_at(9, 0).unwrap())]);
        table.arm(at(8, 0, 0));

        assert!(table.take_due(at(8, 59, 59)).is_empty());

        let fired = table.take_due(at(9, 0, 0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].slot, at(9, 0, 0));
        assert_eq!(fired[0].kind, JobKind::Purchase);

        // Same slot never becomes due again
        assert!(table.take_due(at(9, 0, 1)).is_empty());
        assert!(table.take_due(at(23, 0, 0)).is_empty());

        let next = table.get(PURCHASE_TAG).unwrap().next_fire_at.unwrap();
        assert_eq!(next, at(9, 0, 0) + Duration::days(1));
    }

    #[test]
    fn test_late_tick_fires_once_and_skips_ahead() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::every_minute())]);
        table.arm(at(10, 0, 30));

        // Loop stalled for several minutes
        let fired = table.take_due(at(10, 5, 10));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].slot, at(10, 1, 0));
        assert_eq!(
            table.get(PURCHASE_TAG).unwrap().next_fire_at,
            Some(at(10, 6, 0))
        );
    }

    #[test]
    fn test_multiple_jobs_due_together() {
        let mut table = table_with(vec![
            JobSpec::purchase(Cadence::daily_at(9, 0).unwrap()),
            JobSpec::report(9, 0).unwrap(),
            JobSpec::report(21, 0).unwrap(),
        ]);
        table.arm(at(8, 0, 0));

        let fired = table.take_due(at(9, 0, 0));
        let tags: Vec<_> = fired.iter().map(|f| f.tag.as_str()).collect();
        assert_eq!(tags, vec!["purchase", "report@09:00"]);
    }

    #[test]
    fn test_time_until_next() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::daily_at(9, 0).unwrap())]);
        table.arm(at(6, 30, 0));

        assert_eq!(table.time_until_next(PURCHASE_TAG, at(6, 30, 0)), Eta::new(2, 30));
        // 29m30s left rounds up to 30m
        assert_eq!(table.time_until_next(PURCHASE_TAG, at(8, 30, 30)), Eta::new(0, 30));
    }

    #[test]
    fn test_time_until_next_fallbacks() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::hourly())]);

        // Registered but not armed
        assert_eq!(table.time_until_next(PURCHASE_TAG, at(10, 0, 0)), Eta::new(0, 59));
        // Unknown tag
        assert_eq!(table.time_until_next("nope", at(10, 0, 0)), Eta::new(23, 59));

        // Next fire time already behind the clock
        table.arm(at(10, 0, 0));
        assert_eq!(table.time_until_next(PURCHASE_TAG, at(11, 30, 0)), Eta::new(0, 59));
    }

    #[test]
    fn test_fire_now_keeps_schedule() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::hourly())]);
        table.arm(at(10, 15, 0));

        let fired = table.fire_now(PURCHASE_TAG, at(10, 15, 0)).unwrap();
        assert_eq!(fired.slot, at(10, 15, 0));
        assert_eq!(
            table.get(PURCHASE_TAG).unwrap().next_fire_at,
            Some(at(11, 0, 0))
        );
        assert!(table.fire_now("missing", at(10, 15, 0)).is_none());
    }

    #[test]
    fn test_clear_removes_jobs() {
        let mut table = table_with(vec![JobSpec::purchase(Cadence::hourly())]);
        table.arm(at(10, 0, 0));
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.time_until_next(PURCHASE_TAG, at(10, 0, 0)), Eta::new(23, 59));
    }
}
