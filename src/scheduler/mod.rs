// Job scheduling: cadences, the job table and the tick-loop supervisor
pub mod cadence;
pub mod job;
pub mod supervisor;

pub use cadence::{parse_time_of_day, Cadence, Eta, IntervalUnit};
pub use job::{FiredJob, Job, JobKind, JobSpec, JobTable, PURCHASE_TAG};
pub use supervisor::{JobRunner, ScheduleView, Scheduler, SchedulerOptions};
