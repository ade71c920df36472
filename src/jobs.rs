use crate::context::AppContext;
use crate::execution::{CycleOutcome, ExecutionEngine};
use crate::reporting::ReportWindower;
use crate::scheduler::{FiredJob, JobKind, JobRunner, ScheduleView};
use crate::Result;
use async_trait::async_trait;

/// Routes fired jobs to the purchase engine or the summary windower
pub struct DcaJobs {
    engine: ExecutionEngine,
    windower: ReportWindower,
}

impl DcaJobs {
    pub fn new(ctx: AppContext, view: ScheduleView) -> Self {
        Self {
            engine: ExecutionEngine::new(ctx.clone(), view.clone()),
            windower: ReportWindower::new(ctx, view),
        }
    }
}

#[async_trait]
impl JobRunner for DcaJobs {
    async fn run(&self, job: FiredJob) -> Result<()> {
        match job.kind {
            JobKind::Purchase => {
                let report = self.engine.execute(&job).await;
                match report.outcome {
                    CycleOutcome::Purchased(_) => {
                        tracing::info!("Cycle {} done: {}", job.slot, report.reason)
                    }
                    _ => tracing::info!("Cycle {} ended early: {}", job.slot, report.reason),
                }
                Ok(())
            }
            JobKind::Report => {
                self.windower.run(&job).await?;
                Ok(())
            }
        }
    }
}
