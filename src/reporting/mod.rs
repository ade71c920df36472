// Periodic portfolio summaries
pub mod windower;

pub use windower::ReportWindower;
