//! Pipeline orchestration: routing files to remote jobs, supervising the
//! background runs and reading their results back.

mod error;
mod metrics;
mod results;
mod router;
mod stub;
mod supervisor;

pub use error::{RouterError, RouterResult};
pub use metrics::PipelineMetrics;
pub use results::{read_result, JobOutcome};
pub use router::{PipelineMode, PipelineResult, PipelineRouter, PipelineStage, RouterSettings};
pub use stub::synthetic_rooms;
pub use supervisor::{PipelineSupervisor, DEFAULT_MAX_CONCURRENT_JOBS};
