mod lifecycles;
mod plan;
mod run;

pub use lifecycles::cmd_lifecycles;
pub use plan::cmd_plan;
pub use run::cmd_run;
