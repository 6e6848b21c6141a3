pub mod command;
pub mod executor;
pub mod sweep;

pub use command::{CommandBuilder, EnvInjection, InvocationDescriptor, Launcher};
pub use executor::{
    ProcessExit, ProcessRunner, SweepExecutor, SweepReport, SystemRunner, UnitOutcome, UnitStatus,
};
pub use sweep::{run_suite, run_suite_with, RunnerOptions, SuiteReport, TestOutcome, TestReport};
