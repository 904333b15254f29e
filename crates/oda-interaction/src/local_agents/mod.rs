mod runner;

pub use runner::{LocalRunnerProvider, LocalRunnerResource, build_prompt};
