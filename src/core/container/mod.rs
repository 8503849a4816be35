mod docker;
mod runner;
#[cfg(test)]
pub mod scripted;

pub use docker::DockerRunner;
pub use runner::{CommandRunner, RunRequest};
