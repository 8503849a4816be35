mod archive;
mod host;
mod manifest;
mod phases;
mod pipeline;
mod target;
pub mod version;

pub use host::HostPolicy;
pub use manifest::{backup_run_id, duration_ms, rfc3339, ManifestStatus, RunManifest};
pub use pipeline::DumpPipeline;
pub use target::{resolve_targets, DatabaseTarget, RejectedTarget};
pub use version::{DatabaseProbe, PgProbe};
