pub mod artifacts;
pub mod cleanup;
pub mod filesystem;

pub use artifacts::{ArtifactStore, JobArtifacts};
pub use cleanup::{spawn_sweeper, sweep};
pub use filesystem::{Document, UploadStorage};
