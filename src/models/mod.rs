pub mod job;
pub mod listing;
pub mod loaders;
pub mod profile;
pub mod submission;

pub use job::ManifestJob;
pub use listing::{ListingEntry, ListingRow};
pub use loaders::{load_all_jobs, load_job};
pub use profile::{ListingLayout, PortalProfile, Selector};
pub use submission::{ServiceLevel, SubmissionRequest};
