//! Clients for the external systems Conductor drives.

pub mod buildbucket;
pub mod github;

pub use buildbucket::BuildbucketClient;
pub use github::GitHubClient;
