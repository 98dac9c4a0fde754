//! Issue prioritization and the reviewer desk

pub mod desk;
pub mod issue;
pub mod prioritizer;

pub use desk::{AnomalyReview, IssueDesk, SubjectOverview};
pub use issue::{IssueStatus, PrioritizedIssue, ReviewAction};
pub use prioritizer::{priority_score, Prioritizer};
