//! Security policy and daily quotas for AI tasks.

use std::collections::HashSet;

use glob::{MatchOptions, Pattern};
use rusqlite::Connection;

use crate::errors::Error;
use crate::storage::queue::TaskRecord;
use crate::storage::quota::admit_quota;

/// Environment variable read by [`EnvApprovalGate`].
pub const APPROVED_TASKS_ENV: &str = "NOTEKEEP_APPROVED_TASKS";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Blocked-path and quota checks applied before a task is queued.
#[derive(Debug, Clone)]
pub struct Enforcer {
    blocked: Vec<Pattern>,
    daily_quota: u32,
}

impl Enforcer {
    /// # Errors
    ///
    /// Returns [`Error::Glob`] for an invalid pattern.
    pub fn new(blocked_globs: &[String], daily_quota: u32) -> Result<Self, Error> {
        let blocked = blocked_globs
            .iter()
            .map(|g| Pattern::new(g))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            blocked,
            daily_quota,
        })
    }

    pub fn daily_quota(&self) -> u32 {
        self.daily_quota
    }

    /// Reject a note path that matches a blocked glob or climbs out of the root.
    ///
    /// Each glob is tried against the whole path and every trailing
    /// sub-path, so `credentials/*` also blocks `work/credentials/aws.md`.
    pub fn check_path(&self, path: &str) -> Result<(), Error> {
        let normalized = path.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./").trim_start_matches('/');
        let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();

        if components.iter().any(|c| *c == "..") {
            return Err(Error::Security(format!("path escapes notes root: {path}")));
        }

        for start in 0..components.len() {
            let suffix = components[start..].join("/");
            if let Some(pattern) = self
                .blocked
                .iter()
                .find(|p| p.matches_with(&suffix, MATCH_OPTIONS))
            {
                tracing::warn!(
                    target: "notekeep.quota",
                    op = "check_path",
                    path,
                    pattern = pattern.as_str(),
                    "blocked path rejected"
                );
                return Err(Error::Security(format!(
                    "path {path} matches blocked pattern {}",
                    pattern.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Count one task against `identity`'s quota for today.
    ///
    /// Runs inside the caller's transaction. `None` means the quota is spent
    /// and nothing was counted; see [`Enforcer::exceeded`].
    pub fn admit(&self, conn: &Connection, identity: &str) -> rusqlite::Result<Option<u32>> {
        admit_quota(conn, identity, &today(), self.daily_quota)
    }

    pub fn exceeded(&self, identity: &str) -> Error {
        Error::QuotaExceeded {
            identity: identity.to_string(),
            used: self.daily_quota,
            max: self.daily_quota,
        }
    }
}

/// Quota day key (UTC).
pub fn today() -> String {
    crate::sanitize::day_stamp()
}

/// Decides at dispatch time whether a claimed task may run.
pub trait ApprovalGate: Send + Sync {
    fn is_approved(&self, task: &TaskRecord) -> bool;
}

/// Fixed set of approved task ids.
#[derive(Debug, Clone, Default)]
pub struct ApprovalList {
    approved: HashSet<i64>,
}

impl ApprovalList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            approved: ids.into_iter().collect(),
        }
    }

    /// Parse a comma or whitespace separated id list. Bad entries are skipped.
    pub fn parse(value: &str) -> Self {
        let ids = value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .filter_map(|s| match s.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(target: "notekeep.quota", entry = s, "ignoring invalid approval id");
                    None
                }
            });
        Self::new(ids)
    }
}

impl ApprovalGate for ApprovalList {
    fn is_approved(&self, task: &TaskRecord) -> bool {
        self.approved.contains(&task.id)
    }
}

/// Reads [`APPROVED_TASKS_ENV`] on every check, so approvals granted while
/// the worker runs take effect on the next claim.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvApprovalGate;

impl ApprovalGate for EnvApprovalGate {
    fn is_approved(&self, task: &TaskRecord) -> bool {
        std::env::var(APPROVED_TASKS_ENV)
            .map(|v| ApprovalList::parse(&v).is_approved(task))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::create_test_db;

    fn enforcer(max: u32) -> Enforcer {
        Enforcer::new(
            &[
                "credentials/*".to_string(),
                "*.pem".to_string(),
                "secrets/**".to_string(),
            ],
            max,
        )
        .unwrap()
    }

    #[test]
    fn test_blocked_globs_match_suffixes() {
        let e = enforcer(1);
        assert!(matches!(e.check_path("credentials/aws.md"), Err(Error::Security(_))));
        assert!(matches!(e.check_path("work/credentials/aws.md"), Err(Error::Security(_))));
        assert!(matches!(e.check_path("keys/server.pem"), Err(Error::Security(_))));
        assert!(matches!(e.check_path("secrets/a/b/c.md"), Err(Error::Security(_))));
        assert!(matches!(e.check_path("./credentials/x.md"), Err(Error::Security(_))));
    }

    #[test]
    fn test_allowed_paths_pass() {
        let e = enforcer(1);
        assert!(e.check_path("notes/credentials.md").is_ok());
        assert!(e.check_path("10-19 Work/11.01 plan.md").is_ok());
    }

    #[test]
    fn test_parent_components_rejected() {
        let e = enforcer(1);
        assert!(matches!(e.check_path("../outside.md"), Err(Error::Security(_))));
    }

    #[test]
    fn test_invalid_glob() {
        assert!(matches!(
            Enforcer::new(&["[".to_string()], 1),
            Err(Error::Glob(_))
        ));
    }

    #[test]
    fn test_admit_stops_at_quota() {
        let mut db = create_test_db();
        let e = enforcer(2);
        assert_eq!(db.write(|tx| e.admit(tx, "alice")).unwrap(), Some(1));
        assert_eq!(db.write(|tx| e.admit(tx, "alice")).unwrap(), Some(2));
        assert_eq!(db.write(|tx| e.admit(tx, "alice")).unwrap(), None);
        assert_eq!(db.write(|tx| e.admit(tx, "bob")).unwrap(), Some(1));
        assert_eq!(db.quota_used("alice", &today()).unwrap(), 2);
    }

    #[test]
    fn test_approval_list_parse() {
        let list = ApprovalList::parse("1, 4 x 7");
        let mut task = TaskRecord {
            id: 4,
            task_type: crate::storage::queue::TaskType::Classify,
            payload: serde_json::json!({}),
            status: crate::storage::queue::TaskStatus::Processing,
            created_at: String::new(),
            claimed_at: None,
            finished_at: None,
            result: None,
            error: None,
            attempts: 1,
        };
        assert!(list.is_approved(&task));
        task.id = 5;
        assert!(!list.is_approved(&task));
    }
}
