//! JSON Lines feed source
//!
//! Each non-blank line of a target's feed file is one raw record, handed
//! to the target's service for normalization. A line that is not valid
//! JSON only invalidates itself; a missing or unreadable file fails the
//! whole target.

use std::fs::File;
use std::io::{BufRead, BufReader};

use serde_json::Value;

use super::{service_for, IssueSource, ServiceKind};
use crate::config::Target;
use crate::error::{Error, Result};
use crate::issue::RemoteIssue;

pub struct FeedSource {
    target: Target,
}

impl FeedSource {
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    fn read_lines(&self) -> Result<Vec<(usize, String)>> {
        let path = self.target.config.feed.as_ref().ok_or_else(|| {
            Error::InvalidConfig(format!("targets.{}: no feed configured", self.target.name))
        })?;
        let file = File::open(path).map_err(|err| Error::Remote {
            target: self.target.name.clone(),
            message: format!("cannot read feed {}: {err}", path.display()),
        })?;

        let mut lines = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            lines.push((index + 1, line));
        }
        Ok(lines)
    }
}

impl IssueSource for FeedSource {
    fn target(&self) -> &str {
        &self.target.name
    }

    fn service(&self) -> ServiceKind {
        self.target.service
    }

    fn issues(&self) -> Result<Box<dyn Iterator<Item = Result<RemoteIssue>> + '_>> {
        let lines = self.read_lines()?;
        tracing::debug!(target_name = %self.target.name, records = lines.len(), "read feed");
        let service = service_for(self.target.service);

        Ok(Box::new(lines.into_iter().map(move |(number, line)| {
            let record: Value = serde_json::from_str(&line).map_err(|err| Error::MalformedIssue {
                key: format!("[{}] line {number}", self.target.name),
                field: "record".to_string(),
                reason: err.to_string(),
            })?;
            service.normalize(&self.target, record)
        })))
    }
}
