//! # Session Correlation
//!
//! Per-parser state that pairs `execve` entries with their exits and tracks
//! which request a container is serving, as announced by marker writes.
//!
//! Two marker protocols exist. The single-id protocol (`node`) keeps one
//! current request per container; the concurrent-id protocol (`fwatchdog`)
//! keeps a set of requests in flight.

use crate::syscall::{Syscall, SyscallLine};
use std::collections::{BTreeSet, HashMap};
use tracegraph_core::model::UNKNOWN;

/// Process announcing one request at a time
pub const SINGLE_ID_PROCESS: &str = "node";

/// Process announcing concurrent requests
pub const CONCURRENT_ID_PROCESS: &str = "fwatchdog";

const SINGLE_START: &str = "data=flag_data";
const SINGLE_END: &str = "data=end_flag_data";
const CONCURRENT_START: &str = "data=start_ofwatchdog_flag_data";
const CONCURRENT_END: &str = "data=end_ofwatchdog_flag_data";

/// Request boundary written by an instrumented process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    SingleStart,
    SingleEnd,
    ConcurrentStart,
    ConcurrentEnd,
}

impl Marker {
    /// Recognise a marker write; returns the marker and the request id it carries
    ///
    /// Marker params look like `res=77 data=flag_data is 12345`.
    pub fn detect(line: &SyscallLine) -> Option<(Marker, &str)> {
        if line.syscall != Syscall::Write || line.params.len() < 4 {
            return None;
        }
        let sentinel = line.params[1].as_str();
        let marker = match (line.process_name.as_str(), sentinel) {
            (SINGLE_ID_PROCESS, SINGLE_START) => Marker::SingleStart,
            (SINGLE_ID_PROCESS, SINGLE_END) => Marker::SingleEnd,
            (CONCURRENT_ID_PROCESS, CONCURRENT_START) => Marker::ConcurrentStart,
            (CONCURRENT_ID_PROCESS, CONCURRENT_END) => Marker::ConcurrentEnd,
            _ => return None,
        };
        Some((marker, line.params[3].as_str()))
    }
}

/// Name and command buffered from an `execve` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExec {
    pub name: String,
    pub exe_path: String,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    /// `host#container#vpid` → pending exec
    pending_exec: HashMap<String, PendingExec>,
    /// `host#container` → current request
    current_ids: HashMap<String, String>,
    /// `host#container` → requests in flight
    active_ids: HashMap<String, BTreeSet<String>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_exec(&mut self, process_key: String, name: impl Into<String>, exe_path: impl Into<String>) {
        self.pending_exec.insert(
            process_key,
            PendingExec {
                name: name.into(),
                exe_path: exe_path.into(),
            },
        );
    }

    pub fn take_exec(&mut self, process_key: &str) -> Option<PendingExec> {
        self.pending_exec.remove(process_key)
    }

    pub fn pending_execs(&self) -> usize {
        self.pending_exec.len()
    }

    pub fn apply_marker(&mut self, scope: &str, marker: Marker, id: &str) {
        match marker {
            Marker::SingleStart => {
                self.current_ids.insert(scope.to_string(), id.to_string());
            }
            Marker::SingleEnd => {
                // a newer request may have started meanwhile
                if let Some(current) = self.current_ids.get_mut(scope) {
                    if current == id {
                        *current = UNKNOWN.to_string();
                    }
                }
            }
            Marker::ConcurrentStart => {
                self.active_ids
                    .entry(scope.to_string())
                    .or_default()
                    .insert(id.to_string());
            }
            Marker::ConcurrentEnd => {
                if let Some(active) = self.active_ids.get_mut(scope) {
                    active.remove(id);
                }
            }
        }
    }

    /// Correlation id for a line emitted by `process_name` in `scope`
    pub fn correlation_id(&self, scope: &str, process_name: &str) -> String {
        if process_name == CONCURRENT_ID_PROCESS {
            return match self.active_ids.get(scope) {
                Some(active) if !active.is_empty() => active.iter().cloned().collect::<Vec<_>>().join(","),
                _ => UNKNOWN.to_string(),
            };
        }
        match self.current_ids.get(scope) {
            Some(current) if !current.is_empty() => current.clone(),
            _ => UNKNOWN.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPE: &str = "ServerID#c1";

    #[test]
    fn test_single_id_end_only_clears_matching_request() {
        let mut session = SessionContext::new();
        assert_eq!(session.correlation_id(SCOPE, "node"), UNKNOWN);

        session.apply_marker(SCOPE, Marker::SingleStart, "a");
        session.apply_marker(SCOPE, Marker::SingleStart, "b");
        session.apply_marker(SCOPE, Marker::SingleEnd, "a");
        assert_eq!(session.correlation_id(SCOPE, "node"), "b");

        session.apply_marker(SCOPE, Marker::SingleEnd, "b");
        assert_eq!(session.correlation_id(SCOPE, "node"), UNKNOWN);
    }

    #[test]
    fn test_concurrent_ids_are_sorted_and_joined() {
        let mut session = SessionContext::new();
        session.apply_marker(SCOPE, Marker::ConcurrentStart, "20");
        session.apply_marker(SCOPE, Marker::ConcurrentStart, "10");
        assert_eq!(session.correlation_id(SCOPE, "fwatchdog"), "10,20");

        session.apply_marker(SCOPE, Marker::ConcurrentEnd, "10");
        assert_eq!(session.correlation_id(SCOPE, "fwatchdog"), "20");

        session.apply_marker(SCOPE, Marker::ConcurrentEnd, "20");
        assert_eq!(session.correlation_id(SCOPE, "fwatchdog"), UNKNOWN);
    }

    #[test]
    fn test_protocols_do_not_mix() {
        let mut session = SessionContext::new();
        session.apply_marker(SCOPE, Marker::ConcurrentStart, "1");
        assert_eq!(session.correlation_id(SCOPE, "node"), UNKNOWN);
        assert_eq!(session.correlation_id(SCOPE, "python"), UNKNOWN);

        session.apply_marker(SCOPE, Marker::SingleStart, "2");
        assert_eq!(session.correlation_id(SCOPE, "python"), "2");
        assert_eq!(session.correlation_id(SCOPE, "fwatchdog"), "1");
        assert_eq!(session.correlation_id("ServerID#other", "python"), UNKNOWN);
    }

    #[test]
    fn test_exec_pairing() {
        let mut session = SessionContext::new();
        session.begin_exec("h#c#7".into(), "sh", "/bin/sh");
        assert_eq!(session.pending_execs(), 1);
        let pending = session.take_exec("h#c#7").unwrap();
        assert_eq!(pending.name, "sh");
        assert!(session.take_exec("h#c#7").is_none());
    }
}
