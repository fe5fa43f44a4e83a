//! Path-scan detection.
//!
//! A client that touches many distinct paths in a short run of requests is
//! probing the API surface. The detector keeps the last `window` paths per
//! client and flags the client when `unique_threshold` or more are distinct.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy)]
pub struct PathScanDetector {
    window: usize,
    unique_threshold: usize,
}

impl PathScanDetector {
    pub fn new(window: usize, unique_threshold: usize) -> Self {
        Self {
            window,
            unique_threshold,
        }
    }

    /// Record `path` in `recent` and return the distinct paths when the window looks like a scan.
    pub fn observe(&self, recent: &mut VecDeque<String>, path: &str) -> Option<Vec<String>> {
        if self.window == 0 {
            return None;
        }
        if recent.len() == self.window {
            recent.pop_front();
        }
        recent.push_back(path.to_string());

        if recent.len() < self.window {
            return None;
        }

        let unique: HashSet<&str> = recent.iter().map(String::as_str).collect();
        if unique.len() >= self.unique_threshold {
            let mut paths: Vec<String> = unique.into_iter().map(str::to_string).collect();
            paths.sort();
            Some(paths)
        } else {
            None
        }
    }
}
