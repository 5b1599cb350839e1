//! Reference-cycle detection for resource graph traversal
//!
//! Walkers bracket each descent with [`LoopDetector::mark`] and
//! [`LoopDetector::clear_to_mark`], recording the object number of every
//! indirect object they enter. Seeing a number already present anywhere in
//! the active frames means the graph has a cycle, and that branch is
//! abandoned silently rather than recursed into.

use crate::fitz::error::{Error, Result};

const MAX_FRAMES: usize = 1024;

#[derive(Debug, Default)]
pub struct LoopDetector {
    frames: Vec<Vec<u32>>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new frame. Frames nest with traversal depth.
    pub fn mark(&mut self) -> Result<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(Error::limit("loop detector nesting too deep"));
        }
        self.frames.push(Vec::new());
        Ok(())
    }

    /// Discard the innermost frame and everything recorded in it.
    pub fn clear_to_mark(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Record an object number in the innermost frame. A no-op when no
    /// frame is open.
    pub fn add(&mut self, num: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(num);
        }
    }

    /// Is this object number already on the active path?
    pub fn detected(&self, num: u32) -> bool {
        self.frames.iter().any(|f| f.contains(&num))
    }

    /// Check and record in one step. Returns true if the object was
    /// already seen (i.e. descending would loop).
    pub fn check_and_add(&mut self, num: u32) -> bool {
        if self.detected(num) {
            return true;
        }
        self.add(num);
        false
    }
}
