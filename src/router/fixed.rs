//! Pinned selection.

use std::sync::Arc;

use crate::router::{endpoint::Endpoint, Selector};

/// Always returns the currently pinned index.
#[derive(Debug, Default)]
pub struct Fixed;

impl Fixed {
    pub fn new() -> Self {
        Self
    }
}

impl Selector for Fixed {
    fn select(&self, endpoints: &[Arc<Endpoint>], current: usize) -> Option<usize> {
        (current < endpoints.len()).then_some(current)
    }
}
