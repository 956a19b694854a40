//! Weighted random selection.

use std::sync::Arc;

use rand::Rng;

use crate::router::{endpoint::Endpoint, Selector};

/// Draws an endpoint with probability proportional to its priority.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }

    /// Draw an index, optionally never returning `exclude`.
    pub fn draw(&self, endpoints: &[Arc<Endpoint>], exclude: Option<usize>) -> Option<usize> {
        let candidates = endpoints
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude);
        let total: u64 = candidates.clone().map(|(_, e)| e.priority() as u64).sum();
        if total == 0 {
            return None;
        }

        let mut ticket = rand::thread_rng().gen_range(0..total);
        for (index, endpoint) in candidates {
            let weight = endpoint.priority() as u64;
            if ticket < weight {
                return Some(index);
            }
            ticket -= weight;
        }
        None
    }
}

impl Selector for WeightedRandom {
    fn select(&self, endpoints: &[Arc<Endpoint>], _current: usize) -> Option<usize> {
        match endpoints.len() {
            0 => None,
            1 => Some(0),
            _ => self.draw(endpoints, None),
        }
    }
}
