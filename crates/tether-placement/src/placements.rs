//! Live connection placements, ordered by ring position.

use std::collections::{BTreeMap, HashMap};

use tether_types::Placement;

use crate::ring::RingArc;

/// Ring of active placements.
///
/// Entries are keyed by `(position, connection_id)` so that two connections
/// hashing to the same position coexist. A secondary index by connection id
/// enforces at most one placement per connection and supports direct
/// removal on disconnect.
#[derive(Debug, Clone, Default)]
pub struct PlacementRing {
    entries: BTreeMap<(u32, String), Placement>,
    by_connection: HashMap<String, u32>,
}

impl PlacementRing {
    /// Create an empty placement ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `placement`, replacing any earlier placement of the same
    /// connection. Returns the replaced placement.
    pub fn insert(&mut self, placement: Placement) -> Option<Placement> {
        let previous = self.remove_connection(&placement.connection_id);
        self.by_connection
            .insert(placement.connection_id.clone(), placement.position);
        self.entries.insert(
            (placement.position, placement.connection_id.clone()),
            placement,
        );
        previous
    }

    /// Remove the placement of `connection_id`, if any.
    pub fn remove_connection(&mut self, connection_id: &str) -> Option<Placement> {
        let position = self.by_connection.remove(connection_id)?;
        self.entries.remove(&(position, connection_id.to_string()))
    }

    /// The placement of `connection_id`, if any.
    pub fn get(&self, connection_id: &str) -> Option<&Placement> {
        let position = *self.by_connection.get(connection_id)?;
        self.entries.get(&(position, connection_id.to_string()))
    }

    /// Placements whose position falls inside `arc`, in ring order.
    pub fn in_arc(&self, arc: RingArc) -> Vec<&Placement> {
        match arc {
            RingArc::Span { start, end } => {
                if start >= end {
                    return Vec::new();
                }
                self.entries
                    .range((start, String::new())..(end, String::new()))
                    .map(|(_, p)| p)
                    .collect()
            }
            RingArc::Wrapped {
                tail_start,
                head_end,
            } => {
                let tail = self.entries.range((tail_start, String::new())..);
                let head = self
                    .entries
                    .range(..(head_end.min(tail_start), String::new()));
                tail.chain(head).map(|(_, p)| p).collect()
            }
        }
    }

    /// Remove and return the placements inside `arc` that satisfy `evict`.
    pub fn drain_arc<F>(&mut self, arc: RingArc, mut evict: F) -> Vec<Placement>
    where
        F: FnMut(&Placement) -> bool,
    {
        let doomed: Vec<String> = self
            .in_arc(arc)
            .into_iter()
            .filter(|p| evict(p))
            .map(|p| p.connection_id.clone())
            .collect();

        doomed
            .iter()
            .filter_map(|connection_id| self.remove_connection(connection_id))
            .collect()
    }

    /// Iterate over all placements in ring order.
    pub fn iter(&self) -> impl Iterator<Item = &Placement> {
        self.entries.values()
    }

    /// Number of live placements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no live placements.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
