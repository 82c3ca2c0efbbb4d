// Generational arena holding every live series

use serde::{Deserialize, Serialize};

use crate::core::series::{ChannelKind, TimeSeries};

/// Stable reference to a series in a [`SeriesRegistry`].
///
/// A handle goes stale once its series is removed, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesHandle {
    pub index: u32,
    pub generation: u32,
}

impl SeriesHandle {
    /// Compact form used in URLs: generation in the high half.
    pub fn to_id(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_id(id: u64) -> Self {
        Self {
            index: id as u32,
            generation: (id >> 32) as u32,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    series: Option<TimeSeries>,
}

#[derive(Debug, Default)]
pub struct SeriesRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: Vec<SeriesHandle>,
}

impl SeriesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: TimeSeries) -> SeriesHandle {
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.series = Some(series);
                SeriesHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    series: Some(series),
                });
                SeriesHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.order.push(handle);
        handle
    }

    fn slot(&self, handle: SeriesHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
    }

    pub fn contains(&self, handle: SeriesHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: SeriesHandle) -> Option<&TimeSeries> {
        self.slot(handle).and_then(|s| s.series.as_ref())
    }

    pub fn get_mut(&mut self, handle: SeriesHandle) -> Option<&mut TimeSeries> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.series.as_mut())
    }

    pub fn remove(&mut self, handle: SeriesHandle) -> Option<TimeSeries> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)?;
        let series = slot.series.take()?;

        self.free.push(handle.index);
        self.order.retain(|h| *h != handle);
        Some(series)
    }

    /// Live series in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (SeriesHandle, &TimeSeries)> {
        self.order.iter().filter_map(move |&h| self.get(h).map(|s| (h, s)))
    }

    pub fn handles(&self) -> Vec<SeriesHandle> {
        self.order.clone()
    }

    pub fn find_by_kind(&self, kind: ChannelKind) -> Option<SeriesHandle> {
        self.iter().find(|(_, s)| s.kind() == kind).map(|(h, _)| h)
    }

    pub fn find_all(&self, pred: impl Fn(&TimeSeries) -> bool) -> Vec<SeriesHandle> {
        self.iter().filter(|(_, s)| pred(s)).map(|(h, _)| h).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<SeriesHandle> {
        self.iter().find(|(_, s)| s.name() == name).map(|(h, _)| h)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Removes everything and returns the series in insertion order.
    pub fn drain(&mut self) -> Vec<(SeriesHandle, TimeSeries)> {
        let handles = std::mem::take(&mut self.order);
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            if let Some(slot) = self.slots.get_mut(h.index as usize) {
                if let Some(series) = slot.series.take() {
                    self.free.push(h.index);
                    out.push((h, series));
                }
            }
        }
        out
    }
}
