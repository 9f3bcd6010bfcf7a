use crate::protocol::{PlayerState, Station};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, warn};

/// The one piece of user data we persist: station display order, by URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationOrder {
    pub urls: Vec<String>,
}

impl StationOrder {
    pub fn of(stations: &[Station]) -> Self {
        Self {
            urls: stations.iter().map(|s| s.url.clone()).collect(),
        }
    }

    /// Missing or unreadable files yield an empty order.
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(order) => order,
            Err(e) => {
                warn!("ignoring unreadable station order {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Reorder `stations` by `order`.  Stations the order names come first, in
/// that order; the rest keep their relative position after them.  Unknown
/// and duplicate URLs in the order are skipped.
pub fn apply_order(stations: Vec<Station>, order: &StationOrder) -> Vec<Station> {
    let mut remaining: Vec<Option<Station>> = stations.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(remaining.len());
    for url in &order.urls {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|s| &s.url == url))
        {
            out.extend(slot.take());
        }
    }
    out.extend(remaining.into_iter().flatten());
    out
}

/// Where index `idx` ends up after moving the element at `from` to `to`.
pub fn index_after_move(idx: usize, from: usize, to: usize) -> usize {
    if idx == from {
        to
    } else if from < idx && idx <= to {
        idx - 1
    } else if to <= idx && idx < from {
        idx + 1
    } else {
        idx
    }
}

/// Owner of the published [`PlayerState`].  Writers go through `update`,
/// which bumps `rev`; readers clone the latest snapshot.
pub struct StateManager {
    tx: watch::Sender<PlayerState>,
    order_file: PathBuf,
}

impl StateManager {
    pub fn new(order_file: PathBuf, stations: Vec<Station>, volume: f32) -> Self {
        let order = StationOrder::load(&order_file);
        let stations = apply_order(stations, &order);
        debug!("station order: {} entries applied", order.urls.len());

        let state = PlayerState {
            rev: 1,
            stations,
            volume: volume.clamp(0.0, 1.0),
            online: true,
            ..PlayerState::default()
        };
        let (tx, _rx) = watch::channel(state);
        Self { tx, order_file }
    }

    pub fn get_state(&self) -> PlayerState {
        self.tx.borrow().clone()
    }

    pub fn station(&self, idx: usize) -> Option<Station> {
        self.tx.borrow().stations.get(idx).cloned()
    }

    pub fn update(&self, f: impl FnOnce(&mut PlayerState)) {
        self.tx.send_modify(|state| {
            f(state);
            state.rev += 1;
        });
    }

    /// Move a station in the list and persist the new order.  Returns
    /// `Ok(false)` when either index is out of range.
    pub fn move_station(&self, from: usize, to: usize) -> anyhow::Result<bool> {
        let mut moved = None;
        self.tx.send_if_modified(|state| {
            let len = state.stations.len();
            if from >= len || to >= len {
                return false;
            }
            let station = state.stations.remove(from);
            state.stations.insert(to, station);
            state.current_station = state
                .current_station
                .map(|idx| index_after_move(idx, from, to));
            state.rev += 1;
            moved = Some(StationOrder::of(&state.stations));
            true
        });
        match moved {
            Some(order) => {
                order.save(&self.order_file)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
