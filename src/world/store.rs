//! Process-wide world state shared by every session and planner.
//!
//! All operations are atomic with respect to each other. Positions and
//! reservations live under a single lock so that reserving a cell can check
//! occupancy and claim it in one step.

use super::sink::{EventSink, WorldEvent};
use super::snapshot::{AgentEntry, ExplorationStats, FieldEntry, WorldSnapshot};
use crate::protocol::{Coord, Direction, Measure, Position, WorldSize};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Occupancy {
    agents: HashSet<String>,
    positions: HashMap<String, Position>,
    /// Cell -> holding agent
    reservations: HashMap<Coord, String>,
}

impl Occupancy {
    fn occupied_by_other(&self, agent: &str, coord: Coord) -> bool {
        self.positions
            .iter()
            .any(|(name, pos)| name != agent && pos.coord() == coord)
    }
}

#[derive(Default)]
pub struct WorldStore {
    size: RwLock<Option<WorldSize>>,
    fields: RwLock<HashMap<Coord, Measure>>,
    occupancy: Mutex<Occupancy>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    fn emit(&self, event: WorldEvent) {
        for sink in self.sinks.read().iter() {
            sink.record(&event);
        }
    }

    // ------------------------------------------------------------------
    // World geometry
    // ------------------------------------------------------------------

    pub fn set_world_size(&self, width: i32, height: i32) {
        let size = WorldSize::new(width, height);
        let previous = self.size.write().replace(size);
        if previous != Some(size) {
            tracing::info!("World size set to {}x{}", width, height);
        }
    }

    /// World size once both dimensions are positive.
    pub fn world_size(&self) -> Option<WorldSize> {
        self.size.read().filter(WorldSize::is_known)
    }

    // ------------------------------------------------------------------
    // Explored fields
    // ------------------------------------------------------------------

    /// Upsert a measurement. Cells outside a known world are ignored.
    pub fn record_measurement(&self, coord: Coord, measure: Measure) -> bool {
        if let Some(size) = self.world_size()
            && !size.contains(coord)
        {
            tracing::warn!("Ignoring measurement outside the world at {}", coord);
            return false;
        }
        self.fields.write().insert(coord, measure);
        self.emit(WorldEvent::Measurement { coord, measure });
        true
    }

    pub fn measurement(&self, coord: Coord) -> Option<Measure> {
        self.fields.read().get(&coord).copied()
    }

    pub fn is_explored(&self, coord: Coord) -> bool {
        self.fields.read().contains_key(&coord)
    }

    /// Known to be void.
    pub fn is_impassable(&self, coord: Coord) -> bool {
        self.measurement(coord)
            .is_some_and(|m| !m.ground.is_passable())
    }

    /// False while the world size is unknown.
    pub fn is_fully_explored(&self) -> bool {
        match self.world_size() {
            Some(size) => self.fields.read().len() >= size.cell_count(),
            None => false,
        }
    }

    pub fn exploration_stats(&self) -> ExplorationStats {
        ExplorationStats {
            explored: self.fields.read().len(),
            total: self.world_size().map_or(0, |s| s.cell_count()),
        }
    }

    pub fn explored_fields(&self) -> BTreeMap<Coord, Measure> {
        self.fields
            .read()
            .iter()
            .map(|(c, m)| (*c, *m))
            .collect()
    }

    // ------------------------------------------------------------------
    // Agents and positions
    // ------------------------------------------------------------------

    pub fn register_agent(&self, name: &str) {
        self.occupancy.lock().agents.insert(name.to_string());
    }

    /// Remove an agent with its position and every reservation it holds.
    pub fn unregister_agent(&self, name: &str) {
        let removed = {
            let mut occ = self.occupancy.lock();
            let was_known = occ.agents.remove(name);
            let had_position = occ.positions.remove(name).is_some();
            occ.reservations.retain(|_, holder| holder != name);
            was_known || had_position
        };
        if removed {
            self.emit(WorldEvent::AgentRemoved {
                agent: name.to_string(),
            });
        }
    }

    pub fn set_agent_position(&self, name: &str, position: Position) {
        self.occupancy
            .lock()
            .positions
            .insert(name.to_string(), position);
        self.emit(WorldEvent::Position {
            agent: name.to_string(),
            position,
        });
    }

    /// Update facing only. Returns false if the agent has no position yet.
    pub fn set_agent_direction(&self, name: &str, direction: Direction) -> bool {
        let updated = {
            let mut occ = self.occupancy.lock();
            occ.positions.get_mut(name).map(|pos| {
                pos.direction = direction;
                *pos
            })
        };
        match updated {
            Some(position) => {
                self.emit(WorldEvent::Position {
                    agent: name.to_string(),
                    position,
                });
                true
            }
            None => false,
        }
    }

    pub fn agent_position(&self, name: &str) -> Option<Position> {
        self.occupancy.lock().positions.get(name).copied()
    }

    pub fn agent_positions(&self) -> BTreeMap<String, Position> {
        self.occupancy
            .lock()
            .positions
            .iter()
            .map(|(n, p)| (n.clone(), *p))
            .collect()
    }

    pub fn is_occupied_by_other(&self, agent: &str, coord: Coord) -> bool {
        self.occupancy.lock().occupied_by_other(agent, coord)
    }

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    /// Claim `coord` for `agent`.
    ///
    /// Fails when another agent holds the reservation or stands on the cell.
    /// Re-reserving a cell the agent already holds succeeds.
    pub fn try_reserve(&self, agent: &str, coord: Coord) -> bool {
        let mut occ = self.occupancy.lock();
        if let Some(holder) = occ.reservations.get(&coord)
            && holder != agent
        {
            return false;
        }
        if occ.occupied_by_other(agent, coord) {
            return false;
        }
        occ.reservations.insert(coord, agent.to_string());
        true
    }

    pub fn release(&self, coord: Coord) {
        self.occupancy.lock().reservations.remove(&coord);
    }

    /// Release `coord` only if `agent` holds it.
    pub fn release_held(&self, agent: &str, coord: Coord) -> bool {
        let mut occ = self.occupancy.lock();
        if occ.reservations.get(&coord).is_some_and(|h| h == agent) {
            occ.reservations.remove(&coord);
            true
        } else {
            false
        }
    }

    pub fn reservation_holder(&self, coord: Coord) -> Option<String> {
        self.occupancy.lock().reservations.get(&coord).cloned()
    }

    pub fn is_reserved(&self, coord: Coord) -> bool {
        self.occupancy.lock().reservations.contains_key(&coord)
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let mut fields: Vec<FieldEntry> = self
            .fields
            .read()
            .iter()
            .map(|(c, m)| FieldEntry {
                x: c.x,
                y: c.y,
                measure: *m,
            })
            .collect();
        fields.sort_by_key(|f| (f.y, f.x));

        let agents = self
            .agent_positions()
            .into_iter()
            .map(|(name, position)| AgentEntry { name, position })
            .collect();

        WorldSnapshot {
            world: self.world_size(),
            stats: self.exploration_stats(),
            fields,
            agents,
        }
    }
}
