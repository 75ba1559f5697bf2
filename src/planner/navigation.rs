//! Single-step grid navigation.
//!
//! Resolves the x axis before the y axis. Directions found blocked at the
//! current cell are skipped; when every preferred direction is blocked the
//! remaining ones are tried clockwise starting from the current facing.

use crate::protocol::{Coord, Direction, Position, Rotation, WorldSize};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Arrived,
    Turn(Rotation),
    Forward(Coord),
    /// No usable direction from this cell
    Boxed,
}

/// Directions that reduce the distance to `target`, x axis first.
pub fn preferred_directions(from: Coord, target: Coord) -> Vec<Direction> {
    let mut preferred = Vec::with_capacity(2);
    if target.x > from.x {
        preferred.push(Direction::East);
    } else if target.x < from.x {
        preferred.push(Direction::West);
    }
    if target.y > from.y {
        preferred.push(Direction::South);
    } else if target.y < from.y {
        preferred.push(Direction::North);
    }
    preferred
}

pub fn plan_step(
    position: Position,
    target: Coord,
    size: WorldSize,
    blocked: &HashSet<Direction>,
) -> Step {
    let here = position.coord();
    if here == target {
        return Step::Arrived;
    }

    let mut candidates = preferred_directions(here, target);
    let mut facing = position.direction;
    for _ in 0..4 {
        if !candidates.contains(&facing) {
            candidates.push(facing);
        }
        facing = facing.turned(Rotation::Right);
    }

    let choice = candidates
        .into_iter()
        .find(|d| !blocked.contains(d) && size.contains(here.step(*d)));

    match choice {
        None => Step::Boxed,
        Some(direction) => match position.direction.turn_towards(direction) {
            Some(rotation) => Step::Turn(rotation),
            None => Step::Forward(here.step(direction)),
        },
    }
}

/// Actions allowed per goal before it is abandoned.
pub fn step_budget(size: WorldSize) -> usize {
    (4 * (size.width.max(0) + size.height.max(0)) + 8) as usize
}
