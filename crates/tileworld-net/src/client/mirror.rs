//! Client-side view of other players.

use std::collections::{BTreeMap, HashMap};

use crate::protocol::PlayerSyncData;

/// A remote player as last reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    /// Last reported state
    pub sync: PlayerSyncData,
    /// Seconds since the direction or motion last changed
    pub animation_time: f32,
}

impl RemotePlayer {
    fn new(sync: PlayerSyncData) -> Self {
        Self {
            sync,
            animation_time: 0.0,
        }
    }
}

/// What changed between two player snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerDelta {
    /// Newly present players
    pub joined: Vec<String>,
    /// Players no longer present
    pub left: Vec<String>,
    /// Players whose facing changed
    pub turned: Vec<String>,
    /// Players that began walking
    pub started_moving: Vec<String>,
    /// Players that stopped walking
    pub stopped_moving: Vec<String>,
}

impl PlayerDelta {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
            && self.left.is_empty()
            && self.turned.is_empty()
            && self.started_moving.is_empty()
            && self.stopped_moving.is_empty()
    }
}

/// Identity → remote player, excluding the local identity.
#[derive(Debug, Default)]
pub struct PlayerMirror {
    players: HashMap<String, RemotePlayer>,
}

impl PlayerMirror {
    /// Creates an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the mirror with a server snapshot and reports what changed.
    /// Entries that turned or changed motion restart their animation clock.
    pub fn apply(
        &mut self,
        snapshot: BTreeMap<String, PlayerSyncData>,
        local: Option<&str>,
    ) -> PlayerDelta {
        let mut delta = PlayerDelta::default();
        let mut previous = std::mem::take(&mut self.players);

        for (name, sync) in snapshot {
            if local == Some(name.as_str()) {
                continue;
            }
            let entry = match previous.remove(&name) {
                Some(mut old) => {
                    let turned = old.sync.direction != sync.direction;
                    let motion_changed = old.sync.moving != sync.moving;
                    if turned {
                        delta.turned.push(name.clone());
                    }
                    if motion_changed {
                        if sync.moving {
                            delta.started_moving.push(name.clone());
                        } else {
                            delta.stopped_moving.push(name.clone());
                        }
                    }
                    if turned || motion_changed {
                        old.animation_time = 0.0;
                    }
                    old.sync = sync;
                    old
                },
                None => {
                    delta.joined.push(name.clone());
                    RemotePlayer::new(sync)
                },
            };
            self.players.insert(name, entry);
        }

        delta.left = previous.into_keys().collect();
        delta.left.sort();
        delta
    }

    /// Advances every animation clock.
    pub fn advance(&mut self, dt: f32) {
        for player in self.players.values_mut() {
            player.animation_time += dt;
        }
    }

    /// Looks up a remote player.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RemotePlayer> {
        self.players.get(name)
    }

    /// Iterates remote players.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RemotePlayer)> {
        self.players.iter()
    }

    /// Number of remote players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no remote player is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Forgets everyone.
    pub fn clear(&mut self) {
        self.players.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileworld_world::Direction;

    fn sync(x: i32, direction: Direction, moving: bool) -> PlayerSyncData {
        PlayerSyncData {
            x,
            y: 0,
            direction,
            moving,
            running: false,
        }
    }

    #[test]
    fn test_local_identity_is_excluded() {
        let mut mirror = PlayerMirror::new();
        let snapshot = BTreeMap::from([
            ("me".to_string(), sync(0, Direction::Down, false)),
            ("you".to_string(), sync(1, Direction::Down, false)),
        ]);
        let delta = mirror.apply(snapshot, Some("me"));
        assert_eq!(delta.joined, vec!["you".to_string()]);
        assert!(mirror.get("me").is_none());
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_turn_and_motion_reset_clock() {
        let mut mirror = PlayerMirror::new();
        mirror.apply(
            BTreeMap::from([("a".to_string(), sync(0, Direction::Down, false))]),
            None,
        );
        mirror.advance(1.5);
        assert!((mirror.get("a").expect("a present").animation_time - 1.5).abs() < f32::EPSILON);

        let delta = mirror.apply(
            BTreeMap::from([("a".to_string(), sync(1, Direction::Left, true))]),
            None,
        );
        assert_eq!(delta.turned, vec!["a".to_string()]);
        assert_eq!(delta.started_moving, vec!["a".to_string()]);
        let a = mirror.get("a").expect("a present");
        assert_eq!(a.animation_time, 0.0);
        assert_eq!(a.sync.x, 1);
    }

    #[test]
    fn test_position_only_change_keeps_clock() {
        let mut mirror = PlayerMirror::new();
        mirror.apply(
            BTreeMap::from([("a".to_string(), sync(0, Direction::Up, true))]),
            None,
        );
        mirror.advance(0.25);
        let delta = mirror.apply(
            BTreeMap::from([("a".to_string(), sync(1, Direction::Up, true))]),
            None,
        );
        assert!(delta.is_empty());
        assert!(mirror.get("a").expect("a present").animation_time > 0.0);
    }

    #[test]
    fn test_missing_players_leave() {
        let mut mirror = PlayerMirror::new();
        mirror.apply(
            BTreeMap::from([
                ("a".to_string(), sync(0, Direction::Up, false)),
                ("b".to_string(), sync(0, Direction::Up, false)),
            ]),
            None,
        );
        let delta = mirror.apply(
            BTreeMap::from([("b".to_string(), sync(0, Direction::Up, false))]),
            None,
        );
        assert_eq!(delta.left, vec!["a".to_string()]);
        assert_eq!(mirror.len(), 1);
    }
}
