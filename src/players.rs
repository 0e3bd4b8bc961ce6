//! Per-phase player aggregates.
//!
//! The store is shared by every role handler and the reporting hook. It has
//! its own lock, separate from the ring buffer, so handlers for different
//! roles only contend here and never on the queue.

use crate::error::{PipelineError, Result};
use crate::source::lossy_lines;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Longest tournament id kept per ranking row
pub const TOURNEY_ID_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    /// Running ranking points
    pub points: i64,
    /// Accumulated points-per-attempt
    pub ppa: f64,
    /// Distinct tournaments with ranking points, in first-seen order
    pub tournaments: Vec<String>,
}

impl Player {
    pub fn new(id: i64, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            points: 0,
            ppa: 0.0,
            tournaments: Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Points per tournament, treating an empty list as one tournament
    pub fn average_points(&self) -> f64 {
        self.points as f64 / self.tournaments.len().max(1) as f64
    }
}

#[derive(Debug, Default)]
struct Roster {
    players: Vec<Player>,
    by_id: HashMap<i64, usize>,
    leader: Option<Player>,
}

/// Thread-safe player table for the current phase
#[derive(Debug, Default)]
pub struct PlayerStore {
    inner: Mutex<Roster>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player. A repeated id replaces the earlier entry.
    pub fn insert(&self, player: Player) {
        let mut roster = self.inner.lock();
        match roster.by_id.get(&player.id).copied() {
            Some(idx) => roster.players[idx] = player,
            None => {
                let idx = roster.players.len();
                roster.by_id.insert(player.id, idx);
                roster.players.push(player);
            }
        }
    }

    /// Load `id,first,last` rows after a header line. Returns players loaded.
    pub fn load_roster(&self, path: &Path) -> Result<usize> {
        let file = File::open(path).map_err(|source| PipelineError::Source {
            origin: path.display().to_string(),
            source,
        })?;
        let mut lines = Vec::new();
        for line in lossy_lines(BufReader::new(file)).skip(1) {
            match line {
                Ok(line) => lines.push(line),
                Err(source) => {
                    return Err(PipelineError::Source {
                        origin: path.display().to_string(),
                        source,
                    })
                }
            }
        }
        self.load_roster_lines(lines)
    }

    /// Load roster rows that have already had their header stripped
    pub fn load_roster_lines<I, S>(&self, lines: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded = 0;
        for line in lines {
            let line = line.as_ref().trim_end_matches('\r');
            let mut fields = line.split(',');
            let id = fields.next().unwrap_or_default();
            let Ok(id) = id.trim().parse::<i64>() else {
                warn!("Skipping roster row with invalid id: {line}");
                continue;
            };
            let first = fields.next().unwrap_or_default();
            let last = fields.next().unwrap_or_default();
            self.insert(Player::new(id, first, last));
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Drop every player and the leader
    pub fn clear(&self) {
        *self.inner.lock() = Roster::default();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: i64) -> Option<Player> {
        let roster = self.inner.lock();
        roster.by_id.get(&id).map(|&idx| roster.players[idx].clone())
    }

    /// Add PPA deltas to a winner and loser.
    ///
    /// Both players must exist; on a miss nothing is changed and `false` is
    /// returned.
    pub fn credit_ppa(&self, winner: i64, winner_delta: f64, loser: i64, loser_delta: f64) -> bool {
        let mut roster = self.inner.lock();
        let (Some(&w), Some(&l)) = (roster.by_id.get(&winner), roster.by_id.get(&loser)) else {
            return false;
        };
        roster.players[w].ppa += winner_delta;
        roster.players[l].ppa += loser_delta;
        true
    }

    /// Add ranking points for a player and refresh the max-average leader.
    ///
    /// Returns the player's new average, or `None` if the id is unknown.
    pub fn record_ranking(&self, player: i64, tourney_id: &str, points: i64) -> Option<f64> {
        let mut roster = self.inner.lock();
        let idx = roster.by_id.get(&player).copied()?;

        let entry = &mut roster.players[idx];
        if !entry.tournaments.iter().any(|t| t == tourney_id) {
            entry.tournaments.push(tourney_id.to_string());
        }
        entry.points += points;
        let average = entry.average_points();

        let leader_average = roster.leader.as_ref().map_or(0.0, Player::average_points);
        if average > leader_average {
            roster.leader = Some(roster.players[idx].clone());
        }
        Some(average)
    }

    /// Player with the highest points-per-tournament seen so far
    pub fn leader(&self) -> Option<Player> {
        self.inner.lock().leader.clone()
    }

    /// Top `n` players by PPA, highest first. Ties keep roster order.
    pub fn top_ppa(&self, n: usize) -> Vec<Player> {
        let roster = self.inner.lock();
        let mut ranked: Vec<&Player> = roster.players.iter().collect();
        ranked.sort_by(|a, b| b.ppa.total_cmp(&a.ppa));
        ranked.into_iter().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PlayerStore {
        let store = PlayerStore::new();
        store
            .load_roster_lines(["100,Roger,Federer", "200,Rafael,Nadal", "bogus,x,y"])
            .unwrap();
        store
    }

    #[test]
    fn test_roster_load_skips_bad_ids() {
        let store = store();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(200).unwrap().full_name(), "Rafael Nadal");
    }

    #[test]
    fn test_load_roster_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atp_players.csv");
        std::fs::write(&path, "player_id,name_first,name_last\r\n7,Ann,Lee\r\n").unwrap();
        let store = PlayerStore::new();
        assert_eq!(store.load_roster(&path).unwrap(), 1);
        assert_eq!(store.get(7).unwrap().last_name, "Lee");
        assert!(store.load_roster(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_load_roster_survives_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atp_players.csv");
        std::fs::write(&path, b"player_id,name_first,name_last\n1,A,B\n2,M\xfcller,C\n3,D,E\n").unwrap();
        let store = PlayerStore::new();

        assert_eq!(store.load_roster(&path).unwrap(), 3);
        assert_eq!(store.get(2).unwrap().first_name, "M\u{fffd}ller");
        assert_eq!(store.get(3).unwrap().full_name(), "D E");
    }

    #[test]
    fn test_credit_ppa_requires_both_players() {
        let store = store();
        assert!(store.credit_ppa(100, 0.5, 200, 0.25));
        assert!(!store.credit_ppa(100, 1.0, 999, 1.0));
        assert_eq!(store.get(100).unwrap().ppa, 0.5);
        assert_eq!(store.get(200).unwrap().ppa, 0.25);
    }

    #[test]
    fn test_ranking_tracks_distinct_tournaments_and_leader() {
        let store = store();
        assert_eq!(store.record_ranking(100, "2019-0001", 100), Some(100.0));
        assert_eq!(store.record_ranking(100, "2019-0001", 50), Some(150.0));
        assert_eq!(store.record_ranking(200, "2019-0001", 120), Some(120.0));
        assert_eq!(store.leader().unwrap().id, 100);

        assert_eq!(store.record_ranking(100, "2019-0002", 10), Some(80.0));
        // Leader snapshot is only replaced by a strictly higher average
        assert_eq!(store.leader().unwrap().points, 150);
        assert_eq!(store.get(100).unwrap().tournaments.len(), 2);
        assert_eq!(store.record_ranking(999, "x", 1), None);
    }

    #[test]
    fn test_top_ppa_and_clear() {
        let store = store();
        store.credit_ppa(200, 2.0, 100, -1.0);
        let top = store.top_ppa(10);
        assert_eq!(top.iter().map(|p| p.id).collect::<Vec<_>>(), vec![200, 100]);
        assert_eq!(store.top_ppa(1).len(), 1);

        store.clear();
        assert!(store.is_empty());
        assert!(store.leader().is_none());
    }
}
