//! Role handlers that fold match and ranking rows into the player store.

use crate::consumer::RoleHandler;
use crate::error::{PipelineError, Result};
use crate::phase::Phase;
use crate::players::{PlayerStore, TOURNEY_ID_LEN};
use crate::record::Record;
use crate::role::{OriginMatcher, Role};
use log::warn;
use std::sync::Arc;

pub const PPA_ROLE: &str = "ppa";
pub const RANKING_ROLE: &str = "ranking-points";

/// Origins containing this marker hold ranking rows
pub const RANKINGS_MARKER: &str = "atp_rankings";

/// The two roles of the analyzer, in role-id order
pub fn sports_roles() -> Vec<Role> {
    vec![
        Role::new(PPA_ROLE, OriginMatcher::excludes(RANKINGS_MARKER)),
        Role::new(RANKING_ROLE, OriginMatcher::contains(RANKINGS_MARKER)),
    ]
}

/// Build the handler for a role declared by [`sports_roles`]
pub fn handler_for(role: &str, store: Arc<PlayerStore>) -> Result<Box<dyn RoleHandler>> {
    match role {
        PPA_ROLE => Ok(Box::new(PpaHandler::new(store))),
        RANKING_ROLE => Ok(Box::new(RankingPointsHandler::new(store))),
        other => Err(PipelineError::ConfigError(format!(
            "no handler for role '{other}'"
        ))),
    }
}

/// Lenient integer field: "7" and "7.0" are 7, anything unparseable is 0
fn int_field(field: Option<&str>) -> i64 {
    let Some(field) = field.map(str::trim) else {
        return 0;
    };
    field
        .parse::<i64>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().map(|v| v as i64))
        .unwrap_or(0)
}

/// Serve statistics for one side of a match
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ServeLine {
    ace: i64,
    double_faults: i64,
    serve_points: i64,
    first_won: i64,
    second_won: i64,
}

impl ServeLine {
    /// Points-per-attempt, or `None` without serve points.
    ///
    /// Football counts double faults for the server, tennis against.
    fn ppa(&self, phase: Phase) -> Option<f64> {
        if self.serve_points == 0 {
            return None;
        }
        let df = match phase {
            Phase::Tennis => -self.double_faults,
            _ => self.double_faults,
        };
        Some((self.ace + df + self.first_won + self.second_won) as f64 / self.serve_points as f64)
    }
}

/// The fields of a match row that feed PPA
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MatchLine {
    winner_id: i64,
    loser_id: i64,
    winner: ServeLine,
    loser: ServeLine,
}

impl MatchLine {
    fn parse<'a>(fields: impl Iterator<Item = &'a str>) -> Self {
        let fields: Vec<&str> = fields.collect();
        let at = |i: usize| int_field(fields.get(i).copied());
        Self {
            winner_id: at(7),
            loser_id: at(15),
            winner: ServeLine {
                ace: at(27),
                double_faults: at(28),
                serve_points: at(29),
                first_won: at(31),
                second_won: at(32),
            },
            loser: ServeLine {
                ace: at(33),
                double_faults: at(34),
                serve_points: at(35),
                first_won: at(37),
                second_won: at(38),
            },
        }
    }
}

/// Accumulates points-per-attempt for both players of each match row
pub struct PpaHandler {
    store: Arc<PlayerStore>,
}

impl PpaHandler {
    pub fn new(store: Arc<PlayerStore>) -> Self {
        Self { store }
    }
}

impl RoleHandler for PpaHandler {
    fn apply(&mut self, phase: Phase, record: &Record) -> Result<()> {
        let line = MatchLine::parse(record.fields());
        let (Some(w), Some(l)) = (line.winner.ppa(phase), line.loser.ppa(phase)) else {
            return Ok(());
        };
        let (w_delta, l_delta) = match phase {
            Phase::Tennis => (w - l, l - w),
            _ => (w, l),
        };
        if !self.store.credit_ppa(line.winner_id, w_delta, line.loser_id, l_delta) {
            warn!(
                "Unknown player in match {} vs {} from {}",
                line.winner_id,
                line.loser_id,
                record.origin()
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        PPA_ROLE
    }
}

/// Tracks ranking points, tournaments played and the best average
pub struct RankingPointsHandler {
    store: Arc<PlayerStore>,
}

impl RankingPointsHandler {
    pub fn new(store: Arc<PlayerStore>) -> Self {
        Self { store }
    }
}

impl RoleHandler for RankingPointsHandler {
    fn apply(&mut self, _phase: Phase, record: &Record) -> Result<()> {
        let mut fields = record.fields();
        let tourney = fields.next().unwrap_or_default();
        let tourney: String = tourney.chars().take(TOURNEY_ID_LEN).collect();
        let player = int_field(fields.nth(1));
        let points = int_field(fields.next());

        if self.store.record_ranking(player, &tourney, points).is_none() {
            warn!("Unknown player {player} in {}", record.origin());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        RANKING_ROLE
    }
}
