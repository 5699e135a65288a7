use crate::types::*;
use std::collections::HashMap;

/// Per-player score changes produced by one resolution
pub type ScoreDeltas = HashMap<PlayerId, i32>;

/// Who accused whom, as seen at resolution time
#[derive(Debug, Clone, Copy)]
pub struct Accusation<'a> {
    pub guesser_id: &'a str,
    pub guesser_role: Role,
    pub players: &'a [Player],
}

impl<'a> Accusation<'a> {
    /// Players sharing the guesser's role. Tone-deaf players have no team.
    pub fn teammates(&self) -> impl Iterator<Item = &'a Player> + '_ {
        let role = self.guesser_role;
        let guesser = self.guesser_id;
        self.players
            .iter()
            .filter(move |p| p.id != guesser && role != Role::ToneDeaf && p.role == role)
    }

    /// Players holding any other role than the guesser
    pub fn opponents(&self) -> impl Iterator<Item = &'a Player> + '_ {
        let role = self.guesser_role;
        let guesser = self.guesser_id;
        self.players
            .iter()
            .filter(move |p| p.id != guesser && p.role != role)
    }
}

/// Point values for every outcome of an accusation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payouts {
    pub baseline: i32,
    pub guess_cost: Option<i32>,
    pub correct_guesser: i32,
    pub correct_teammate: i32,
    pub wrong_guesser: i32,
    pub wrong_opponent: i32,
    pub wrong_teammate: i32,
    pub outsider_steal: i32,
    pub caught_guesser: i32,
    pub caught_teammate: i32,
    pub caught_outsider: i32,
}

/// Turns accusation outcomes into score changes.
///
/// Implementations only supply their [`Payouts`]; who counts as a teammate or
/// opponent is the same for every scheme.
pub trait ScoringPolicy: Send + Sync {
    fn payouts(&self) -> &Payouts;

    fn baseline(&self) -> i32 {
        self.payouts().baseline
    }

    /// Points a player needs to start an accusation outside shootout.
    /// `None` disables both the cost and shootout.
    fn guess_cost(&self) -> Option<i32> {
        self.payouts().guess_cost
    }

    /// Every role named correctly and no outsider caught
    fn correct(&self, acc: &Accusation) -> ScoreDeltas {
        let pay = self.payouts();
        let mut deltas = ScoreDeltas::new();
        add(&mut deltas, acc.guesser_id, pay.correct_guesser);
        for p in acc.teammates() {
            add(&mut deltas, &p.id, pay.correct_teammate);
        }
        deltas
    }

    /// At least one role wrong. The guesser's penalty is waived in shootout.
    fn wrong(&self, acc: &Accusation, shootout: bool) -> ScoreDeltas {
        let pay = self.payouts();
        let mut deltas = ScoreDeltas::new();
        if !shootout {
            add(&mut deltas, acc.guesser_id, pay.wrong_guesser);
        }
        for p in acc.opponents() {
            add(&mut deltas, &p.id, pay.wrong_opponent);
        }
        for p in acc.teammates() {
            add(&mut deltas, &p.id, pay.wrong_teammate);
        }
        deltas
    }

    /// The caught outsider named the topic and takes the round
    fn outsider_steal(&self, _acc: &Accusation, outsider: &str) -> ScoreDeltas {
        let mut deltas = ScoreDeltas::new();
        add(&mut deltas, outsider, self.payouts().outsider_steal);
        deltas
    }

    /// The caught outsider missed the topic; the accuser wins after all
    fn outsider_caught(&self, acc: &Accusation, outsider: &str) -> ScoreDeltas {
        let pay = self.payouts();
        let mut deltas = ScoreDeltas::new();
        add(&mut deltas, acc.guesser_id, pay.caught_guesser);
        for p in acc.teammates() {
            add(&mut deltas, &p.id, pay.caught_teammate);
        }
        add(&mut deltas, outsider, pay.caught_outsider);
        deltas
    }
}

fn add(deltas: &mut ScoreDeltas, id: &str, points: i32) {
    if points != 0 {
        *deltas.entry(id.to_string()).or_insert(0) += points;
    }
}

/// Small-number scheme with a guess cost, shootout and outsider gambit
#[derive(Debug, Clone, Copy, Default)]
pub struct PointsScoring;

/// Flat scheme used by the simpler rounds variant
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedScoring;

const POINTS_PAYOUTS: Payouts = Payouts {
    baseline: 10,
    guess_cost: Some(3),
    correct_guesser: 5,
    correct_teammate: 1,
    wrong_guesser: -3,
    wrong_opponent: 1,
    wrong_teammate: -1,
    outsider_steal: 8,
    caught_guesser: 3,
    caught_teammate: 1,
    caught_outsider: -3,
};

const FIXED_PAYOUTS: Payouts = Payouts {
    baseline: 0,
    guess_cost: None,
    correct_guesser: 200,
    correct_teammate: 100,
    wrong_guesser: -100,
    wrong_opponent: 50,
    wrong_teammate: 0,
    outsider_steal: 300,
    caught_guesser: 100,
    caught_teammate: 50,
    caught_outsider: -100,
};

impl ScoringPolicy for PointsScoring {
    fn payouts(&self) -> &Payouts {
        &POINTS_PAYOUTS
    }
}

impl ScoringPolicy for FixedScoring {
    fn payouts(&self) -> &Payouts {
        &FIXED_PAYOUTS
    }
}

impl ScoringScheme {
    pub fn policy(&self) -> &'static dyn ScoringPolicy {
        match self {
            ScoringScheme::Points => &PointsScoring,
            ScoringScheme::Fixed => &FixedScoring,
        }
    }
}

impl super::GameState {
    /// Add deltas to the score table
    pub(crate) fn apply_deltas(&mut self, deltas: &ScoreDeltas) {
        for (id, delta) in deltas {
            *self.scores.entry(id.clone()).or_insert(0) += delta;
        }
    }
}
