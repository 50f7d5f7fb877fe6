//! Break-even watcher.
//!
//! Watches the favourable extreme since entry. Once it reaches the trigger
//! price the watcher fires exactly once with the new stop (entry ± 1 tick).

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Direction};

use super::bracket::BracketLevels;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakEvenWatcher {
    direction: Direction,
    trigger: f64,
    new_stop: f64,
    best_price: Option<f64>,
    fired: bool,
}

impl BreakEvenWatcher {
    pub fn new(bracket: &BracketLevels) -> Self {
        Self {
            direction: bracket.direction,
            trigger: bracket.be_trigger,
            new_stop: bracket.be_stop,
            best_price: None,
            fired: false,
        }
    }

    /// A watcher that has already fired, for restored positions whose stop
    /// was moved before the restart.
    pub fn already_fired(bracket: &BracketLevels) -> Self {
        Self { fired: true, ..Self::new(bracket) }
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn best_price(&self) -> Option<f64> {
        self.best_price
    }

    /// Update with a bar; returns the new stop the first time the trigger is reached.
    pub fn observe(&mut self, bar: &Bar) -> Option<f64> {
        let extreme = match self.direction {
            Direction::Long => bar.high,
            Direction::Short => bar.low,
        };
        self.best_price = Some(match (self.best_price, self.direction) {
            (None, _) => extreme,
            (Some(best), Direction::Long) => best.max(extreme),
            (Some(best), Direction::Short) => best.min(extreme),
        });

        if self.fired {
            return None;
        }
        let reached = match (self.best_price, self.direction) {
            (Some(best), Direction::Long) => best >= self.trigger,
            (Some(best), Direction::Short) => best <= self.trigger,
            (None, _) => false,
        };
        if reached {
            self.fired = true;
            Some(self.new_stop)
        } else {
            None
        }
    }

    pub fn new_stop(&self) -> f64 {
        self.new_stop
    }

    /// True once the best price seen has reached the trigger.
    pub fn triggered(&self) -> bool {
        match (self.best_price, self.direction) {
            (Some(best), Direction::Long) => best >= self.trigger,
            (Some(best), Direction::Short) => best <= self.trigger,
            (None, _) => false,
        }
    }
}
