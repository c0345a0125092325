use serde::{Deserialize, Serialize};

/// The simulation clock: current time, the current and previous step sizes,
/// and the step counter. Time derivative schemes read the step sizes from
/// here.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeState {
    pub value: f64,
    pub delta_t: f64,
    pub delta_t0: f64,
    pub index: usize,
}

impl TimeState {
    pub fn new(start: f64, delta_t: f64) -> Self {
        Self {
            value: start,
            delta_t,
            delta_t0: delta_t,
            index: 0,
        }
    }

    /// Advance the clock by `delta_t`, remembering the previous step size.
    ///
    pub fn advance(&mut self, delta_t: f64) {
        self.delta_t0 = self.delta_t;
        self.delta_t = delta_t;
        self.value += delta_t;
        self.index += 1;
    }

    /// The directory name of the current time in a case.
    pub fn name(&self) -> String {
        format!("{}", self.value)
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn advancing_shifts_the_step_sizes() {
        let mut time = TimeState::new(0.0, 0.1);
        time.advance(0.2);
        assert_eq!(time.delta_t, 0.2);
        assert_eq!(time.delta_t0, 0.1);
        assert_eq!(time.index, 1);
        assert!((time.value - 0.2).abs() < 1e-15);
    }
}
