use crate::error::TrainError;

/// Number of values in an [`Observation`] vector
pub const OBSERVATION_LEN: usize = 13;

/// Anything that maps an observation vector to output activations
pub trait Policy {
    fn activate(&mut self, inputs: &[f64]) -> Vec<f64>;
}

/// What caused a decision to be requested
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// The current phase is about to run out
    Timeout,
    /// A vehicle reached an induction loop
    Inductor,
}

/// Snapshot of one intersection handed to its policy
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    /// Vehicles served since the last decision
    pub num_cars: u32,
    /// Mean of the positive detector speed samples
    pub av_speed: f64,
    /// Steps since the last arrival on each approach, in N, S, E, W order
    pub dets_time: [f64; 4],
    /// Expected outbound flow of the current phase, in N, S, E, W order
    pub car_flow: [u32; 4],
    pub yellow_phase: bool,
    pub source: Option<TriggerSource>,
}

impl Observation {
    pub fn to_vec(&self) -> [f64; OBSERVATION_LEN] {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let [dn, ds, de, dw] = self.dets_time;
        let [fn_, fs, fe, fw] = self.car_flow.map(f64::from);
        [
            self.num_cars as f64,
            self.av_speed,
            dn,
            ds,
            de,
            dw,
            fn_,
            fs,
            fe,
            fw,
            flag(self.yellow_phase),
            flag(self.source == Some(TriggerSource::Timeout)),
            flag(self.source == Some(TriggerSource::Inductor)),
        ]
    }
}

/// Signal update requested by a policy
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    /// 0 keeps the current phase, 1 moves to the next one
    pub phase_advance: u32,
    /// New phase duration in seconds, within `[1.5, 100.0]`
    pub duration: f64,
}

impl Decision {
    pub const MIN_DURATION: f64 = 1.5;
    pub const MAX_DURATION: f64 = 100.0;

    /// Maps two activations in `[0, 1]` to a decision. The phase output is
    /// rounded half to even.
    pub fn from_outputs(change: f64, duration: f64) -> Self {
        Self {
            phase_advance: change.round_ties_even() as u32,
            duration: duration * (Self::MAX_DURATION - Self::MIN_DURATION) + Self::MIN_DURATION,
        }
    }
}

/// Binds one policy to one intersection for the length of a scoring round
pub struct DecisionPolicyAdapter {
    policy: Box<dyn Policy>,
}

impl DecisionPolicyAdapter {
    pub fn new(policy: Box<dyn Policy>) -> Self {
        Self { policy }
    }

    pub fn decide(&mut self, observation: &Observation) -> Result<Decision, TrainError> {
        let outputs = self.policy.activate(&observation.to_vec());
        let [change, duration] = match outputs.as_slice() {
            [change, duration, ..] => [*change, *duration],
            _ => {
                return Err(TrainError::PolicyOutput(format!(
                    "expected 2 outputs, got {}",
                    outputs.len()
                )));
            }
        };
        for x in [change, duration] {
            if !x.is_finite() || !(0.0..=1.0).contains(&x) {
                return Err(TrainError::PolicyOutput(format!(
                    "output {} outside [0, 1]",
                    x
                )));
            }
        }
        Ok(Decision::from_outputs(change, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_order() {
        let obs = Observation {
            num_cars: 3,
            av_speed: 8.5,
            dets_time: [1.0, 2.0, 3.0, 4.0],
            car_flow: [0, 0, 4, 4],
            yellow_phase: true,
            source: Some(TriggerSource::Timeout),
        };
        assert_eq!(
            obs.to_vec(),
            [3.0, 8.5, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 4.0, 4.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn trigger_flags() {
        let flags = |source| {
            let v = Observation {
                source,
                ..Default::default()
            }
            .to_vec();
            [v[11], v[12]]
        };
        assert_eq!(flags(Some(TriggerSource::Timeout)), [1.0, 0.0]);
        assert_eq!(flags(Some(TriggerSource::Inductor)), [0.0, 1.0]);
        assert_eq!(flags(None), [0.0, 0.0]);
    }
}
