//! Edge-triggered lamp commands.
//!
//! The adapter remembers the last state sent per lane and only emits a
//! command when the desired state differs, so the actuator sees one
//! command per real change rather than one per cycle.

use crate::occupancy::LaneId;
use lanegate_env::{ActuatorFrame, LampState};
use serde::{Deserialize, Serialize};

/// A state change for one lane's lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCommand {
    pub lane: LaneId,
    pub state: LampState,
}

impl LaneCommand {
    /// Address the command to the lane's actuator channel.
    pub fn to_frame(&self, lane_channels: &[u8]) -> Option<ActuatorFrame> {
        lane_channels
            .get(self.lane)
            .map(|&channel| ActuatorFrame::new(channel, self.state))
    }
}

/// Whether the actuator link can currently accept commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Last-sent bookkeeping for every configured lane.
#[derive(Debug, Clone)]
pub struct DispatchAdapter {
    /// `None` = nothing sent yet
    last_sent: Vec<Option<LampState>>,
    link: LinkState,
}

impl DispatchAdapter {
    pub fn new(lane_count: usize) -> Self {
        Self {
            last_sent: vec![None; lane_count],
            link: LinkState::Up,
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn set_link(&mut self, link: LinkState) {
        self.link = link;
    }

    pub fn last_sent(&self, lane: LaneId) -> Option<LampState> {
        self.last_sent.get(lane).copied().flatten()
    }

    /// Commands needed to bring every lane to its desired state.
    ///
    /// A lane is ON only if it is active and has vehicles waiting. With the
    /// link down this is a no-op and nothing is recorded as sent.
    pub fn dispatch(&mut self, active: LaneId, counts: &[usize]) -> Vec<LaneCommand> {
        if self.link == LinkState::Down {
            return Vec::new();
        }

        let mut commands = Vec::new();
        for (lane, last) in self.last_sent.iter_mut().enumerate() {
            let occupied = counts.get(lane).copied().unwrap_or(0) > 0;
            let want = if lane == active && occupied {
                LampState::On
            } else {
                LampState::Off
            };
            if *last != Some(want) {
                *last = Some(want);
                commands.push(LaneCommand { lane, state: want });
            }
        }
        commands
    }

    /// Forget what was sent for `lane` so the next cycle re-emits it.
    pub fn invalidate(&mut self, lane: LaneId) {
        if let Some(last) = self.last_sent.get_mut(lane) {
            *last = None;
        }
    }

    /// Forget everything; used after the link comes back up.
    pub fn invalidate_all(&mut self) {
        self.last_sent.iter_mut().for_each(|last| *last = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(lane: LaneId, state: LampState) -> LaneCommand {
        LaneCommand { lane, state }
    }

    #[test]
    fn test_first_dispatch_sends_every_lane() {
        let mut d = DispatchAdapter::new(3);
        let cmds = d.dispatch(1, &[0, 2, 0]);
        assert_eq!(
            cmds,
            vec![cmd(0, LampState::Off), cmd(1, LampState::On), cmd(2, LampState::Off)]
        );
    }

    #[test]
    fn test_switch_emits_exactly_one_on_and_one_off() {
        let mut d = DispatchAdapter::new(4);
        d.dispatch(0, &[1, 2, 0, 0]);

        let cmds = d.dispatch(1, &[1, 2, 0, 0]);
        assert_eq!(cmds, vec![cmd(0, LampState::Off), cmd(1, LampState::On)]);

        // Steady state: nothing
        assert!(d.dispatch(1, &[1, 2, 0, 0]).is_empty());
        assert!(d.dispatch(1, &[3, 5, 1, 0]).is_empty());
    }

    #[test]
    fn test_active_lane_empties_turns_off() {
        let mut d = DispatchAdapter::new(2);
        d.dispatch(0, &[1, 0]);
        assert_eq!(d.dispatch(0, &[0, 0]), vec![cmd(0, LampState::Off)]);
    }

    #[test]
    fn test_link_down_is_noop_and_preserves_state() {
        let mut d = DispatchAdapter::new(2);
        d.dispatch(0, &[1, 0]);
        d.set_link(LinkState::Down);
        assert!(d.dispatch(1, &[0, 4]).is_empty());
        assert_eq!(d.last_sent(0), Some(LampState::On));

        d.set_link(LinkState::Up);
        assert_eq!(
            d.dispatch(1, &[0, 4]),
            vec![cmd(0, LampState::Off), cmd(1, LampState::On)]
        );
    }

    #[test]
    fn test_invalidate_re_emits() {
        let mut d = DispatchAdapter::new(2);
        d.dispatch(0, &[1, 0]);
        d.invalidate(1);
        assert_eq!(d.dispatch(0, &[1, 0]), vec![cmd(1, LampState::Off)]);

        d.invalidate_all();
        assert_eq!(d.dispatch(0, &[1, 0]).len(), 2);
    }

    #[test]
    fn test_command_to_frame_uses_channel_map() {
        let frame = cmd(2, LampState::On).to_frame(&[3, 1, 2, 4]).unwrap();
        assert_eq!(frame, ActuatorFrame::new(2, LampState::On));
        assert!(cmd(9, LampState::On).to_frame(&[3, 1]).is_none());
    }
}
