use crate::codec::{DeviceProfile, Flag, FlightCommand, ModeFlags, WireAxes};

pub const NEUTRAL: i32 = 128;

/// Stick positions as the controller produced them, before any wire rules are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlAxes {
    pub roll: i32,
    pub pitch: i32,
    pub throttle: i32,
    pub yaw: i32,
}

impl ControlAxes {
    pub const NEUTRAL: Self = Self {
        roll: NEUTRAL,
        pitch: NEUTRAL,
        throttle: NEUTRAL,
        yaw: NEUTRAL,
    };

    /// Roll, pitch and yaw are clamped to 1..=255. Throttle is only remapped from 1 to 0 and
    /// otherwise keeps its low byte, which is what the drone has always been sent.
    pub fn to_wire(self) -> WireAxes {
        let throttle = if self.throttle == 1 { 0 } else { self.throttle };
        WireAxes {
            roll: self.roll.clamp(1, 255) as u8,
            pitch: self.pitch.clamp(1, 255) as u8,
            throttle: throttle as u8,
            yaw: self.yaw.clamp(1, 255) as u8,
        }
    }
}

impl Default for ControlAxes {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Everything that goes into a flight packet. Flags only reach the wire through
/// [`FlightState::build_command`], so it has to be called again after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlightState {
    axes: ControlAxes,
    flags: ModeFlags,
    profile: DeviceProfile,
}

impl FlightState {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            axes: ControlAxes::NEUTRAL,
            flags: ModeFlags::default(),
            profile,
        }
    }

    pub fn axes(&self) -> ControlAxes {
        self.axes
    }

    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    pub fn set_axes(&mut self, axes: ControlAxes) {
        self.axes = axes;
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.flags.set(flag, value);
    }

    /// Centers every axis and drops the maneuver flags. Used for hover.
    pub fn set_neutral(&mut self) {
        self.axes = ControlAxes::NEUTRAL;
        self.flags.emergency_stop = false;
        self.flags.fast_fly = false;
        self.flags.fast_drop = false;
    }

    pub fn build_command(&self) -> FlightCommand {
        FlightCommand::encode(self.profile, self.axes.to_wire(), &self.flags)
    }
}

#[cfg(test)]
use crate::codec::decode_flight;

#[test]
fn roll_pitch_yaw_are_clamped() {
    let low = ControlAxes {
        roll: 0,
        pitch: -40,
        throttle: 128,
        yaw: 0,
    };
    let high = ControlAxes {
        roll: 256,
        pitch: 1000,
        throttle: 128,
        yaw: 300,
    };

    let low = low.to_wire();
    assert_eq!((low.roll, low.pitch, low.yaw), (1, 1, 1));
    let high = high.to_wire();
    assert_eq!((high.roll, high.pitch, high.yaw), (255, 255, 255));
}

#[test]
fn throttle_one_becomes_zero() {
    let wire = |throttle| {
        ControlAxes {
            throttle,
            ..ControlAxes::NEUTRAL
        }
        .to_wire()
        .throttle
    };

    assert_eq!(wire(1), 0);
    assert_eq!(wire(0), 0);
    for throttle in 2..=255 {
        assert_eq!(wire(throttle), throttle as u8);
    }
}

#[test]
fn clamping_happens_before_checksum() {
    let mut state = FlightState::new(DeviceProfile::Advanced);
    state.set_axes(ControlAxes {
        roll: 0,
        pitch: 256,
        throttle: 1,
        yaw: 128,
    });

    let command = state.build_command();
    let bytes = command.as_bytes();
    assert_eq!(&bytes[2..6], &[1, 255, 0, 128]);
    assert_eq!(bytes[7], 1 ^ 255 ^ 0 ^ 128);
    assert!(decode_flight(bytes).is_ok());
}

#[test]
fn neutral_clears_maneuvers_only() {
    let mut state = FlightState::new(DeviceProfile::Standard);
    state.set_axes(ControlAxes {
        roll: 10,
        pitch: 20,
        throttle: 30,
        yaw: 40,
    });
    state.set_flag(Flag::FastFly, true);
    state.set_flag(Flag::FastDrop, true);
    state.set_flag(Flag::EmergencyStop, true);
    state.set_flag(Flag::NoHeadMode, true);

    state.set_neutral();

    assert_eq!(state.axes(), ControlAxes::NEUTRAL);
    let flags = state.flags();
    assert!(!flags.fast_fly && !flags.fast_drop && !flags.emergency_stop);
    assert!(flags.no_head_mode);
}

#[test]
fn command_follows_profile() {
    let mut state = FlightState::new(DeviceProfile::Standard);
    assert_eq!(state.build_command().as_bytes().len(), 21);
    assert_eq!(state.build_command().profile(), DeviceProfile::Standard);

    state = FlightState::new(DeviceProfile::Advanced);
    state.set_flag(Flag::FastFly, true);
    let command = state.build_command();
    assert_eq!(command.as_bytes().len(), 9);
    assert_eq!(command.as_bytes()[6], 0b1);
}
