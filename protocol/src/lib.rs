//! Wire format of the drone's UDP control protocol.
//!
//! The crate is `no_std` so the same encoder can run on a microcontroller. The host crates in
//! this workspace never turn on the `defmt` feature. It derives `defmt::Format` on the wire types
//! for firmware that logs them over RTT.

#![no_std]

pub mod codec;
pub mod state;

pub use codec::{
    ADVANCED_LEN, CameraIndex, DecodeError, DecodedFlight, DeviceProfile, Flag, FlightCommand,
    HEARTBEAT, ModeFlags, STANDARD_LEN, WireAxes, camera_select, decode_flight,
};
pub use state::{ControlAxes, FlightState, NEUTRAL};
