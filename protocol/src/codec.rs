//! Packets understood by the drone's UDP control port.
//!
//! Every field is a single byte, so there is no endianness to worry about. Encoding is
//! infallible and does no range checks: axis values arrive here already clamped by
//! [`crate::FlightState`]. Decoding exists so captured traffic can be checked against the
//! layouts below.

/// Keep-alive, sent once per second while the link is up.
pub const HEARTBEAT: [u8; 2] = [1, 1];

const FLIGHT_COMMAND: u8 = 3;
const FLIGHT_SUBTYPE: u8 = 102;
const STANDARD_PAYLOAD_LEN: u8 = 20;
const CAMERA_SELECT: u8 = 6;
const TRAILER: u8 = 153;

pub const ADVANCED_LEN: usize = 9;
pub const STANDARD_LEN: usize = 21;

/// Which of the two flight packet layouts the drone expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceProfile {
    Standard,
    #[default]
    Advanced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CameraIndex {
    #[default]
    One = 1,
    Two = 2,
}

impl CameraIndex {
    pub fn other(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Camera switch, sent raw with no checksum.
pub fn camera_select(camera: CameraIndex) -> [u8; 2] {
    [CAMERA_SELECT, camera.number()]
}

/// Wire values of the four control axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WireAxes {
    pub roll: u8,
    pub pitch: u8,
    pub throttle: u8,
    pub yaw: u8,
}

impl WireAxes {
    fn xor(&self) -> u8 {
        self.roll ^ self.pitch ^ self.throttle ^ self.yaw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    FastFly,
    FastDrop,
    EmergencyStop,
    GyroCorrection,
    NoHeadMode,
    FastReturn,
    Unlock,
    CircleTurnEnd,
}

impl Flag {
    pub const ALL: [Flag; 8] = [
        Flag::FastFly,
        Flag::FastDrop,
        Flag::EmergencyStop,
        Flag::GyroCorrection,
        Flag::NoHeadMode,
        Flag::FastReturn,
        Flag::Unlock,
        Flag::CircleTurnEnd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Flag::FastFly => "fast_fly",
            Flag::FastDrop => "fast_drop",
            Flag::EmergencyStop => "emergency_stop",
            Flag::GyroCorrection => "gyro_correction",
            Flag::NoHeadMode => "no_head_mode",
            Flag::FastReturn => "fast_return",
            Flag::Unlock => "unlock",
            Flag::CircleTurnEnd => "circle_turn_end",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.name() == name)
    }
}

impl core::fmt::Display for Flag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Maneuver toggles packed into the flag byte(s) of a flight packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeFlags {
    pub fast_fly: bool,
    pub fast_drop: bool,
    pub emergency_stop: bool,
    pub gyro_correction: bool,
    pub no_head_mode: bool,
    pub fast_return: bool,
    pub unlock: bool,
    pub circle_turn_end: bool,
}

impl ModeFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::FastFly => self.fast_fly,
            Flag::FastDrop => self.fast_drop,
            Flag::EmergencyStop => self.emergency_stop,
            Flag::GyroCorrection => self.gyro_correction,
            Flag::NoHeadMode => self.no_head_mode,
            Flag::FastReturn => self.fast_return,
            Flag::Unlock => self.unlock,
            Flag::CircleTurnEnd => self.circle_turn_end,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        let field = match flag {
            Flag::FastFly => &mut self.fast_fly,
            Flag::FastDrop => &mut self.fast_drop,
            Flag::EmergencyStop => &mut self.emergency_stop,
            Flag::GyroCorrection => &mut self.gyro_correction,
            Flag::NoHeadMode => &mut self.no_head_mode,
            Flag::FastReturn => &mut self.fast_return,
            Flag::Unlock => &mut self.unlock,
            Flag::CircleTurnEnd => &mut self.circle_turn_end,
        };
        *field = value;
    }

    /// Flag byte of the advanced layout. Bit 6 is always clear.
    pub fn advanced_byte(&self) -> u8 {
        bit(self.fast_fly, 0)
            | bit(self.fast_drop, 1)
            | bit(self.emergency_stop, 2)
            | bit(self.circle_turn_end, 3)
            | bit(self.no_head_mode, 4)
            | bit(self.fast_return || self.unlock, 5)
            | bit(self.gyro_correction, 7)
    }

    /// Both flag bytes of the standard layout.
    pub fn standard_bytes(&self) -> (u8, u8) {
        let flags5 = bit(self.fast_fly || self.fast_drop, 0)
            | bit(self.emergency_stop, 1)
            | bit(self.gyro_correction, 2)
            | bit(self.circle_turn_end, 3);
        let flags6 = bit(self.no_head_mode, 0);
        (flags5, flags6)
    }

    /// Inverse of [`Self::advanced_byte`]. The shared bit 5 comes back as `fast_return`.
    pub fn from_advanced_byte(byte: u8) -> Self {
        Self {
            fast_fly: byte & (1 << 0) != 0,
            fast_drop: byte & (1 << 1) != 0,
            emergency_stop: byte & (1 << 2) != 0,
            circle_turn_end: byte & (1 << 3) != 0,
            no_head_mode: byte & (1 << 4) != 0,
            fast_return: byte & (1 << 5) != 0,
            unlock: false,
            gyro_correction: byte & (1 << 7) != 0,
        }
    }

    /// Inverse of [`Self::standard_bytes`]. The shared assist bit comes back as `fast_fly`.
    pub fn from_standard_bytes(flags5: u8, flags6: u8) -> Self {
        Self {
            fast_fly: flags5 & (1 << 0) != 0,
            emergency_stop: flags5 & (1 << 1) != 0,
            gyro_correction: flags5 & (1 << 2) != 0,
            circle_turn_end: flags5 & (1 << 3) != 0,
            no_head_mode: flags6 & (1 << 0) != 0,
            ..Self::default()
        }
    }
}

fn bit(set: bool, position: u8) -> u8 {
    (set as u8) << position
}

/// A flight packet ready to go on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightCommand {
    Standard([u8; STANDARD_LEN]),
    Advanced([u8; ADVANCED_LEN]),
}

impl FlightCommand {
    pub fn encode(profile: DeviceProfile, axes: WireAxes, flags: &ModeFlags) -> Self {
        match profile {
            DeviceProfile::Standard => Self::Standard(encode_standard(axes, flags)),
            DeviceProfile::Advanced => Self::Advanced(encode_advanced(axes, flags)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Standard(bytes) => bytes,
            Self::Advanced(bytes) => bytes,
        }
    }

    pub fn profile(&self) -> DeviceProfile {
        match self {
            Self::Standard(_) => DeviceProfile::Standard,
            Self::Advanced(_) => DeviceProfile::Advanced,
        }
    }
}

impl AsRef<[u8]> for FlightCommand {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

pub fn encode_advanced(axes: WireAxes, flags: &ModeFlags) -> [u8; ADVANCED_LEN] {
    let flags = flags.advanced_byte();
    let checksum = axes.xor() ^ flags;
    [
        FLIGHT_COMMAND,
        FLIGHT_SUBTYPE,
        axes.roll,
        axes.pitch,
        axes.throttle,
        axes.yaw,
        flags,
        checksum,
        TRAILER,
    ]
}

pub fn encode_standard(axes: WireAxes, flags: &ModeFlags) -> [u8; STANDARD_LEN] {
    let (flags5, flags6) = flags.standard_bytes();
    let checksum = flags5 ^ axes.xor() ^ flags6;

    let mut packet = [0; STANDARD_LEN];
    packet[..9].copy_from_slice(&[
        FLIGHT_COMMAND,
        FLIGHT_SUBTYPE,
        STANDARD_PAYLOAD_LEN,
        axes.roll,
        axes.pitch,
        axes.throttle,
        axes.yaw,
        flags5,
        flags6,
    ]);
    // bytes 9..19 stay zero
    packet[19] = checksum;
    packet[20] = TRAILER;
    packet
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    #[error("Packet is shorter than its layout")]
    Incomplete,

    #[error("Packet framing or padding is wrong")]
    Corrupted,

    #[error("Checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    Checksum { expected: u8, found: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFlight {
    pub profile: DeviceProfile,
    pub axes: WireAxes,
    pub flags: ModeFlags,
}

/// Parses either flight layout, telling them apart by length.
pub fn decode_flight(data: &[u8]) -> Result<DecodedFlight, DecodeError> {
    match data.first() {
        None => return Err(DecodeError::Incomplete),
        Some(&FLIGHT_COMMAND) => {}
        Some(_) => return Err(DecodeError::Corrupted),
    }
    if data.get(1).is_some_and(|&b| b != FLIGHT_SUBTYPE) {
        return Err(DecodeError::Corrupted);
    }

    match data.len() {
        ADVANCED_LEN => decode_advanced(data),
        STANDARD_LEN => decode_standard(data),
        len if len < STANDARD_LEN => Err(DecodeError::Incomplete),
        _ => Err(DecodeError::Corrupted),
    }
}

fn decode_advanced(data: &[u8]) -> Result<DecodedFlight, DecodeError> {
    let &[_, _, roll, pitch, throttle, yaw, flags, found, TRAILER] = data else {
        return Err(DecodeError::Corrupted);
    };
    if flags & (1 << 6) != 0 {
        return Err(DecodeError::Corrupted);
    }

    let axes = WireAxes {
        roll,
        pitch,
        throttle,
        yaw,
    };
    let expected = axes.xor() ^ flags;
    if expected != found {
        return Err(DecodeError::Checksum { expected, found });
    }

    Ok(DecodedFlight {
        profile: DeviceProfile::Advanced,
        axes,
        flags: ModeFlags::from_advanced_byte(flags),
    })
}

fn decode_standard(data: &[u8]) -> Result<DecodedFlight, DecodeError> {
    if data[2] != STANDARD_PAYLOAD_LEN || data[20] != TRAILER {
        return Err(DecodeError::Corrupted);
    }
    if data[9..19].iter().any(|&b| b != 0) {
        return Err(DecodeError::Corrupted);
    }
    let (flags5, flags6) = (data[7], data[8]);
    if flags5 & 0xf0 != 0 || flags6 & 0xfe != 0 {
        return Err(DecodeError::Corrupted);
    }

    let axes = WireAxes {
        roll: data[3],
        pitch: data[4],
        throttle: data[5],
        yaw: data[6],
    };
    let expected = flags5 ^ axes.xor() ^ flags6;
    let found = data[19];
    if expected != found {
        return Err(DecodeError::Checksum { expected, found });
    }

    Ok(DecodedFlight {
        profile: DeviceProfile::Standard,
        axes,
        flags: ModeFlags::from_standard_bytes(flags5, flags6),
    })
}

#[cfg(test)]
const NEUTRAL_AXES: WireAxes = WireAxes {
    roll: 128,
    pitch: 128,
    throttle: 128,
    yaw: 128,
};

#[test]
fn fixed_utility_packets() {
    assert_eq!(HEARTBEAT, [1, 1]);
    assert_eq!(camera_select(CameraIndex::One), [6, 1]);
    assert_eq!(camera_select(CameraIndex::Two), [6, 2]);
    assert_eq!(CameraIndex::One.other(), CameraIndex::Two);
    assert_eq!(CameraIndex::Two.other(), CameraIndex::One);
}

#[test]
fn advanced_layout() {
    let axes = WireAxes {
        roll: 10,
        pitch: 20,
        throttle: 30,
        yaw: 40,
    };
    let flags = ModeFlags {
        fast_fly: true,
        gyro_correction: true,
        ..ModeFlags::default()
    };

    let packet = encode_advanced(axes, &flags);
    let flag_byte = 0b1000_0001;
    assert_eq!(
        packet,
        [3, 102, 10, 20, 30, 40, flag_byte, 10 ^ 20 ^ 30 ^ 40 ^ flag_byte, 153]
    );
}

#[test]
fn advanced_flag_bits() {
    let cases = [
        (Flag::FastFly, 0b0000_0001),
        (Flag::FastDrop, 0b0000_0010),
        (Flag::EmergencyStop, 0b0000_0100),
        (Flag::CircleTurnEnd, 0b0000_1000),
        (Flag::NoHeadMode, 0b0001_0000),
        (Flag::FastReturn, 0b0010_0000),
        (Flag::Unlock, 0b0010_0000),
        (Flag::GyroCorrection, 0b1000_0000),
    ];
    for (flag, expected) in cases {
        let mut flags = ModeFlags::default();
        flags.set(flag, true);
        assert_eq!(flags.advanced_byte(), expected, "{flag}");
    }

    let mut all = ModeFlags::default();
    Flag::ALL.into_iter().for_each(|flag| all.set(flag, true));
    assert_eq!(all.advanced_byte(), 0b1011_1111);
}

#[test]
fn standard_layout() {
    let flags = ModeFlags {
        fast_drop: true,
        emergency_stop: true,
        no_head_mode: true,
        ..ModeFlags::default()
    };

    let packet = encode_standard(NEUTRAL_AXES, &flags);
    assert_eq!(packet.len(), 21);
    assert_eq!(&packet[..9], &[3, 102, 20, 128, 128, 128, 128, 0b11, 0b1]);
    assert_eq!(&packet[9..19], &[0; 10]);
    assert_eq!(packet[19], 0b11 ^ (128 ^ 128 ^ 128 ^ 128) ^ 0b1);
    assert_eq!(packet[20], 153);
}

#[test]
fn standard_flag_bits() {
    let cases = [
        (Flag::FastFly, (0b0001, 0)),
        (Flag::FastDrop, (0b0001, 0)),
        (Flag::EmergencyStop, (0b0010, 0)),
        (Flag::GyroCorrection, (0b0100, 0)),
        (Flag::CircleTurnEnd, (0b1000, 0)),
        (Flag::NoHeadMode, (0, 1)),
        (Flag::FastReturn, (0, 0)),
        (Flag::Unlock, (0, 0)),
    ];
    for (flag, expected) in cases {
        let mut flags = ModeFlags::default();
        flags.set(flag, true);
        assert_eq!(flags.standard_bytes(), expected, "{flag}");
    }
}

#[test]
fn advanced_decode_inverts_encode() {
    for flag_byte in (0..=255u8).filter(|b| b & (1 << 6) == 0) {
        let flags = ModeFlags::from_advanced_byte(flag_byte);
        for (roll, pitch, yaw) in [(1, 1, 1), (255, 255, 255), (1, 128, 255), (77, 200, 3)] {
            let axes = WireAxes {
                roll,
                pitch,
                throttle: 0,
                yaw,
            };
            let decoded = decode_flight(&encode_advanced(axes, &flags)).unwrap();
            assert_eq!(decoded.profile, DeviceProfile::Advanced);
            assert_eq!(decoded.axes, axes);
            assert_eq!(decoded.flags, flags);
        }
    }
}

#[test]
fn standard_decode_inverts_encode() {
    let flags = ModeFlags {
        fast_fly: true,
        gyro_correction: true,
        no_head_mode: true,
        ..ModeFlags::default()
    };
    let axes = WireAxes {
        roll: 1,
        pitch: 255,
        throttle: 0,
        yaw: 64,
    };
    let decoded = decode_flight(&encode_standard(axes, &flags)).unwrap();
    assert_eq!(decoded.profile, DeviceProfile::Standard);
    assert_eq!(decoded.axes, axes);
    assert_eq!(decoded.flags, flags);
}

#[test]
fn single_byte_corruption_is_detected() {
    let flags = ModeFlags {
        fast_drop: true,
        ..ModeFlags::default()
    };
    let advanced = encode_advanced(NEUTRAL_AXES, &flags);
    // payload bytes: roll, pitch, throttle, yaw
    for index in 2..6 {
        let mut corrupted = advanced;
        corrupted[index] ^= 0x5a;
        assert!(matches!(
            decode_flight(&corrupted),
            Err(DecodeError::Checksum { .. })
        ));
    }

    let standard = encode_standard(NEUTRAL_AXES, &flags);
    for index in 3..7 {
        let mut corrupted = standard;
        corrupted[index] ^= 0x01;
        assert!(matches!(
            decode_flight(&corrupted),
            Err(DecodeError::Checksum { .. })
        ));
    }
}

#[test]
fn malformed_packets() {
    let packet = encode_advanced(NEUTRAL_AXES, &ModeFlags::default());

    assert_eq!(decode_flight(&[]), Err(DecodeError::Incomplete));
    assert_eq!(decode_flight(&packet[..5]), Err(DecodeError::Incomplete));
    assert_eq!(decode_flight(&HEARTBEAT), Err(DecodeError::Corrupted));

    let mut trailer = packet;
    trailer[8] = 0;
    assert_eq!(decode_flight(&trailer), Err(DecodeError::Corrupted));

    let mut subtype = packet;
    subtype[1] = 101;
    assert_eq!(decode_flight(&subtype), Err(DecodeError::Corrupted));

    let mut padding = encode_standard(NEUTRAL_AXES, &ModeFlags::default());
    padding[12] = 1;
    assert_eq!(decode_flight(&padding), Err(DecodeError::Corrupted));
}

#[cfg(feature = "defmt")]
#[test]
fn wire_types_format_with_defmt() {
    fn formattable<T: defmt::Format>() {}

    formattable::<DeviceProfile>();
    formattable::<CameraIndex>();
    formattable::<WireAxes>();
    formattable::<Flag>();
    formattable::<ModeFlags>();
    formattable::<DecodeError>();
    formattable::<crate::ControlAxes>();
}
