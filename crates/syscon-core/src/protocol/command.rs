//! Command identifiers carried in the frame type field.

use std::fmt;

use super::constants::*;

/// Known frame types.
///
/// The wire keeps the raw `u16` so unknown types still decode; this enum is
/// for the commands the host issues and for readable logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    DataFrame = DATA_FRAME,
    ContData = CONT_DATA,
    ModeChange = MODE_CHANGE,
    Version = VERSION,
    Ack = ACK,
    Erase = ERASE,
    Validate = VALIDATE,
    DfuPacket = DFU_PACKET,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::DataFrame,
        Command::ContData,
        Command::ModeChange,
        Command::Version,
        Command::Ack,
        Command::Erase,
        Command::Validate,
        Command::DfuPacket,
    ];

    /// Raw type field value.
    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::DataFrame => "DATA_FRAME",
            Command::ContData => "CONT_DATA",
            Command::ModeChange => "MODE_CHANGE",
            Command::Version => "VERSION",
            Command::Ack => "ACK",
            Command::Erase => "ERASE",
            Command::Validate => "VALIDATE",
            Command::DfuPacket => "DFU_PACKET",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Two-character mnemonic of a type field, `'.'` for non-printable bytes.
pub fn mnemonic(frame_type: u16) -> String {
    frame_type
        .to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

/// Human-readable label for any type field value.
pub fn describe_type(frame_type: u16) -> String {
    match Command::from_u16(frame_type) {
        Some(cmd) => format!("{} '{}'", cmd, mnemonic(frame_type)),
        None => format!("0x{:04X} '{}'", frame_type, mnemonic(frame_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics() {
        assert_eq!(mnemonic(VERSION), "rv");
        assert_eq!(mnemonic(ERASE), "xx");
        assert_eq!(mnemonic(DFU_PACKET), "fu");
        assert_eq!(mnemonic(0x0001), "..");
    }

    #[test]
    fn test_from_u16() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_u16(cmd.id()), Some(cmd));
        }
        assert_eq!(Command::from_u16(0x0000), None);
    }

    #[test]
    fn test_describe_unknown() {
        assert_eq!(describe_type(0x4142), "0x4142 'AB'");
        assert_eq!(describe_type(ACK), "ACK 'ka'");
    }
}
