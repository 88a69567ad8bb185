use serde::{Deserialize, Serialize};

// Session flag bits as published in the `SessionFlags` bitfield.
pub const FLAG_CHECKERED: u32 = 0x0000_0001;
pub const FLAG_WHITE: u32 = 0x0000_0002;
pub const FLAG_GREEN: u32 = 0x0000_0004;
pub const FLAG_YELLOW: u32 = 0x0000_0008;
pub const FLAG_RED: u32 = 0x0000_0010;
pub const FLAG_BLUE: u32 = 0x0000_0020;
pub const FLAG_DEBRIS: u32 = 0x0000_0040;
pub const FLAG_CROSSED: u32 = 0x0000_0080;
pub const FLAG_YELLOW_WAVING: u32 = 0x0000_0100;
pub const FLAG_ONE_LAP_TO_GREEN: u32 = 0x0000_0200;
pub const FLAG_BLACK: u32 = 0x0001_0000;

/// Most important first. The first bit present in a mask wins.
const DECODE_PRIORITY: [(u32, FlagStatus); 11] = [
    (FLAG_CHECKERED, FlagStatus::Checkered),
    (FLAG_RED, FlagStatus::Red),
    (FLAG_BLACK, FlagStatus::Black),
    (FLAG_WHITE, FlagStatus::White),
    (FLAG_YELLOW_WAVING, FlagStatus::YellowWaving),
    (FLAG_YELLOW, FlagStatus::Yellow),
    (FLAG_ONE_LAP_TO_GREEN, FlagStatus::OneLapToGreen),
    (FLAG_BLUE, FlagStatus::Blue),
    (FLAG_DEBRIS, FlagStatus::Debris),
    (FLAG_CROSSED, FlagStatus::Crossed),
    (FLAG_GREEN, FlagStatus::Green),
];

/// The single flag shown for a session at a given instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlagStatus {
    #[default]
    None,
    Green,
    Yellow,
    YellowWaving,
    Blue,
    White,
    Checkered,
    Red,
    Black,
    Debris,
    Crossed,
    OneLapToGreen,
}

impl FlagStatus {
    /// Collapse a `SessionFlags` mask into the most important flag it carries.
    /// Bits outside the known set are ignored.
    pub fn from_session_flags(mask: u32) -> Self {
        DECODE_PRIORITY
            .iter()
            .find(|(bit, _)| mask & bit != 0)
            .map(|(_, flag)| *flag)
            .unwrap_or(FlagStatus::None)
    }

    pub fn is_none(&self) -> bool {
        *self == FlagStatus::None
    }

    /// The mask bit for this flag, `0` for `None`.
    pub fn mask_bit(&self) -> u32 {
        DECODE_PRIORITY
            .iter()
            .find(|(_, flag)| flag == self)
            .map(|(bit, _)| *bit)
            .unwrap_or(0)
    }
}

impl std::fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_decode(mask: u32) -> FlagStatus {
        if mask & FLAG_CHECKERED != 0 {
            FlagStatus::Checkered
        } else if mask & FLAG_RED != 0 {
            FlagStatus::Red
        } else if mask & FLAG_BLACK != 0 {
            FlagStatus::Black
        } else if mask & FLAG_WHITE != 0 {
            FlagStatus::White
        } else if mask & FLAG_YELLOW_WAVING != 0 {
            FlagStatus::YellowWaving
        } else if mask & FLAG_YELLOW != 0 {
            FlagStatus::Yellow
        } else if mask & FLAG_ONE_LAP_TO_GREEN != 0 {
            FlagStatus::OneLapToGreen
        } else if mask & FLAG_BLUE != 0 {
            FlagStatus::Blue
        } else if mask & FLAG_DEBRIS != 0 {
            FlagStatus::Debris
        } else if mask & FLAG_CROSSED != 0 {
            FlagStatus::Crossed
        } else if mask & FLAG_GREEN != 0 {
            FlagStatus::Green
        } else {
            FlagStatus::None
        }
    }

    #[test]
    fn test_single_bits() {
        assert_eq!(FlagStatus::from_session_flags(0), FlagStatus::None);
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_GREEN),
            FlagStatus::Green
        );
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_ONE_LAP_TO_GREEN),
            FlagStatus::OneLapToGreen
        );
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_BLACK),
            FlagStatus::Black
        );
    }

    #[test]
    fn test_priority_wins_over_lesser_flags() {
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_GREEN | FLAG_YELLOW),
            FlagStatus::Yellow
        );
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_YELLOW | FLAG_YELLOW_WAVING),
            FlagStatus::YellowWaving
        );
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_CHECKERED | FLAG_RED | FLAG_BLACK),
            FlagStatus::Checkered
        );
        assert_eq!(
            FlagStatus::from_session_flags(FLAG_BLUE | FLAG_ONE_LAP_TO_GREEN),
            FlagStatus::OneLapToGreen
        );
    }

    #[test]
    fn test_unknown_bits_are_ignored() {
        // caution, start lights and repair bits
        assert_eq!(
            FlagStatus::from_session_flags(0x4000 | 0x8000_0000 | 0x0010_0000),
            FlagStatus::None
        );
    }

    #[test]
    fn test_mask_bit_round_trips_every_flag() {
        for (bit, flag) in DECODE_PRIORITY {
            assert_eq!(flag.mask_bit(), bit);
            assert_eq!(FlagStatus::from_session_flags(flag.mask_bit()), flag);
        }
        assert_eq!(FlagStatus::None.mask_bit(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        #[test]
        fn prop_decode_matches_priority_table(mask in any::<u32>()) {
            prop_assert_eq!(FlagStatus::from_session_flags(mask), reference_decode(mask));
        }

        #[test]
        fn prop_higher_flag_masks_everything_below(mask in any::<u32>(), idx in 0usize..DECODE_PRIORITY.len()) {
            let (bit, flag) = DECODE_PRIORITY[idx];
            let higher: u32 = DECODE_PRIORITY[..idx].iter().map(|(b, _)| *b).fold(0, |a, b| a | b);
            let masked = (mask & !higher) | bit;
            prop_assert_eq!(FlagStatus::from_session_flags(masked), flag);
        }
    }
}
