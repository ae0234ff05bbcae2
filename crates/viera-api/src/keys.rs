// Remote-control key table
//
// Logical key names map to the IRCC codes the television accepts in
// `X_SendKey`. The table is closed and matched exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::Error;

/// A remote-control button.
///
/// Parses from and displays as its snake_case name (`volume_up`,
/// `hdmi2`, `num7`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Key {
    // ── Power / sources ──
    Power,
    Tv,
    InputKey,
    Hdmi1,
    Hdmi2,
    Hdmi3,
    Hdmi4,
    Apps,
    Home,
    // ── Volume / channel ──
    VolumeUp,
    VolumeDown,
    Mute,
    ChUp,
    ChDown,
    LastView,
    // ── Navigation ──
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
    Exit,
    Menu,
    Option,
    Info,
    Guide,
    Epg,
    Text,
    Subtitles,
    Aspect,
    // ── Colour keys ──
    Red,
    Green,
    Yellow,
    Blue,
    // ── Playback ──
    Play,
    Pause,
    Stop,
    Record,
    Rewind,
    FastForward,
    SkipNext,
    SkipPrev,
    ThirtySecondSkip,
    // ── Digits ──
    Num0,
    Num1,
    Num2,
    Num3,
    Num4,
    Num5,
    Num6,
    Num7,
    Num8,
    Num9,
}

impl Key {
    /// IRCC code sent in `<X_KeyEvent>`.
    pub fn code(self) -> &'static str {
        match self {
            Self::Power => "NRC_POWER-ONOFF",
            Self::Tv => "NRC_TV-ONOFF",
            Self::InputKey => "NRC_CHG_INPUT-ONOFF",
            Self::Hdmi1 => "NRC_HDMI1-ONOFF",
            Self::Hdmi2 => "NRC_HDMI2-ONOFF",
            Self::Hdmi3 => "NRC_HDMI3-ONOFF",
            Self::Hdmi4 => "NRC_HDMI4-ONOFF",
            Self::Apps => "NRC_APPS-ONOFF",
            Self::Home => "NRC_HOME-ONOFF",
            Self::VolumeUp => "NRC_VOLUP-ONOFF",
            Self::VolumeDown => "NRC_VOLDOWN-ONOFF",
            Self::Mute => "NRC_MUTE-ONOFF",
            Self::ChUp => "NRC_CH_UP-ONOFF",
            Self::ChDown => "NRC_CH_DOWN-ONOFF",
            Self::LastView => "NRC_R_TUNE-ONOFF",
            Self::Up => "NRC_UP-ONOFF",
            Self::Down => "NRC_DOWN-ONOFF",
            Self::Left => "NRC_LEFT-ONOFF",
            Self::Right => "NRC_RIGHT-ONOFF",
            Self::Enter => "NRC_ENTER-ONOFF",
            Self::Back => "NRC_RETURN-ONOFF",
            Self::Exit => "NRC_CANCEL-ONOFF",
            Self::Menu => "NRC_MENU-ONOFF",
            Self::Option => "NRC_SUBMENU-ONOFF",
            Self::Info => "NRC_INFO-ONOFF",
            Self::Guide => "NRC_GUIDE-ONOFF",
            Self::Epg => "NRC_EPG-ONOFF",
            Self::Text => "NRC_TEXT-ONOFF",
            Self::Subtitles => "NRC_STTL-ONOFF",
            Self::Aspect => "NRC_ASPECT-ONOFF",
            Self::Red => "NRC_RED-ONOFF",
            Self::Green => "NRC_GREEN-ONOFF",
            Self::Yellow => "NRC_YELLOW-ONOFF",
            Self::Blue => "NRC_BLUE-ONOFF",
            Self::Play => "NRC_PLAY-ONOFF",
            Self::Pause => "NRC_PAUSE-ONOFF",
            Self::Stop => "NRC_STOP-ONOFF",
            Self::Record => "NRC_REC-ONOFF",
            Self::Rewind => "NRC_REW-ONOFF",
            Self::FastForward => "NRC_FF-ONOFF",
            Self::SkipNext => "NRC_SKIP_NEXT-ONOFF",
            Self::SkipPrev => "NRC_SKIP_PREV-ONOFF",
            Self::ThirtySecondSkip => "NRC_30S_SKIP-ONOFF",
            Self::Num0 => "NRC_D0-ONOFF",
            Self::Num1 => "NRC_D1-ONOFF",
            Self::Num2 => "NRC_D2-ONOFF",
            Self::Num3 => "NRC_D3-ONOFF",
            Self::Num4 => "NRC_D4-ONOFF",
            Self::Num5 => "NRC_D5-ONOFF",
            Self::Num6 => "NRC_D6-ONOFF",
            Self::Num7 => "NRC_D7-ONOFF",
            Self::Num8 => "NRC_D8-ONOFF",
            Self::Num9 => "NRC_D9-ONOFF",
        }
    }

    /// Key selecting HDMI input `input` (1-4).
    pub fn hdmi(input: u8) -> Result<Self, Error> {
        match input {
            1 => Ok(Self::Hdmi1),
            2 => Ok(Self::Hdmi2),
            3 => Ok(Self::Hdmi3),
            4 => Ok(Self::Hdmi4),
            other => Err(Error::InvalidArgument(format!(
                "HDMI input must be 1-4, got {other}"
            ))),
        }
    }

    /// Digit key for `digit` (0-9).
    pub fn digit(digit: u8) -> Result<Self, Error> {
        match digit {
            0 => Ok(Self::Num0),
            1 => Ok(Self::Num1),
            2 => Ok(Self::Num2),
            3 => Ok(Self::Num3),
            4 => Ok(Self::Num4),
            5 => Ok(Self::Num5),
            6 => Ok(Self::Num6),
            7 => Ok(Self::Num7),
            8 => Ok(Self::Num8),
            9 => Ok(Self::Num9),
            other => Err(Error::InvalidArgument(format!(
                "digit must be 0-9, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn parses_snake_case_names() {
        assert_eq!(Key::from_str("volume_up").unwrap(), Key::VolumeUp);
        assert_eq!(Key::from_str("hdmi2").unwrap(), Key::Hdmi2);
        assert_eq!(Key::from_str("num7").unwrap(), Key::Num7);
        assert!(Key::from_str("self_destruct").is_err());
        assert_eq!(Key::FastForward.to_string(), "fast_forward");
    }

    #[test]
    fn every_code_follows_ircc_shape() {
        for key in Key::iter() {
            let code = key.code();
            assert!(code.starts_with("NRC_"), "{key}: {code}");
            assert!(code.ends_with("-ONOFF"), "{key}: {code}");
        }
    }

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<_> = Key::iter().map(Key::code).collect();
        assert_eq!(codes.len(), Key::iter().count());
    }

    #[test]
    fn hdmi_and_digit_lookups() {
        assert_eq!(Key::hdmi(3).unwrap().code(), "NRC_HDMI3-ONOFF");
        assert!(matches!(Key::hdmi(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(Key::hdmi(5), Err(Error::InvalidArgument(_))));
        assert_eq!(Key::digit(0).unwrap().code(), "NRC_D0-ONOFF");
        assert!(Key::digit(10).is_err());
    }
}
