//! The shared keyboard: a fixed-length, ordered row of coloured keys.
//!
//! A [`KeyboardState`] is always replaced as a whole.  There is no API for
//! changing a single key, because the control-lock holder submits the entire
//! row at once and every observer receives the entire row back.  That keeps
//! the consistency story simple: two snapshots are either equal or one of them
//! is newer, never a partial merge of both.
//!
//! # Validation
//!
//! Browsers send colours as plain strings (`"red"`, `"white"`, …).  They are
//! only turned into a [`KeyboardState`] through
//! [`KeyboardState::from_color_names`], which checks both the length and that
//! every value belongs to the closed [`KeyColor`] set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of keys on the keyboard when no other value is configured.
pub const DEFAULT_KEY_COUNT: usize = 10;

/// The closed set of colours a key may take.
///
/// On the wire every variant is its lowercase name, e.g. `"white"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyColor {
    /// The colour every key starts with.
    #[default]
    White,
    Black,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
}

impl KeyColor {
    /// All colours, in declaration order.
    pub const ALL: [KeyColor; 8] = [
        KeyColor::White,
        KeyColor::Black,
        KeyColor::Red,
        KeyColor::Orange,
        KeyColor::Yellow,
        KeyColor::Green,
        KeyColor::Blue,
        KeyColor::Purple,
    ];

    /// Returns the wire name of this colour.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyColor::White => "white",
            KeyColor::Black => "black",
            KeyColor::Red => "red",
            KeyColor::Orange => "orange",
            KeyColor::Yellow => "yellow",
            KeyColor::Green => "green",
            KeyColor::Blue => "blue",
            KeyColor::Purple => "purple",
        }
    }
}

impl fmt::Display for KeyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the [`KeyColor`] names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown key colour: {0:?}")]
pub struct UnknownColor(pub String);

impl FromStr for KeyColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyColor::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

/// Why a submitted key row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyValidationError {
    /// The row does not have exactly the configured number of keys.
    #[error("expected {expected} keys, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// A key value is outside the [`KeyColor`] set.
    #[error("key {index} has unknown colour {value:?}")]
    UnknownColor { index: usize, value: String },
}

/// The full keyboard: an ordered row of key colours.
///
/// Serialises as a plain JSON array of colour names, which is also the
/// persisted representation in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyboardState {
    keys: Vec<KeyColor>,
}

impl KeyboardState {
    /// Returns a keyboard of `len` white keys.
    pub fn new_default(len: usize) -> Self {
        Self {
            keys: vec![KeyColor::default(); len],
        }
    }

    /// Builds a keyboard from already-typed colours.
    ///
    /// # Errors
    ///
    /// Returns [`KeyValidationError::WrongLength`] if `keys.len() != expected_len`.
    pub fn from_colors(keys: Vec<KeyColor>, expected_len: usize) -> Result<Self, KeyValidationError> {
        if keys.len() != expected_len {
            return Err(KeyValidationError::WrongLength {
                expected: expected_len,
                actual: keys.len(),
            });
        }
        Ok(Self { keys })
    }

    /// Parses and validates a row of colour names submitted by a client.
    ///
    /// The length is checked first so that a wrong-length row is reported as
    /// such even if it also contains unknown colours.
    ///
    /// # Errors
    ///
    /// Returns [`KeyValidationError`] if the row has the wrong length or
    /// contains a value outside the colour set.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keylock_core::{KeyColor, KeyboardState};
    ///
    /// let names = vec!["red".to_string(), "white".to_string()];
    /// let state = KeyboardState::from_color_names(&names, 2).unwrap();
    /// assert_eq!(state.keys(), &[KeyColor::Red, KeyColor::White]);
    /// ```
    pub fn from_color_names<S: AsRef<str>>(
        names: &[S],
        expected_len: usize,
    ) -> Result<Self, KeyValidationError> {
        if names.len() != expected_len {
            return Err(KeyValidationError::WrongLength {
                expected: expected_len,
                actual: names.len(),
            });
        }

        let keys = names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                name.as_ref()
                    .parse::<KeyColor>()
                    .map_err(|_| KeyValidationError::UnknownColor {
                        index,
                        value: name.as_ref().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { keys })
    }

    /// The keys in order.
    pub fn keys(&self) -> &[KeyColor] {
        &self.keys
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` if the keyboard has no keys at all.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new_default(DEFAULT_KEY_COUNT)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_default_keyboard_is_ten_white_keys() {
        let state = KeyboardState::default();
        assert_eq!(state.len(), DEFAULT_KEY_COUNT);
        assert!(state.keys().iter().all(|k| *k == KeyColor::White));
    }

    #[test]
    fn test_from_color_names_accepts_valid_row() {
        // Arrange
        let row = names(&["red", "white", "blue"]);

        // Act
        let state = KeyboardState::from_color_names(&row, 3).unwrap();

        // Assert
        assert_eq!(
            state.keys(),
            &[KeyColor::Red, KeyColor::White, KeyColor::Blue]
        );
    }

    #[test]
    fn test_from_color_names_rejects_short_row() {
        let row = names(&["red", "white"]);
        let err = KeyboardState::from_color_names(&row, 3).unwrap_err();
        assert_eq!(
            err,
            KeyValidationError::WrongLength {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_from_color_names_rejects_long_row() {
        let row = names(&["red"; 11]);
        let err = KeyboardState::from_color_names(&row, 10).unwrap_err();
        assert!(matches!(err, KeyValidationError::WrongLength { actual: 11, .. }));
    }

    #[test]
    fn test_from_color_names_reports_first_unknown_colour() {
        let row = names(&["red", "chartreuse", "magenta"]);
        let err = KeyboardState::from_color_names(&row, 3).unwrap_err();
        assert_eq!(
            err,
            KeyValidationError::UnknownColor {
                index: 1,
                value: "chartreuse".to_string()
            }
        );
    }

    #[test]
    fn test_colour_names_are_case_sensitive() {
        // The wire contract uses lowercase names only.
        assert!("Red".parse::<KeyColor>().is_err());
        assert_eq!("red".parse::<KeyColor>(), Ok(KeyColor::Red));
    }

    #[test]
    fn test_keyboard_serialises_as_plain_array() {
        let state = KeyboardState::from_colors(vec![KeyColor::Red, KeyColor::White], 2).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"["red","white"]"#);
    }

    #[test]
    fn test_keyboard_rejects_unknown_colour_when_deserialising() {
        let result = serde_json::from_str::<KeyboardState>(r#"["red","nope"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_display_matches_wire_name() {
        for colour in KeyColor::ALL {
            assert_eq!(colour.to_string(), colour.as_str());
        }
    }
}
