//! Integration tests for the keylock-core wire protocol.
//!
//! These tests pin the exact JSON shapes browsers depend on, going through the
//! public codec API together with the domain validation that runs on decoded
//! payloads.

use keylock_core::protocol::{decode_server_event, encode_client_message};
use keylock_core::{
    decode_client_message, encode_event, ClientIdentity, ClientMessage, KeyColor,
    KeyValidationError, KeyboardState, ServerEvent, DEFAULT_KEY_COUNT,
};

/// A browser submission decodes and then validates into a full keyboard.
#[test]
fn test_submission_decodes_and_validates_into_keyboard() {
    // Arrange: ten keys, the first one red
    let mut names = vec!["white"; DEFAULT_KEY_COUNT];
    names[0] = "red";
    let text = format!(
        r#"{{"event":"updateKeys","userId":"u1","newKeys":{}}}"#,
        serde_json::to_string(&names).unwrap()
    );

    // Act
    let msg = decode_client_message(&text).expect("decode must succeed");
    let ClientMessage::UpdateKeys { new_keys, .. } = msg else {
        panic!("expected updateKeys");
    };
    let state = KeyboardState::from_color_names(&new_keys, DEFAULT_KEY_COUNT)
        .expect("row must validate");

    // Assert
    assert_eq!(state.keys()[0], KeyColor::Red);
    assert!(state.keys()[1..].iter().all(|k| *k == KeyColor::White));
}

/// A well-formed frame with a bad row decodes fine but fails validation.
#[test]
fn test_submission_with_unknown_colour_fails_validation_not_decoding() {
    let text = r#"{"event":"updateKeys","newKeys":["red","teal"]}"#;

    let msg = decode_client_message(text).expect("decode must succeed");
    let ClientMessage::UpdateKeys { new_keys, .. } = msg else {
        panic!("expected updateKeys");
    };

    assert_eq!(
        KeyboardState::from_color_names(&new_keys, 2),
        Err(KeyValidationError::UnknownColor {
            index: 1,
            value: "teal".to_string()
        })
    );
}

/// Initial sync events have the exact shape of the original socket contract.
#[test]
fn test_initial_sync_events_have_expected_json() {
    let keys = KeyboardState::new_default(3);
    let owner = ClientIdentity::parse("u1").unwrap();

    let update = encode_event(&ServerEvent::UpdateKeys { keys }).unwrap();
    let granted = encode_event(&ServerEvent::ControlGranted {
        owner_id: Some(owner),
    })
    .unwrap();

    assert_eq!(update, r#"{"event":"updateKeys","keys":["white","white","white"]}"#);
    assert_eq!(granted, r#"{"event":"controlGranted","ownerId":"u1"}"#);
}

/// A denied acquire reply carries the current owner.
#[test]
fn test_denied_ack_carries_owner() {
    let text = r#"{"event":"ack","ack":9,"success":false,"ownerId":"u2"}"#;

    let event = decode_server_event(text).unwrap();

    assert_eq!(
        event,
        ServerEvent::Ack {
            ack: Some(9),
            success: false,
            owner_id: Some(ClientIdentity::parse("u2").unwrap()),
        }
    );
}

/// What a client encodes is what the server decodes.
#[test]
fn test_client_encoding_is_accepted_by_server_decoder() {
    let msg = ClientMessage::AcquireControl { ack: Some(1) };
    let text = encode_client_message(&msg).unwrap();
    assert_eq!(text, r#"{"event":"acquireControl","ack":1}"#);
    assert_eq!(decode_client_message(&text).unwrap(), msg);
}
