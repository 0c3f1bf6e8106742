//! Integration tests for the urtps-core frame codec and node model.
//!
//! These exercise the public API the way the engine does: a publishing node
//! is read, its payload encoded, the bytes decoded on the far side and the
//! value written into a subscribing node of the same name.

use urtps_core::{
    decode_frame,
    domain::drivers::{bool_node, toggle_node},
    encode_frame, CodecError, Node, NodeHandle, TopicRegistry,
};

#[test]
fn test_decode_of_encode_returns_name_and_value() {
    let cases = [
        ("temp", "23.5"),
        ("btn", "True"),
        ("motor.left", "-0.75"),
        ("greeting", "héllo wörld"),
        ("empty", ""),
        ("spaces", "  padded  "),
    ];

    for (name, value) in cases {
        let bytes = encode_frame(name, value).expect("encode must succeed");
        let frame = decode_frame(&bytes).expect("decode must succeed");
        assert_eq!(frame.fields(), [name, value], "case {name:?}");
    }
}

#[test]
fn test_value_containing_separator_is_not_truncated() {
    let bytes = encode_frame("path", "a|b|c").unwrap();
    let frame = decode_frame(&bytes).unwrap();
    assert_eq!(frame.name, "path");
    assert_eq!(frame.value, "a|b|c");
}

#[test]
fn test_malformed_frames_surface_as_errors() {
    assert!(matches!(decode_frame(&[0xC3, 0x28]), Err(CodecError::InvalidUtf8(_))));
    assert_eq!(decode_frame(b"lonely"), Err(CodecError::MissingSeparator));
}

#[test]
fn test_publishing_node_to_subscribing_node_over_codec() {
    // Arrange – one peer publishes a toggling button, another subscribes
    let publisher = NodeHandle::from(toggle_node("btn", 1).unwrap());
    let (sub_node, reader) = bool_node("btn").unwrap();
    let mut subscribers = TopicRegistry::new();
    subscribers.insert(NodeHandle::from(sub_node));

    // Act – one publish pass, then one receive, then one subscriber tick
    publisher.tick();
    let payload = publisher.read().expect("toggle must have a pending value");
    let bytes = encode_frame(publisher.name(), &payload).unwrap();
    let frame = decode_frame(&bytes).unwrap();
    let target = subscribers.get(&frame.name).expect("topic must be registered");
    target.write(frame.value);
    target.tick();

    // Assert
    assert!(reader.get());
    assert_eq!(publisher.read(), None, "event-publish value is consumed once");
}

#[test]
fn test_event_subscribe_ignores_repeated_values() {
    let node = NodeHandle::from(Node::event_subscribe("temp").unwrap());

    for value in ["20", "20", "21", "21", "21", "20"] {
        node.write(value);
    }

    // Only the final change is pending; earlier ones were overwritten.
    assert_eq!(node.read().as_deref(), Some("20"));
    assert_eq!(node.read(), None);
}
