use courier_domain::{ActorId, ChatId};
use courier_protocol::{
	ClientCommand, DEFAULT_MAX_FRAME_SIZE, ServerEvent, decode_command, decode_command_default, encode_event,
	encode_event_default,
};
use proptest::prelude::*;

#[test]
fn encode_event_default_matches_explicit_default_limit() {
	let ev = ServerEvent::TypingIndicator {
		chat_id: ChatId(1),
		user_id: ActorId(2),
		is_typing: false,
	};

	let a = encode_event_default(&ev).expect("encode_event_default");
	let b = encode_event(&ev, DEFAULT_MAX_FRAME_SIZE).expect("encode_event");

	assert_eq!(a, b);
}

#[test]
fn typing_command_roundtrips_through_indicator_shape() {
	// A client typing command and the fanned-out indicator share field
	// names so clients can reuse their serializers.
	let cmd = decode_command_default(r#"{"type":"typing","chat_id":3,"is_typing":true}"#).expect("decode");
	let ClientCommand::Typing { chat_id, is_typing } = cmd else {
		panic!("expected typing command");
	};
	assert_eq!(chat_id, ChatId(3));
	assert!(is_typing);
}

proptest! {
	#[test]
	fn decoder_never_panics_on_arbitrary_input(input in ".*") {
		let _ = decode_command(&input, DEFAULT_MAX_FRAME_SIZE);
	}

	#[test]
	fn decoder_never_panics_on_arbitrary_objects(
		tag in "[a-z_]{0,20}",
		chat_id in any::<i64>(),
		is_typing in any::<bool>(),
	) {
		let frame = serde_json::json!({
			"type": tag,
			"chat_id": chat_id,
			"is_typing": is_typing,
		})
		.to_string();

		// Known tags must decode; unknown tags must be tolerated as no-ops.
		match decode_command_default(&frame) {
			Ok(ClientCommand::Typing { chat_id: got, .. }) => prop_assert_eq!(got, ChatId(chat_id)),
			Ok(_) | Err(_) => {}
		}
	}

	#[test]
	fn call_commands_with_random_payloads_decode(chat_id in proptest::option::of(any::<i64>())) {
		let mut obj = serde_json::json!({
			"type": "call",
			"data": {"sdp": "offer"},
		});
		if let Some(id) = chat_id {
			obj["chat_id"] = serde_json::json!(id);
		}

		let cmd = decode_command_default(&obj.to_string()).expect("call frames decode");
		let ClientCommand::Call { chat_id: got, .. } = cmd else {
			panic!("expected call command");
		};
		prop_assert_eq!(got, chat_id.map(ChatId));
	}
}
