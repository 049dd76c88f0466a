use appbridge::runtime::error::CodecError;
use appbridge::runtime::{Envelope, ErrorObject, Method};
use proptest::prelude::*;
use serde_json::{Value, json};

fn method_strategy() -> impl Strategy<Value = Method> {
    prop_oneof![
        Just(Method::Initialize),
        Just(Method::Ready),
        Just(Method::ToolsCall),
        Just(Method::ToolsList),
        Just(Method::ResourcesRead),
        Just(Method::ToolResult),
        Just(Method::ToolInput),
        Just(Method::Teardown),
        Just(Method::Ping),
        Just(Method::Other("ping".into())),
        Just(Method::Other("ui/ready".into())),
        Just(Method::Other("tools/call".into())),
        "ui/[a-z-]{1,12}".prop_map(|name| Method::from(name.as_str())),
    ]
}

fn params_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!({})),
        ("[a-z]{1,8}", any::<i64>()).prop_map(|(key, n)| json!({ key: n })),
        ("[a-zA-Z ]{0,16}", any::<bool>()).prop_map(|(text, flag)| json!({ "text": text, "flag": flag })),
        prop::collection::vec(any::<u32>(), 0..4).prop_map(|items| json!(items)),
    ]
}

/// Params as callers hand them to the constructors, including shapes the
/// wire does not carry directly.
fn raw_params_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        params_strategy(),
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

fn envelope_strategy() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        (any::<u64>(), method_strategy(), raw_params_strategy())
            .prop_map(|(id, method, params)| Envelope::request(id, method, params)),
        (method_strategy(), raw_params_strategy())
            .prop_map(|(method, params)| Envelope::notification(method, params)),
        (any::<u64>(), params_strategy()).prop_map(|(id, result)| Envelope::success(id, result)),
        (any::<u64>(), any::<i32>(), "[a-z ]{1,20}", prop::option::of(raw_params_strategy())).prop_map(
            |(id, code, message, data)| {
                let mut error = ErrorObject::new(code as i64, message);
                if let Some(data) = data {
                    error = error.with_data(data);
                }
                Envelope::failure(id, error)
            }
        ),
    ]
}

proptest! {
    #[test]
    fn decode_inverts_encode(envelope in envelope_strategy()) {
        let line = envelope.encode_line();
        prop_assert_eq!(Envelope::decode_str(&line).unwrap(), envelope);
    }
}

#[test]
fn constructor_shapes_survive_the_wire() {
    let cases = [
        Envelope::request(1, Method::Ping, Value::Null),
        Envelope::notification(Method::Ready, Value::Null),
        Envelope::request(2, Method::ToolsCall, json!("flights")),
        Envelope::notification(Method::ToolInput, json!(42)),
        Envelope::request(3, Method::Other("ping".into()), json!({})),
        Envelope::notification(Method::Other("ui/ready".into()), json!([])),
        Envelope::failure(4, ErrorObject::new(-32000, "boom").with_data(Value::Null)),
    ];
    for envelope in cases {
        let decoded = Envelope::decode_str(&envelope.encode_line()).unwrap();
        assert_eq!(decoded, envelope);
    }

    assert_eq!(
        Envelope::request(5, Method::Ping, json!(true)).encode()["params"],
        json!([true])
    );
}

#[test]
fn alias_tag_is_accepted() {
    let envelope = Envelope::decode(json!({ "v": "2.0", "method": "ui/ready" })).unwrap();
    assert_eq!(envelope, Envelope::notification(Method::Ready, json!({})));
}

#[test]
fn ambiguous_shapes_are_rejected() {
    let cases = [
        json!({ "jsonrpc": "2.0" }),
        json!({ "jsonrpc": "2.0", "id": 1 }),
        json!({ "jsonrpc": "2.0", "id": 1, "result": 1, "error": { "code": 1, "message": "x" } }),
        json!({ "jsonrpc": "2.0", "method": "ping", "result": {} }),
        json!({ "jsonrpc": "2.0", "id": "one", "method": "ping" }),
        json!({ "method": "ping" }),
    ];
    for case in cases {
        match Envelope::decode(case.clone()) {
            Err(CodecError::MalformedEnvelope(_)) => {}
            other => panic!("expected MalformedEnvelope for {case}, got {other:?}"),
        }
    }

    assert!(matches!(
        Envelope::decode_str("{not json"),
        Err(CodecError::InvalidJson(_))
    ));
}
