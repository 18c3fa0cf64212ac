use super::*;

#[test]
fn parses_basic_types() {
    let types = parse("ybnqiuxtd").unwrap();
    assert_eq!(
        types,
        vec![
            SigType::Byte,
            SigType::Boolean,
            SigType::Int16,
            SigType::Uint16,
            SigType::Int32,
            SigType::Uint32,
            SigType::Int64,
            SigType::Uint64,
            SigType::Double,
        ]
    );
}

#[test]
fn parses_array_of_struct() {
    let types = parse("a(si)").unwrap();
    assert_eq!(
        types,
        vec![SigType::Array(Box::new(SigType::Struct(vec![
            SigType::String,
            SigType::Int32,
        ])))]
    );
}

#[test]
fn parses_dict() {
    let types = parse("a{sv}").unwrap();
    let SigType::Array(inner) = &types[0] else {
        panic!("expected array");
    };
    assert_eq!(**inner, SigType::DictEntry(Box::new(SigType::String), Box::new(SigType::Variant)));
}

#[test]
fn round_trips_to_string() {
    for sig in ["y", "a{sv}", "(ii)", "aai", "a(ss)"] {
        let types = parse(sig).unwrap();
        assert_eq!(join(&types), sig);
    }
}

#[test]
fn rejects_unknown_code() {
    assert_eq!(parse("z"), Err(SignatureError::UnknownTypeCode(b'z')));
}

#[test]
fn rejects_unmatched_paren() {
    assert_eq!(parse("(ii"), Err(SignatureError::StructStartedButNotEnded));
    assert_eq!(parse("ii)"), Err(SignatureError::StructEndedButNotStarted));
}

#[test]
fn rejects_empty_struct() {
    assert_eq!(parse("()"), Err(SignatureError::StructHasNoFields));
}

#[test]
fn rejects_dict_entry_outside_array() {
    assert_eq!(parse("{sv}"), Err(SignatureError::DictEntryNotInsideArray));
}

#[test]
fn rejects_non_basic_dict_key() {
    assert_eq!(parse("a{vs}"), Err(SignatureError::DictKeyMustBeBasicType));
}

#[test]
fn rejects_too_long_signature() {
    let sig = "y".repeat(256);
    assert_eq!(parse(&sig), Err(SignatureError::SignatureTooLong));
}

#[test]
fn rejects_array_nesting_overflow() {
    let sig = "a".repeat(33) + "y";
    assert_eq!(parse(&sig), Err(SignatureError::ExceededMaximumArrayRecursion));
}

#[test]
fn parse_single_requires_one_complete_type() {
    assert_eq!(parse_single("i").unwrap(), SigType::Int32);
    assert_eq!(
        parse_single("ii"),
        Err(SignatureError::VariantSignatureMustBeSingleCompleteType)
    );
}
