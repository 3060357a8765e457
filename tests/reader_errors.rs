use cinder_core::error::{Position, ReaderError};
use cinder_core::reader::{read_all_str, read_string};
use miette::Diagnostic;

#[test]
fn test_unterminated_collections_fail_with_eof() {
    for source in ["[1 2", "(a (b)", "{:a 1", "#{1", "\"abc", "'"] {
        let err = read_string(source).unwrap_err();
        assert!(err.is_eof(), "{source}: {err:?}");
    }
}

#[test]
fn test_empty_input_is_eof() {
    assert!(read_string("").unwrap_err().is_eof());
    assert!(read_string("  ;; only a comment").unwrap_err().is_eof());
}

#[test]
fn test_odd_map_literal() {
    assert!(matches!(
        read_string("{1 2 3}").unwrap_err(),
        ReaderError::OddMapLiteral { .. }
    ));
}

#[test]
fn test_duplicate_keys_and_set_members() {
    match read_string("{:a 1 :a 2}").unwrap_err() {
        ReaderError::DuplicateKey { key, .. } => assert_eq!(key, ":a"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        read_string("#{1 1}").unwrap_err(),
        ReaderError::DuplicateKey { .. }
    ));
}

#[test]
fn test_unmatched_delimiter_reports_position() {
    let err = read_all_str("(a)\n  )").unwrap_err();
    match err {
        ReaderError::UnmatchedDelimiter { delimiter, pos } => {
            assert_eq!(delimiter, ')');
            assert_eq!(pos.line, Some(2));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_invalid_tokens() {
    assert!(matches!(read_string("1x").unwrap_err(), ReaderError::InvalidNumber { .. }));
    assert!(matches!(read_string("a/b/c").unwrap_err(), ReaderError::InvalidToken { .. }));
    assert!(matches!(read_string(": x").unwrap_err(), ReaderError::InvalidToken { .. }));
    assert!(matches!(read_string("\\bogus").unwrap_err(), ReaderError::UnknownCharacter { .. }));
    assert!(matches!(read_string("\"\\q\"").unwrap_err(), ReaderError::UnsupportedEscape { .. }));
}

#[test]
fn test_metadata_errors() {
    assert!(matches!(read_string("^1 x").unwrap_err(), ReaderError::InvalidMeta { .. }));
    assert!(matches!(read_string("^:k 5").unwrap_err(), ReaderError::InvalidMeta { .. }));
}

#[test]
fn test_dispatch_errors() {
    assert!(read_string("#<obj>").is_err());
    assert!(read_string("#1").is_err());
    assert!(matches!(
        read_string("#nope 1").unwrap_err(),
        ReaderError::UnknownTag { .. }
    ));
    assert!(read_string("#inst \"2013-13-01\"").is_err());
    assert!(read_string("`~@xs").is_err());
}

#[test]
fn test_errors_carry_diagnostic_codes() {
    let err = read_string("[1").unwrap_err();
    assert_eq!(err.code().map(|c| c.to_string()), Some("reader::eof".to_string()));
    assert!(err.help().is_some());
    assert_eq!(Position::unknown().to_string(), "");
}
