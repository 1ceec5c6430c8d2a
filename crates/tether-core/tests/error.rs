//! Tests for error handling

use std::io;

use tether_core::{ErrorCategory, TetherError, TetherResult};
use tether_protocol::CodecError;

#[test]
fn test_library_error_display()
{
    let error = TetherError::Library("agent closed the control channel".to_string());
    let message = format!("{}", error);
    assert!(message.contains("Library error"));
    assert!(message.contains("agent closed the control channel"));
}

#[test]
fn test_request_error_display()
{
    let error = TetherError::Request("no breakpoint at 0x0000000000004000".to_string());
    let message = format!("{}", error);
    assert!(message.contains("Invalid request"));
    assert!(message.contains("0x0000000000004000"));
}

#[test]
fn test_out_of_memory_display()
{
    let error = TetherError::OutOfMemory;
    let message = format!("{}", error);
    assert!(message.contains("Out of memory"));
}

#[test]
fn test_io_error_wraps_source()
{
    let source = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
    let error = TetherError::from(source);
    let message = format!("{}", error);
    assert!(message.contains("IO error"));
    assert!(message.contains("pipe closed"));
}

#[test]
fn test_request_category()
{
    let error = TetherError::Request("bad address".to_string());
    assert_eq!(error.category(), ErrorCategory::Request);
}

#[test]
fn test_io_failures_are_library_errors()
{
    let error = TetherError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
    assert_eq!(error.category(), ErrorCategory::Library);
}

#[test]
fn test_out_of_memory_category()
{
    assert_eq!(TetherError::OutOfMemory.category(), ErrorCategory::NoMem);
}

#[test]
fn test_codec_allocation_failure_is_nomem()
{
    let mut buf: Vec<u8> = Vec::new();
    let reserve_err = buf.try_reserve_exact(usize::MAX).unwrap_err();
    let error = TetherError::from(CodecError::from(reserve_err));
    assert_eq!(error.category(), ErrorCategory::NoMem);
}

#[test]
fn test_other_codec_failures_are_library_errors()
{
    let source = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
    let error = TetherError::from(CodecError::from(source));
    assert_eq!(error.category(), ErrorCategory::Library);
}

#[test]
fn test_category_display()
{
    assert_eq!(ErrorCategory::Library.to_string(), "LIBRARY");
    assert_eq!(ErrorCategory::Request.to_string(), "REQUEST");
    assert_eq!(ErrorCategory::NoMem.to_string(), "NOMEM");
}

#[test]
fn test_result_type()
{
    // Test that Result type is properly aliased
    let _result: TetherResult<()> = Ok(());
    let _error_result: TetherResult<()> = Err(TetherError::OutOfMemory);
}
