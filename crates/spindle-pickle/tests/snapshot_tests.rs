//! Snapshot tests for the pickle codec's public surface.
//!
//! Pins the protocol version, the load-bearing opcode byte values, and the
//! error display strings so wire-level constants don't silently change.

use spindle_pickle::{OpCode, PROTOCOL_VERSION, PickleError};

#[test]
fn protocol_version_snapshot() {
    insta::assert_snapshot!("protocol_version", PROTOCOL_VERSION.to_string());
}

#[test]
fn core_opcode_bytes_snapshot() {
    let summary = format!(
        "mark={:02x} stop={:02x} proto={:02x} tuple={:02x} appends={:02x} setitems={:02x} \
         global={:02x} reduce={:02x} binput={:02x} binget={:02x}",
        OpCode::Mark as u8,
        OpCode::Stop as u8,
        OpCode::Proto as u8,
        OpCode::Tuple as u8,
        OpCode::Appends as u8,
        OpCode::SetItems as u8,
        OpCode::Global as u8,
        OpCode::Reduce as u8,
        OpCode::BinPut as u8,
        OpCode::BinGet as u8,
    );
    insta::assert_snapshot!("core_opcode_bytes", summary);
}

#[test]
fn memo_miss_display_snapshot() {
    insta::assert_snapshot!("memo_miss_display", PickleError::MemoMiss(7).to_string());
}

#[test]
fn too_many_memo_ids_display_snapshot() {
    insta::assert_snapshot!(
        "too_many_memo_ids_display",
        PickleError::TooManyMemoIds.to_string()
    );
}

#[test]
fn unknown_global_display_snapshot() {
    let err = PickleError::UnknownGlobal {
        module: "torch.jit._pickle".to_owned(),
        name: "build_floatlist".to_owned(),
    };
    insta::assert_snapshot!("unknown_global_display", err.to_string());
}

#[test]
fn unbalanced_container_display_snapshot() {
    let err = PickleError::UnbalancedContainer("TUPLE with no open MARK".to_owned());
    insta::assert_snapshot!("unbalanced_container_display", err.to_string());
}
