// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn newline_terminates_a_frame() {
    let mut buf = b"status\n".to_vec();
    assert_eq!(take_frames(&mut buf), vec!["status".to_string()]);
    assert!(buf.is_empty());
}

#[test]
fn nul_terminates_a_frame() {
    let mut buf = b"nop\0".to_vec();
    assert_eq!(take_frames(&mut buf), vec!["nop".to_string()]);
}

#[test]
fn partial_frames_wait_for_more_bytes() {
    let mut buf = b"exec echo".to_vec();
    assert!(take_frames(&mut buf).is_empty());
    buf.extend_from_slice(b"_task\n");
    assert_eq!(take_frames(&mut buf), vec!["exec echo_task".to_string()]);
}

#[test]
fn pipelined_requests_split_into_frames_in_order() {
    let mut buf = b"exec a\nexec b\nstatus\n".to_vec();
    assert_eq!(
        take_frames(&mut buf),
        vec!["exec a".to_string(), "exec b".to_string(), "status".to_string()]
    );
}

#[test]
fn remainder_after_terminator_is_preserved() {
    let mut buf = b"nop\nsta".to_vec();
    assert_eq!(take_frames(&mut buf), vec!["nop".to_string()]);
    assert_eq!(buf, b"sta".to_vec());
}

#[test]
fn oversized_frame_is_flushed_at_the_cap() {
    let mut buf = vec![b'x'; MAX_REQUEST + 10];
    let frames = take_frames(&mut buf);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), MAX_REQUEST + 10);
    assert!(buf.is_empty());
}

#[test]
fn empty_lines_become_empty_frames() {
    let mut buf = b"\n\n".to_vec();
    assert_eq!(take_frames(&mut buf), vec![String::new(), String::new()]);
}
