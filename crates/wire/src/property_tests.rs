// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use crate::reply;
use crate::request::parse_request;

proptest! {
    /// The parser is total: no input line can panic it.
    #[test]
    fn parse_never_panics(line in ".*") {
        let _ = parse_request(&line);
    }

    /// Every execute line with a name round-trips the name and args.
    #[test]
    fn execute_preserves_tokens(
        name in "[a-z][a-z0-9_]{0,16}",
        args in proptest::collection::vec("[a-z0-9=./-]{1,12}", 0..6),
    ) {
        let line = format!("execute {} {}", name, args.join(" "));
        let parsed = parse_request(&line);
        prop_assert_eq!(
            parsed,
            Ok(crate::Request::Execute { name, args })
        );
    }

    /// Reply lines always carry their token and a single trailing newline.
    #[test]
    fn replies_are_single_lines(detail in "[ -~]{0,64}") {
        for line in [reply::ok(&detail), reply::err(&detail)] {
            prop_assert!(line.ends_with('\n'));
            prop_assert_eq!(line.matches('\n').count(), 1);
            prop_assert!(line.starts_with('['));
        }
    }

    /// An [EOT] line is always found when it begins a line, wherever it sits.
    #[test]
    fn eot_found_at_any_line_boundary(prefix in "[a-z ]{0,32}", slot in 0usize..32, exit in 0i32..256) {
        let mut stream = prefix.clone();
        if !stream.is_empty() {
            stream.push('\n');
        }
        stream.push_str(&reply::eot(slot, exit));
        let pos = reply::find_eot(stream.as_bytes(), true);
        prop_assert!(pos.is_some());
        let pos = pos.unwrap_or_default();
        prop_assert!(reply::starts_eot(&stream.as_bytes()[pos..]));
    }
}
