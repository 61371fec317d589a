// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn req(priority: u64, host: &str) -> Request {
    Request::new(priority, PeerId::new(host))
}

#[test]
fn lower_timestamp_wins() {
    assert!(req(1, "b") < req(2, "a"));
}

#[test]
fn equal_timestamps_break_ties_by_host() {
    assert!(req(5, "localhost:5557") < req(5, "localhost:5558"));
    assert_ne!(req(5, "a"), req(5, "b"));
}

#[test]
fn queue_head_is_smallest_request() {
    let mut queue = RequestQueue::new();
    queue.push(req(3, "a"));
    queue.push(req(1, "c"));
    queue.push(req(1, "b"));

    assert_eq!(queue.head(), Some(&req(1, "b")));
    assert_eq!(queue.pop_head(), Some(req(1, "b")));
    assert_eq!(queue.head(), Some(&req(1, "c")));
    assert_eq!(queue.len(), 2);
}

#[test]
fn remove_first_from_takes_earliest_of_that_peer() {
    let mut queue = RequestQueue::new();
    queue.push(req(1, "a"));
    queue.push(req(2, "b"));
    queue.push(req(4, "b"));

    assert_eq!(queue.remove_first_from(&PeerId::new("b")), Some(req(2, "b")));
    assert_eq!(queue.remove_first_from(&PeerId::new("z")), None);
    assert_eq!(queue.to_string(), "[a:1,b:4]");
}

#[test]
fn empty_queue_displays_brackets() {
    let queue = RequestQueue::new();
    assert!(queue.is_empty());
    assert_eq!(queue.to_string(), "[]");
}

use proptest::prelude::*;

proptest! {
    #[test]
    fn head_matches_sorted_minimum(
        entries in proptest::collection::vec((0u64..50, "[a-e]"), 1..40)
    ) {
        let mut queue = RequestQueue::new();
        let mut all: Vec<Request> = Vec::new();
        for (priority, host) in entries {
            let request = req(priority, &host);
            queue.push(request.clone());
            all.push(request);
        }
        all.sort();
        all.dedup();

        prop_assert_eq!(queue.head(), all.first());
        let drained: Vec<Request> = std::iter::from_fn(|| queue.pop_head()).collect();
        prop_assert_eq!(drained, all);
    }
}
