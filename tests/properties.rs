//! Property tests for the request parser and the timer heap.

use beacon::http::{HttpCode, RequestParser};
use beacon::reactor::TimerHeap;
use proptest::prelude::*;
use std::time::{Duration, Instant};

const REQUEST: &[u8] = b"POST /3CGISQL.cgi HTTP/1.1\r\n\
Host: localhost\r\n\
Connection: keep-alive\r\n\
Content-Length: 19\r\n\
\r\n\
user=ada&passwd=pw1";

fn parse_whole(bytes: &[u8]) -> RequestParser {
    let mut parser = RequestParser::new(2048);
    assert_eq!(parser.feed(bytes), bytes.len());
    assert_eq!(parser.parse(), HttpCode::GetRequest);
    parser
}

/// Sorted, deduplicated cut points strictly inside `len`.
fn arb_cuts(len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1..len, 0..12).prop_map(|mut cuts| {
        cuts.sort_unstable();
        cuts.dedup();
        cuts
    })
}

proptest! {
    /// Any fragmentation of a request parses to the same result as the
    /// whole request, and only once the last byte has arrived.
    #[test]
    fn fragmented_request_parses_like_whole(cuts in arb_cuts(REQUEST.len())) {
        let expected = parse_whole(REQUEST);

        let mut parser = RequestParser::new(2048);
        let mut start = 0;
        for end in cuts.iter().copied().chain([REQUEST.len()]) {
            prop_assert_eq!(parser.feed(&REQUEST[start..end]), end - start);
            let code = parser.parse();

            if end == REQUEST.len() {
                prop_assert_eq!(code, HttpCode::GetRequest);
            } else {
                prop_assert_eq!(code, HttpCode::NoRequest);
            }
            start = end;
        }

        prop_assert_eq!(parser.request(), expected.request());
    }

    /// Expired timers come out in deadline order, and removed ones never do.
    #[test]
    fn timers_expire_in_order(
        offsets in prop::collection::vec(0u64..1000, 1..64),
        removed in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let base = Instant::now();
        let mut heap = TimerHeap::new(4);

        let handles: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| heap.add(base + Duration::from_millis(offset), i))
            .collect();

        let mut gone = Vec::new();
        for index in removed {
            let i = index.index(handles.len());
            if !gone.contains(&i) {
                heap.remove(handles[i]);
                gone.push(i);
            }
        }

        let mut fired = Vec::new();
        let count = heap.pop_expired(base + Duration::from_millis(1000), |i| fired.push(i));

        prop_assert_eq!(count, offsets.len() - gone.len());
        prop_assert!(heap.is_empty());
        prop_assert!(fired.iter().all(|i| !gone.contains(i)));
        prop_assert!(fired.windows(2).all(|w| offsets[w[0]] <= offsets[w[1]]));
    }
}
